use std::fmt;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use uuid::Uuid;

use crate::auth::roles::Role;
use crate::auth::AuthError;
use crate::config::AuthConfig;

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "HS256";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Access,
    Refresh,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Access => f.write_str("access"),
            Self::Refresh => f.write_str("refresh"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Public user UUID.
    pub sub: Uuid,
    pub role: Role,
    pub kind: TokenKind,
    pub iat: i64,
    pub exp: i64,
    pub jti: Uuid,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: u64,
}

#[derive(Debug, Deserialize, Serialize)]
struct Header {
    alg: String,
    typ: String,
}

/// Stateless HS256 token issuer and verifier.
#[derive(Clone, Debug)]
pub struct TokenService {
    secret: SecretString,
    access_ttl_secs: u64,
    refresh_ttl_secs: u64,
}

impl TokenService {
    pub fn new(secret: SecretString, access_ttl_secs: u64, refresh_ttl_secs: u64) -> Self {
        Self { secret, access_ttl_secs, refresh_ttl_secs }
    }

    pub fn from_config(config: &AuthConfig) -> Self {
        Self::new(config.jwt_secret.clone(), config.access_ttl_secs, config.refresh_ttl_secs)
    }

    pub fn issue_pair(&self, subject: Uuid, role: Role) -> Result<TokenPair, AuthError> {
        let now = Utc::now();
        Ok(TokenPair {
            access_token: self.issue_at(subject, role, TokenKind::Access, now)?,
            refresh_token: self.issue_at(subject, role, TokenKind::Refresh, now)?,
            token_type: "Bearer".to_string(),
            expires_in: self.access_ttl_secs,
        })
    }

    pub fn issue_at(
        &self,
        subject: Uuid,
        role: Role,
        kind: TokenKind,
        now: DateTime<Utc>,
    ) -> Result<String, AuthError> {
        let ttl = match kind {
            TokenKind::Access => self.access_ttl_secs,
            TokenKind::Refresh => self.refresh_ttl_secs,
        };
        let iat = now.timestamp();
        let claims = Claims {
            sub: subject,
            role,
            kind,
            iat,
            exp: iat.saturating_add(i64::try_from(ttl).unwrap_or(i64::MAX)),
            jti: Uuid::new_v4(),
        };

        let header = Header { alg: ALGORITHM.to_string(), typ: "JWT".to_string() };
        let header = encode_segment(&header)?;
        let payload = encode_segment(&claims)?;
        let signing_input = format!("{header}.{payload}");
        let signature = URL_SAFE_NO_PAD.encode(self.sign(signing_input.as_bytes())?);

        Ok(format!("{signing_input}.{signature}"))
    }

    pub fn verify(&self, token: &str, expected: TokenKind) -> Result<Claims, AuthError> {
        self.verify_at(token, expected, Utc::now())
    }

    pub fn verify_at(
        &self,
        token: &str,
        expected: TokenKind,
        now: DateTime<Utc>,
    ) -> Result<Claims, AuthError> {
        let mut segments = token.trim().split('.');
        let (Some(header), Some(payload), Some(signature), None) =
            (segments.next(), segments.next(), segments.next(), segments.next())
        else {
            return Err(AuthError::MalformedToken);
        };

        let parsed_header: Header = decode_segment(header)?;
        if parsed_header.alg != ALGORITHM {
            return Err(AuthError::MalformedToken);
        }

        let signature =
            URL_SAFE_NO_PAD.decode(signature).map_err(|_| AuthError::MalformedToken)?;
        let mut mac = self.mac()?;
        mac.update(format!("{header}.{payload}").as_bytes());
        mac.verify_slice(&signature).map_err(|_| AuthError::InvalidSignature)?;

        let claims: Claims = decode_segment(payload)?;
        if claims.exp <= now.timestamp() {
            return Err(AuthError::Expired);
        }
        if claims.kind != expected {
            return Err(AuthError::WrongKind { expected, found: claims.kind });
        }
        Ok(claims)
    }

    fn mac(&self) -> Result<HmacSha256, AuthError> {
        HmacSha256::new_from_slice(self.secret.expose_secret().as_bytes())
            .map_err(|error| AuthError::SigningKey(error.to_string()))
    }

    fn sign(&self, payload: &[u8]) -> Result<Vec<u8>, AuthError> {
        let mut mac = self.mac()?;
        mac.update(payload);
        Ok(mac.finalize().into_bytes().to_vec())
    }
}

fn encode_segment<T: Serialize>(value: &T) -> Result<String, AuthError> {
    let json = serde_json::to_vec(value).map_err(|_| AuthError::MalformedToken)?;
    Ok(URL_SAFE_NO_PAD.encode(json))
}

fn decode_segment<T: for<'de> Deserialize<'de>>(segment: &str) -> Result<T, AuthError> {
    let bytes = URL_SAFE_NO_PAD.decode(segment).map_err(|_| AuthError::MalformedToken)?;
    serde_json::from_slice(&bytes).map_err(|_| AuthError::MalformedToken)
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    use super::{TokenKind, TokenService};
    use crate::auth::{AuthError, Role};

    fn service() -> TokenService {
        TokenService::new("unit-test-signing-secret".to_string().into(), 900, 604_800)
    }

    #[test]
    fn issued_pair_verifies_with_matching_kinds() {
        let service = service();
        let subject = Uuid::new_v4();
        let pair = service.issue_pair(subject, Role::Manager).expect("issue pair");

        let access = service.verify(&pair.access_token, TokenKind::Access).expect("access");
        assert_eq!(access.sub, subject);
        assert_eq!(access.role, Role::Manager);
        assert_eq!(access.exp - access.iat, 900);

        let refresh = service.verify(&pair.refresh_token, TokenKind::Refresh).expect("refresh");
        assert_eq!(refresh.exp - refresh.iat, 604_800);
        assert_ne!(access.jti, refresh.jti);
        assert_eq!(pair.token_type, "Bearer");
    }

    #[test]
    fn refresh_token_is_not_accepted_as_access_token() {
        let service = service();
        let pair = service.issue_pair(Uuid::new_v4(), Role::Buyer).expect("issue pair");

        let error = service.verify(&pair.refresh_token, TokenKind::Access).expect_err("wrong kind");
        assert_eq!(
            error,
            AuthError::WrongKind { expected: TokenKind::Access, found: TokenKind::Refresh }
        );
    }

    #[test]
    fn expired_token_is_rejected() {
        let service = service();
        let issued = Utc::now() - Duration::hours(1);
        let token = service
            .issue_at(Uuid::new_v4(), Role::Buyer, TokenKind::Access, issued)
            .expect("issue token");

        assert_eq!(service.verify(&token, TokenKind::Access), Err(AuthError::Expired));
        assert!(service.verify_at(&token, TokenKind::Access, issued).is_ok());
    }

    #[test]
    fn tampered_payload_fails_signature_check() {
        let service = service();
        let token = service
            .issue_at(Uuid::new_v4(), Role::Buyer, TokenKind::Access, Utc::now())
            .expect("issue token");
        let forged = service
            .issue_at(Uuid::new_v4(), Role::Admin, TokenKind::Access, Utc::now())
            .expect("issue token");

        let mut parts: Vec<&str> = token.split('.').collect();
        let forged_payload = forged.split('.').nth(1).expect("payload segment");
        parts[1] = forged_payload;
        let tampered = parts.join(".");

        assert_eq!(service.verify(&tampered, TokenKind::Access), Err(AuthError::InvalidSignature));
    }

    #[test]
    fn token_from_another_secret_is_rejected() {
        let other = TokenService::new("another-signing-secret-xyz".to_string().into(), 900, 604_800);
        let token = other
            .issue_at(Uuid::new_v4(), Role::Admin, TokenKind::Access, Utc::now())
            .expect("issue token");

        assert_eq!(service().verify(&token, TokenKind::Access), Err(AuthError::InvalidSignature));
    }

    #[test]
    fn garbage_is_malformed() {
        let service = service();
        for token in ["", "abc", "a.b", "a.b.c.d", "!!.@@.##"] {
            assert_eq!(service.verify(token, TokenKind::Access), Err(AuthError::MalformedToken));
        }
    }
}
