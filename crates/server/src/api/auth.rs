use axum::{
    extract::{FromRequestParts, State},
    http::{header, request::Parts, StatusCode},
    Json,
};
use freightdesk_core::auth::password::{hash_password, verify_password, MIN_PASSWORD_LEN};
use freightdesk_core::auth::{Role, TokenKind, TokenPair};
use freightdesk_core::domain::user::{NewUser, ProfileUpdate, User};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use super::{ApiError, AppState};

/// Caller resolved from a verified access token.
#[derive(Clone, Debug)]
pub struct AuthUser(pub User);

impl AuthUser {
    pub fn role(&self) -> Role {
        self.0.role
    }
}

fn bearer_token(parts: &Parts) -> Result<&str, ApiError> {
    let value = parts
        .headers
        .get(header::AUTHORIZATION)
        .ok_or_else(|| ApiError::unauthorized("authorization header required"))?
        .to_str()
        .map_err(|_| ApiError::unauthorized("invalid authorization header format"))?;
    value
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| ApiError::unauthorized("invalid authorization header format"))
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, ApiError> {
        let token = bearer_token(parts)?;
        let claims = state.tokens.verify(token, TokenKind::Access)?;
        let user = state
            .users
            .find_by_uuid(claims.sub)
            .await?
            .ok_or_else(|| ApiError::unauthorized("user no longer exists"))?;
        Ok(Self(user))
    }
}

#[derive(Debug, Deserialize)]
pub struct RegisterBody {
    pub login: String,
    pub password: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub phone: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginBody {
    pub login: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct RefreshBody {
    pub refresh_token: String,
}

fn session_body(status: &str, user: &User, tokens: TokenPair) -> Value {
    json!({
        "status": status,
        "access_token": tokens.access_token,
        "refresh_token": tokens.refresh_token,
        "token_type": tokens.token_type,
        "expires_in": tokens.expires_in,
        "user": user,
    })
}

pub async fn register(
    State(state): State<AppState>,
    Json(body): Json<RegisterBody>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    if body.login.trim().is_empty() {
        return Err(ApiError::bad_request("login is required"));
    }
    if body.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ApiError::bad_request(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }

    let password = body.password;
    let password_hash = tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(|error| ApiError::internal(error.to_string()))??;

    let user = state
        .users
        .create(NewUser {
            login: body.login,
            email: body.email,
            name: body.name,
            phone: body.phone,
            role: Role::Buyer,
            password_hash,
        })
        .await?;
    let tokens = state.tokens.issue_pair(user.uuid, user.role)?;

    info!(event_name = "api.user.registered", user_id = user.id.0, "user registered");
    Ok((StatusCode::CREATED, Json(session_body("success", &user, tokens))))
}

pub async fn login(
    State(state): State<AppState>,
    Json(body): Json<LoginBody>,
) -> Result<Json<Value>, ApiError> {
    let user = state
        .users
        .find_by_login(&body.login)
        .await?
        .ok_or_else(|| ApiError::unauthorized("invalid credentials"))?;

    let password = body.password;
    let stored_hash = user.password_hash.clone();
    let valid = tokio::task::spawn_blocking(move || verify_password(&password, &stored_hash))
        .await
        .map_err(|error| ApiError::internal(error.to_string()))?;
    if !valid {
        return Err(ApiError::unauthorized("invalid credentials"));
    }

    let tokens = state.tokens.issue_pair(user.uuid, user.role)?;
    info!(event_name = "api.user.logged_in", user_id = user.id.0, "user logged in");
    Ok(Json(session_body("success", &user, tokens)))
}

pub async fn refresh(
    State(state): State<AppState>,
    Json(body): Json<RefreshBody>,
) -> Result<Json<Value>, ApiError> {
    let claims = state.tokens.verify(&body.refresh_token, TokenKind::Refresh)?;
    let user = state
        .users
        .find_by_uuid(claims.sub)
        .await?
        .ok_or_else(|| ApiError::unauthorized("user no longer exists"))?;

    // Role comes from the store so promotions take effect on refresh.
    let tokens = state.tokens.issue_pair(user.uuid, user.role)?;
    Ok(Json(session_body("success", &user, tokens)))
}

/// Tokens are stateless; logout only acknowledges so clients can drop them.
pub async fn logout(user: AuthUser) -> Json<Value> {
    info!(event_name = "api.user.logged_out", user_id = user.0.id.0, "user logged out");
    Json(json!({ "status": "success", "message": "Logged out successfully" }))
}

pub async fn profile(user: AuthUser) -> Json<Value> {
    Json(json!({ "status": "ok", "user": user.0 }))
}

pub async fn update_profile(
    State(state): State<AppState>,
    user: AuthUser,
    Json(update): Json<ProfileUpdate>,
) -> Result<Json<Value>, ApiError> {
    let updated = state.users.update_profile(user.0.id, &update).await?;
    Ok(Json(json!({ "status": "ok", "user": updated })))
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};
    use freightdesk_core::auth::Role;
    use serde_json::json;

    use crate::api::test_support::{send, test_app, token_for, TEST_PASSWORD};

    #[tokio::test]
    async fn register_login_and_profile_round_trip() {
        let (app, _state) = test_app().await;

        let (status, registered) = send(
            &app,
            Method::POST,
            "/api/users/register",
            None,
            Some(json!({ "login": "ivanov", "password": "pa55word", "name": "Иванов" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(registered["user"]["role"], "buyer");
        assert!(registered["user"].get("password_hash").is_none());

        let (status, logged_in) = send(
            &app,
            Method::POST,
            "/api/users/login",
            None,
            Some(json!({ "login": "ivanov", "password": "pa55word" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let access = logged_in["access_token"].as_str().expect("access token").to_string();

        let (status, profile) =
            send(&app, Method::GET, "/api/users/profile", Some(&access), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(profile["user"]["name"], "Иванов");

        let (status, updated) = send(
            &app,
            Method::PUT,
            "/api/users/profile",
            Some(&access),
            Some(json!({ "phone": "+7 900 000-00-00", "name": "" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["user"]["phone"], "+7 900 000-00-00");
        assert_eq!(updated["user"]["name"], "Иванов");
    }

    #[tokio::test]
    async fn duplicate_registration_is_a_conflict() {
        let (app, _state) = test_app().await;
        let body = json!({ "login": "petrov", "password": "pa55word" });

        send(&app, Method::POST, "/api/users/register", None, Some(body.clone())).await;
        let (status, error) = send(&app, Method::POST, "/api/users/register", None, Some(body)).await;

        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(error["status"], "fail");
    }

    #[tokio::test]
    async fn wrong_password_and_missing_token_are_unauthorized() {
        let (app, state) = test_app().await;
        token_for(&state, "sidorov", Role::Buyer).await;

        let (status, _) = send(
            &app,
            Method::POST,
            "/api/users/login",
            None,
            Some(json!({ "login": "sidorov", "password": "not-the-password" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, body) = send(&app, Method::GET, "/api/users/profile", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["status"], "fail");

        let (status, _) =
            send(&app, Method::GET, "/api/users/profile", Some("not.a.token"), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn refresh_accepts_only_refresh_tokens() {
        let (app, _state) = test_app().await;
        let (_, registered) = send(
            &app,
            Method::POST,
            "/api/users/register",
            None,
            Some(json!({ "login": "kuznetsov", "password": TEST_PASSWORD })),
        )
        .await;
        let access = registered["access_token"].as_str().expect("access").to_string();
        let refresh = registered["refresh_token"].as_str().expect("refresh").to_string();

        let (status, _) = send(
            &app,
            Method::POST,
            "/api/users/refresh",
            None,
            Some(json!({ "refresh_token": access })),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, refreshed) = send(
            &app,
            Method::POST,
            "/api/users/refresh",
            None,
            Some(json!({ "refresh_token": refresh })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(refreshed["access_token"].as_str().is_some());

        let (status, _) = send(&app, Method::GET, "/api/users/profile", Some(&refresh), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}
