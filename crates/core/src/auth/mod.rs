pub mod password;
pub mod roles;
pub mod token;

use thiserror::Error;

pub use roles::{authorize, Action, Role};
pub use token::{Claims, TokenKind, TokenPair, TokenService};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("token is malformed")]
    MalformedToken,
    #[error("token signature is invalid")]
    InvalidSignature,
    #[error("token has expired")]
    Expired,
    #[error("expected a {expected} token, got a {found} token")]
    WrongKind { expected: TokenKind, found: TokenKind },
    #[error("signing key was rejected: {0}")]
    SigningKey(String),
    #[error("password hashing failed: {0}")]
    PasswordHash(String),
}
