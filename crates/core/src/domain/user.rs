use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::Role;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A registered account. The password hash never leaves the persistence layer
/// through serialization.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub uuid: Uuid,
    pub login: String,
    pub email: String,
    pub name: String,
    pub phone: String,
    pub role: Role,
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewUser {
    pub login: String,
    pub email: String,
    pub name: String,
    pub phone: String,
    pub role: Role,
    pub password_hash: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
}

impl ProfileUpdate {
    pub fn apply(&self, user: &mut User) {
        if let Some(name) = self.name.as_deref().filter(|value| !value.trim().is_empty()) {
            user.name = name.trim().to_string();
        }
        if let Some(phone) = self.phone.as_deref().filter(|value| !value.trim().is_empty()) {
            user.phone = phone.trim().to_string();
        }
        if let Some(email) = self.email.as_deref().filter(|value| !value.trim().is_empty()) {
            user.email = email.trim().to_string();
        }
    }
}
