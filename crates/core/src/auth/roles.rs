use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    #[default]
    Buyer,
    Manager,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Buyer => "buyer",
            Self::Manager => "manager",
            Self::Admin => "admin",
        }
    }

    pub fn is_moderator(&self) -> bool {
        matches!(self, Self::Manager | Self::Admin)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "buyer" => Ok(Self::Buyer),
            "manager" => Ok(Self::Manager),
            "admin" => Ok(Self::Admin),
            other => Err(DomainError::InvariantViolation(format!(
                "unknown role `{other}` (expected buyer|manager|admin)"
            ))),
        }
    }
}

/// Operations gated by role. Acting on one's own profile or requests is
/// checked against ownership by the repositories, not here.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    ViewAllRequests,
    ModerateRequests,
    ManageCatalog,
}

pub fn authorize(role: Role, action: Action) -> bool {
    match action {
        Action::ViewAllRequests | Action::ModerateRequests | Action::ManageCatalog => {
            role.is_moderator()
        }
    }
}
