use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::transport_service::TransportServiceId;
use crate::domain::user::UserId;
use crate::errors::DomainError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LogisticRequestId(pub i64);

impl fmt::Display for LogisticRequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Draft,
    Formed,
    Completed,
    Rejected,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Formed => "formed",
            Self::Completed => "completed",
            Self::Rejected => "rejected",
        }
    }

    /// Completed and rejected requests are final; nothing leads back out of them.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Rejected)
    }

    pub fn can_transition_to(&self, next: RequestStatus) -> bool {
        matches!(
            (self, next),
            (Self::Draft, Self::Formed)
                | (Self::Formed, Self::Completed)
                | (Self::Formed, Self::Rejected)
        )
    }

    pub fn transition_to(&self, next: RequestStatus) -> Result<RequestStatus, DomainError> {
        if self.can_transition_to(next) {
            return Ok(next);
        }
        Err(DomainError::InvalidRequestTransition { from: *self, to: next })
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestStatus {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "draft" => Ok(Self::Draft),
            "formed" => Ok(Self::Formed),
            "completed" => Ok(Self::Completed),
            "rejected" => Ok(Self::Rejected),
            other => Err(DomainError::InvariantViolation(format!(
                "unknown request status `{other}` (expected draft|formed|completed|rejected)"
            ))),
        }
    }
}

/// Moderator decision on a formed request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    Completed,
    Rejected,
}

impl From<Resolution> for RequestStatus {
    fn from(value: Resolution) -> Self {
        match value {
            Resolution::Completed => Self::Completed,
            Resolution::Rejected => Self::Rejected,
        }
    }
}

impl FromStr for Resolution {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "completed" => Ok(Self::Completed),
            "rejected" => Ok(Self::Rejected),
            other => Err(DomainError::InvariantViolation(format!(
                "invalid resolution `{other}` (allowed: completed, rejected)"
            ))),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub from_city: String,
    pub to_city: String,
}

impl Route {
    pub fn new(from_city: impl Into<String>, to_city: impl Into<String>) -> Self {
        Self { from_city: from_city.into(), to_city: to_city.into() }
    }

    pub fn is_complete(&self) -> bool {
        !self.from_city.trim().is_empty() && !self.to_city.trim().is_empty()
    }
}

/// Physical cargo parameters: metres and kilograms.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CargoSpec {
    pub length: f64,
    pub width: f64,
    pub height: f64,
    pub weight: f64,
}

impl CargoSpec {
    pub fn volume(&self) -> f64 {
        self.length * self.width * self.height
    }

    pub fn is_positive(&self) -> bool {
        [self.length, self.width, self.height, self.weight]
            .iter()
            .all(|value| value.is_finite() && *value > 0.0)
    }
}

/// One entry of a multi-item request submission.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LineItemInput {
    pub service_id: TransportServiceId,
    pub from_city: String,
    pub to_city: String,
    pub length: f64,
    pub width: f64,
    pub height: f64,
    pub weight: f64,
}

impl LineItemInput {
    pub fn route(&self) -> Route {
        Route::new(self.from_city.clone(), self.to_city.clone())
    }

    pub fn cargo(&self) -> CargoSpec {
        CargoSpec { length: self.length, width: self.width, height: self.height, weight: self.weight }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RequestLineItem {
    pub service_id: TransportServiceId,
    pub service_name: String,
    pub quantity: u32,
    pub sort_order: i32,
    pub comment: String,
}

/// Replacement values for one line item of a draft.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItemUpdate {
    pub quantity: u32,
    #[serde(default)]
    pub sort_order: i32,
    #[serde(default)]
    pub comment: String,
}

impl LineItemUpdate {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.quantity == 0 {
            return Err(DomainError::InvariantViolation(
                "quantity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LogisticRequest {
    pub id: LogisticRequestId,
    pub status: RequestStatus,
    pub route: Route,
    pub cargo: CargoSpec,
    pub total_cost: Decimal,
    pub total_days: u32,
    pub creator_id: UserId,
    pub moderator_id: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub formed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub items: Vec<RequestLineItem>,
}

impl LogisticRequest {
    pub fn is_owned_by(&self, user_id: UserId) -> bool {
        self.creator_id == user_id
    }

    pub fn quantity_sum(&self) -> u32 {
        self.items.iter().map(|item| item.quantity).sum()
    }
}

/// Route and cargo a creator supplies when submitting a draft for moderation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub route: Route,
    pub cargo: CargoSpec,
}

impl Submission {
    pub fn validate(&self) -> Result<(), DomainError> {
        if !self.route.is_complete() {
            return Err(DomainError::InvariantViolation(
                "from_city and to_city are required".to_string(),
            ));
        }
        if !self.cargo.is_positive() {
            return Err(DomainError::InvariantViolation(
                "weight, length, width, height must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Partial edit of a draft's route and cargo; unset fields are left untouched.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DraftEdit {
    pub from_city: Option<String>,
    pub to_city: Option<String>,
    pub length: Option<f64>,
    pub width: Option<f64>,
    pub height: Option<f64>,
    pub weight: Option<f64>,
}

impl DraftEdit {
    pub fn apply(&self, route: &mut Route, cargo: &mut CargoSpec) {
        if let Some(from_city) = &self.from_city {
            route.from_city = from_city.trim().to_string();
        }
        if let Some(to_city) = &self.to_city {
            route.to_city = to_city.trim().to_string();
        }
        if let Some(length) = self.length {
            cargo.length = length;
        }
        if let Some(width) = self.width {
            cargo.width = width;
        }
        if let Some(height) = self.height {
            cargo.height = height;
        }
        if let Some(weight) = self.weight {
            cargo.weight = weight;
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestFilter {
    pub status: Option<RequestStatus>,
    pub formed_from: Option<DateTime<Utc>>,
    pub formed_to: Option<DateTime<Utc>>,
    /// Restricts results to one creator; unset for moderators.
    pub creator_id: Option<UserId>,
}
