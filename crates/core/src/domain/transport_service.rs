use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransportServiceId(pub i64);

/// Per-unit surcharges applied on top of a service's base price.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateCard {
    /// Currency per cubic metre of cargo.
    pub volume_rate: Decimal,
    /// Currency per kilogram of cargo.
    pub weight_rate: Decimal,
    /// Currency per kilometre of route.
    pub distance_rate: Decimal,
}

impl Default for RateCard {
    fn default() -> Self {
        Self {
            volume_rate: Decimal::new(50, 0),
            weight_rate: Decimal::new(2, 0),
            distance_rate: Decimal::new(2, 0),
        }
    }
}

impl RateCard {
    pub fn validate(&self) -> Result<(), DomainError> {
        let rates = [
            ("volume_rate", self.volume_rate),
            ("weight_rate", self.weight_rate),
            ("distance_rate", self.distance_rate),
        ];
        for (name, rate) in rates {
            if rate.is_sign_negative() {
                return Err(DomainError::InvariantViolation(format!(
                    "{name} must not be negative"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransportService {
    pub id: TransportServiceId,
    pub name: String,
    pub description: String,
    pub base_price: Decimal,
    pub base_days: u32,
    pub rates: RateCard,
    pub image_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl TransportService {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Editable fields of a transport service, used for both create and update.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransportServiceDraft {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub base_price: Decimal,
    pub base_days: u32,
    #[serde(default)]
    pub rates: RateCard,
    #[serde(default)]
    pub image_url: Option<String>,
}

impl TransportServiceDraft {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.name.trim().is_empty() {
            return Err(DomainError::InvariantViolation(
                "transport service name is required".to_string(),
            ));
        }
        if self.base_price.is_sign_negative() {
            return Err(DomainError::InvariantViolation(
                "base_price must not be negative".to_string(),
            ));
        }
        self.rates.validate()
    }
}

/// Catalog search criteria. Every field is optional and they combine with AND.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceFilter {
    pub search: Option<String>,
    pub min_price: Option<Decimal>,
    pub max_price: Option<Decimal>,
    pub created_from: Option<DateTime<Utc>>,
    pub created_to: Option<DateTime<Utc>>,
}
