use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::config::QuotingConfig;
use crate::domain::logistic_request::{CargoSpec, Route};
use crate::domain::transport_service::TransportService;
use crate::quoting::distance::DistanceTable;

/// Tunables for distance fallback and transit-time growth.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuotingSettings {
    pub default_distance_km: f64,
    pub km_per_transit_day: f64,
    pub kg_per_extra_day: f64,
}

impl Default for QuotingSettings {
    fn default() -> Self {
        Self { default_distance_km: 500.0, km_per_transit_day: 500.0, kg_per_extra_day: 1000.0 }
    }
}

impl From<&QuotingConfig> for QuotingSettings {
    fn from(value: &QuotingConfig) -> Self {
        Self {
            default_distance_km: value.default_distance_km,
            km_per_transit_day: value.km_per_transit_day,
            kg_per_extra_day: value.kg_per_extra_day,
        }
    }
}

/// Result of quoting one service for one shipment. Never persisted.
///
/// An invalid quote carries zeroed numbers and a human-readable
/// `error_message`; callers decide whether that aborts their operation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeliveryQuote {
    pub delivery_days: u32,
    pub total_cost: Decimal,
    pub distance_km: f64,
    pub volume_m3: f64,
    pub is_valid: bool,
    pub error_message: Option<String>,
}

impl DeliveryQuote {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self {
            delivery_days: 0,
            total_cost: Decimal::ZERO,
            distance_km: 0.0,
            volume_m3: 0.0,
            is_valid: false,
            error_message: Some(message.into()),
        }
    }
}

#[derive(Clone, Debug)]
pub struct DeliveryCalculator {
    table: Arc<DistanceTable>,
    settings: QuotingSettings,
}

impl Default for DeliveryCalculator {
    fn default() -> Self {
        Self::new(DistanceTable::standard(), QuotingSettings::default())
    }
}

impl DeliveryCalculator {
    pub fn new(table: Arc<DistanceTable>, settings: QuotingSettings) -> Self {
        Self { table, settings }
    }

    pub fn with_settings(settings: QuotingSettings) -> Self {
        Self::new(DistanceTable::standard(), settings)
    }

    pub fn settings(&self) -> QuotingSettings {
        self.settings
    }

    pub fn distance_km(&self, route: &Route) -> f64 {
        self.table.distance_or(&route.from_city, &route.to_city, self.settings.default_distance_km)
    }

    /// Prices `cargo` moved along `route` by `service`.
    ///
    /// cost = base_price + volume_rate*volume + weight_rate*weight + distance_rate*distance,
    /// rounded to two decimal places.
    /// days = base_days + floor(weight / kg_per_extra_day) + floor(distance / km_per_transit_day).
    pub fn calculate(
        &self,
        service: Option<&TransportService>,
        route: &Route,
        cargo: &CargoSpec,
    ) -> DeliveryQuote {
        let Some(service) = service else {
            return DeliveryQuote::invalid("transport service not found");
        };
        if let Some(message) = validate_inputs(route, cargo) {
            return DeliveryQuote::invalid(message);
        }

        let distance_km = self.distance_km(route);
        let volume_m3 = cargo.volume();

        let Some(total_cost) = compute_cost(service, volume_m3, cargo.weight, distance_km) else {
            return DeliveryQuote::invalid("cargo parameters are out of the supported range");
        };

        let weight_days = (cargo.weight / self.settings.kg_per_extra_day).floor() as u32;
        let distance_days = (distance_km / self.settings.km_per_transit_day).floor() as u32;
        let delivery_days =
            service.base_days.saturating_add(weight_days).saturating_add(distance_days);

        DeliveryQuote {
            delivery_days,
            total_cost,
            distance_km,
            volume_m3,
            is_valid: true,
            error_message: None,
        }
    }
}

fn validate_inputs(route: &Route, cargo: &CargoSpec) -> Option<String> {
    if route.from_city.trim().is_empty() || route.to_city.trim().is_empty() {
        return Some("origin and destination cities are required".to_string());
    }
    let dimensions =
        [("length", cargo.length), ("width", cargo.width), ("height", cargo.height)];
    for (name, value) in dimensions {
        if !value.is_finite() || value <= 0.0 {
            return Some(format!("{name} must be greater than 0"));
        }
    }
    if !cargo.weight.is_finite() || cargo.weight <= 0.0 {
        return Some("weight must be greater than 0".to_string());
    }
    None
}

fn compute_cost(
    service: &TransportService,
    volume_m3: f64,
    weight_kg: f64,
    distance_km: f64,
) -> Option<Decimal> {
    let volume = Decimal::try_from(volume_m3).ok()?;
    let weight = Decimal::try_from(weight_kg).ok()?;
    let distance = Decimal::try_from(distance_km).ok()?;
    let rates = &service.rates;

    let cost = service
        .base_price
        .checked_add(rates.volume_rate.checked_mul(volume)?)?
        .checked_add(rates.weight_rate.checked_mul(weight)?)?
        .checked_add(rates.distance_rate.checked_mul(distance)?)?;

    // Money always carries two decimal places, including whole amounts.
    let mut cost = cost.round_dp(2);
    cost.rescale(2);
    Some(cost)
}
