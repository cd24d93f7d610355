use std::str::FromStr;

use clap::Args;
use freightdesk_core::chrono::Utc;
use freightdesk_core::config::{AppConfig, LoadOptions};
use freightdesk_core::domain::logistic_request::{CargoSpec, Route};
use freightdesk_core::domain::transport_service::{RateCard, TransportService, TransportServiceId};
use freightdesk_core::{DeliveryCalculator, DeliveryQuote, QuotingSettings};
use rust_decimal::Decimal;

use crate::commands::CommandResult;

#[derive(Debug, Clone, Args)]
pub struct QuoteArgs {
    #[arg(long, help = "Origin city")]
    pub from: String,
    #[arg(long, help = "Destination city")]
    pub to: String,
    #[arg(long, help = "Service base price, decimal")]
    pub base_price: String,
    #[arg(long, default_value_t = 1, help = "Service base transit days")]
    pub base_days: u32,
    #[arg(long, default_value_t = 1.0, help = "Cargo length in metres")]
    pub length: f64,
    #[arg(long, default_value_t = 1.0, help = "Cargo width in metres")]
    pub width: f64,
    #[arg(long, default_value_t = 1.0, help = "Cargo height in metres")]
    pub height: f64,
    #[arg(long, help = "Cargo weight in kilograms")]
    pub weight: f64,
    #[arg(long, help = "Override the volume rate (per m3)")]
    pub volume_rate: Option<String>,
    #[arg(long, help = "Override the weight rate (per kg)")]
    pub weight_rate: Option<String>,
    #[arg(long, help = "Override the distance rate (per km)")]
    pub distance_rate: Option<String>,
}

pub fn run(args: &QuoteArgs) -> CommandResult {
    let service = match ad_hoc_service(args) {
        Ok(service) => service,
        Err(message) => return CommandResult::failure("quote", "argument", message, 2),
    };

    let calculator = DeliveryCalculator::with_settings(quoting_settings());
    let route = Route::new(args.from.clone(), args.to.clone());
    let cargo =
        CargoSpec { length: args.length, width: args.width, height: args.height, weight: args.weight };

    let quote = calculator.calculate(Some(&service), &route, &cargo);
    if !quote.is_valid {
        let message = quote.error_message.unwrap_or_else(|| "quote is invalid".to_string());
        return CommandResult::failure("quote", "quote_invalid", message, 7);
    }

    CommandResult::success("quote", render_quote(&route, &quote))
}

/// Quoting tunables come from config when it loads; otherwise the calculator defaults apply,
/// so an offline quote works without a signing secret or database.
fn quoting_settings() -> QuotingSettings {
    AppConfig::load(LoadOptions::default())
        .map(|config| QuotingSettings::from(&config.quoting))
        .unwrap_or_default()
}

fn parse_money(field: &str, value: &str) -> Result<Decimal, String> {
    let amount = Decimal::from_str(value.trim())
        .map_err(|_| format!("{field} must be a decimal number, got `{value}`"))?;
    if amount.is_sign_negative() {
        return Err(format!("{field} must not be negative"));
    }
    Ok(amount)
}

fn ad_hoc_service(args: &QuoteArgs) -> Result<TransportService, String> {
    let defaults = RateCard::default();
    let rate = |field: &str, value: Option<&String>, fallback: Decimal| {
        value.map_or(Ok(fallback), |value| parse_money(field, value))
    };

    Ok(TransportService {
        id: TransportServiceId(0),
        name: "ad-hoc".to_string(),
        description: String::new(),
        base_price: parse_money("base_price", &args.base_price)?,
        base_days: args.base_days,
        rates: RateCard {
            volume_rate: rate("volume_rate", args.volume_rate.as_ref(), defaults.volume_rate)?,
            weight_rate: rate("weight_rate", args.weight_rate.as_ref(), defaults.weight_rate)?,
            distance_rate: rate(
                "distance_rate",
                args.distance_rate.as_ref(),
                defaults.distance_rate,
            )?,
        },
        image_url: None,
        created_at: Utc::now(),
        deleted_at: None,
    })
}

fn render_quote(route: &Route, quote: &DeliveryQuote) -> String {
    format!(
        "{} -> {}: {} over {} days ({:.1} km, {:.3} m3)",
        route.from_city,
        route.to_city,
        quote.total_cost,
        quote.delivery_days,
        quote.distance_km,
        quote.volume_m3,
    )
}
