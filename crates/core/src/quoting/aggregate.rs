use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::logistic_request::CargoSpec;
use crate::errors::DomainError;
use crate::quoting::calculator::DeliveryQuote;

fn out_of_range() -> DomainError {
    DomainError::InvariantViolation("request total exceeds the supported range".to_string())
}

/// Request-level totals derived from line-item quotes.
///
/// Cost is summed, transit time is the slowest item, cargo dimensions and
/// weight are summed. Folding fails when the summed cost leaves the `Decimal`
/// range.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestTotals {
    pub total_cost: Decimal,
    pub total_days: u32,
    pub cargo: CargoSpec,
}

impl RequestTotals {
    /// Folds one quote per submitted line item, each carrying its own cargo.
    pub fn from_quotes<'a>(
        lines: impl IntoIterator<Item = (&'a CargoSpec, &'a DeliveryQuote)>,
    ) -> Result<Self, DomainError> {
        lines.into_iter().try_fold(Self::default(), |mut totals, (cargo, quote)| {
            totals.total_cost =
                totals.total_cost.checked_add(quote.total_cost).ok_or_else(out_of_range)?;
            totals.total_days = totals.total_days.max(quote.delivery_days);
            totals.cargo.length += cargo.length;
            totals.cargo.width += cargo.width;
            totals.cargo.height += cargo.height;
            totals.cargo.weight += cargo.weight;
            Ok(totals)
        })
    }

    /// Recomputes totals for a request whose cargo is fixed and whose line
    /// items carry quantities: cost is weighted by quantity.
    pub fn for_cargo<'a>(
        cargo: CargoSpec,
        lines: impl IntoIterator<Item = (u32, &'a DeliveryQuote)>,
    ) -> Result<Self, DomainError> {
        lines.into_iter().try_fold(
            Self { cargo, total_cost: Decimal::new(0, 2), ..Self::default() },
            |mut totals, (quantity, quote)| {
                let line_cost = quote
                    .total_cost
                    .checked_mul(Decimal::from(quantity))
                    .ok_or_else(out_of_range)?;
                totals.total_cost =
                    totals.total_cost.checked_add(line_cost).ok_or_else(out_of_range)?;
                totals.total_days = totals.total_days.max(quote.delivery_days);
                Ok(totals)
            },
        )
    }
}
