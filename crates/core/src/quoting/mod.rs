//! Delivery quoting: the city distance table, the per-service cost/days
//! calculator and the fold that turns line-item quotes into request totals.

pub mod aggregate;
pub mod calculator;
pub mod distance;
