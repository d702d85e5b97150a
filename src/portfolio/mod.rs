//! Inventory tracking across exchanges.

pub mod drift;
pub mod tracker;

pub use drift::{calculate_drift, DriftReport, ExchangeDrift, Holdings, RebalanceSuggestion};
pub use tracker::{PositionSnapshot, PositionTracker};
