//! Arbitrage module for detecting and executing opportunities.
//!
//! This module handles:
//! - Spread detection across exchange quotes
//! - Profit and fee calculations
//! - Risk limit validation
//! - The pre-trade checklist and order placement

pub mod calculator;
pub mod detector;
pub mod executor;
pub mod risk;

pub use calculator::{estimate_profit, spread_percent, ProfitEstimate};
pub use detector::{
    best_spread, price_candidate, scan, Opportunity, RejectedOpportunity, ScanReport,
    SkipReason, SpreadCandidate,
};
pub use executor::{AbortReason, ExecutionResult, ExecutorStats, TradeExecutor};
pub use risk::{validate_opportunity, RiskViolation};
