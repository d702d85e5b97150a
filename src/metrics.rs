//! Prometheus metrics for scans, trades and exchange latency.
//!
//! This module provides metrics for:
//! - Exchange request latency per exchange and operation
//! - Scan duration and opportunity counts
//! - Order and trade outcomes
//! - Chat commands handled

use std::time::Instant;

use metrics::{counter, describe_counter, describe_histogram, histogram};
use tracing::debug;

use crate::exchange::{ExchangeId, OrderSide};

// === Metric Name Constants ===

/// Exchange request latency metric name.
pub const METRIC_EXCHANGE_REQUEST_LATENCY: &str = "exchange_request_latency_ms";
/// Full scan latency metric name.
pub const METRIC_SCAN_LATENCY: &str = "scan_latency_ms";
/// Order submission latency metric name.
pub const METRIC_ORDER_SUBMIT_LATENCY: &str = "order_submit_latency_ms";
/// Scans run counter metric name.
pub const METRIC_SCANS: &str = "scans_total";
/// Opportunities detected counter metric name.
pub const METRIC_OPPORTUNITIES_DETECTED: &str = "opportunities_detected_total";
/// Opportunities rejected by risk checks counter metric name.
pub const METRIC_OPPORTUNITIES_REJECTED: &str = "opportunities_rejected_total";
/// Orders submitted counter metric name.
pub const METRIC_ORDERS_SUBMITTED: &str = "orders_submitted_total";
/// Orders failed counter metric name.
pub const METRIC_ORDERS_FAILED: &str = "orders_failed_total";
/// Trades executed counter metric name.
pub const METRIC_TRADES_EXECUTED: &str = "trades_executed_total";
/// Trades aborted by the pre-trade checklist counter metric name.
pub const METRIC_TRADES_ABORTED: &str = "trades_aborted_total";
/// Fee lookups falling back to the default counter metric name.
pub const METRIC_FEE_FALLBACKS: &str = "fee_fallbacks_total";
/// Chat commands handled counter metric name.
pub const METRIC_COMMANDS: &str = "commands_total";

/// Initialize all metric descriptions.
/// Call this once at startup to register metrics with descriptions.
pub fn init_metrics() {
    describe_histogram!(
        METRIC_EXCHANGE_REQUEST_LATENCY,
        "Exchange REST request latency in milliseconds"
    );
    describe_histogram!(METRIC_SCAN_LATENCY, "Full opportunity scan latency in milliseconds");
    describe_histogram!(
        METRIC_ORDER_SUBMIT_LATENCY,
        "Order submission latency in milliseconds"
    );

    describe_counter!(METRIC_SCANS, "Total number of scans run");
    describe_counter!(
        METRIC_OPPORTUNITIES_DETECTED,
        "Total number of arbitrage opportunities that passed every check"
    );
    describe_counter!(
        METRIC_OPPORTUNITIES_REJECTED,
        "Total number of spreads rejected by profit or risk checks"
    );
    describe_counter!(METRIC_ORDERS_SUBMITTED, "Total number of orders submitted");
    describe_counter!(METRIC_ORDERS_FAILED, "Total number of orders that failed");
    describe_counter!(METRIC_TRADES_EXECUTED, "Total number of trades executed");
    describe_counter!(
        METRIC_TRADES_ABORTED,
        "Total number of trades aborted before placing orders"
    );
    describe_counter!(
        METRIC_FEE_FALLBACKS,
        "Total number of fee lookups that fell back to the default fee"
    );
    describe_counter!(METRIC_COMMANDS, "Total number of chat commands handled");

    debug!("Metrics initialized");
}

/// Record order submission latency.
pub fn record_order_submit_latency(start: Instant, exchange: ExchangeId, side: OrderSide) {
    let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
    histogram!(
        METRIC_ORDER_SUBMIT_LATENCY,
        "exchange" => exchange.to_string(),
        "side" => side.to_string()
    )
    .record(latency_ms);
}

/// Increment scans counter.
pub fn inc_scans() {
    counter!(METRIC_SCANS).increment(1);
}

/// Increment opportunities detected counter.
pub fn inc_opportunities_detected() {
    counter!(METRIC_OPPORTUNITIES_DETECTED).increment(1);
}

/// Increment opportunities rejected counter.
pub fn inc_opportunities_rejected() {
    counter!(METRIC_OPPORTUNITIES_REJECTED).increment(1);
}

/// Increment order submitted counter.
pub fn inc_orders_submitted(exchange: ExchangeId) {
    counter!(METRIC_ORDERS_SUBMITTED, "exchange" => exchange.to_string()).increment(1);
}

/// Increment orders failed counter.
pub fn inc_orders_failed(exchange: ExchangeId) {
    counter!(METRIC_ORDERS_FAILED, "exchange" => exchange.to_string()).increment(1);
}

/// Increment trades executed counter, labelled by final status.
pub fn inc_trades_executed(status: &str) {
    counter!(METRIC_TRADES_EXECUTED, "status" => status.to_string()).increment(1);
}

/// Increment trades aborted counter.
pub fn inc_trades_aborted(reason: &'static str) {
    counter!(METRIC_TRADES_ABORTED, "reason" => reason).increment(1);
}

/// Increment fee fallback counter.
pub fn inc_fee_fallbacks(exchange: ExchangeId) {
    counter!(METRIC_FEE_FALLBACKS, "exchange" => exchange.to_string()).increment(1);
}

/// Increment commands counter.
pub fn inc_commands(command: &'static str) {
    counter!(METRIC_COMMANDS, "command" => command).increment(1);
}

/// RAII guard for timing operations.
/// Automatically records latency when dropped.
pub struct LatencyTimer {
    start: Instant,
    metric_name: &'static str,
    labels: Vec<(&'static str, String)>,
}

impl LatencyTimer {
    /// Create a new latency timer for the given metric.
    pub fn new(metric_name: &'static str) -> Self {
        Self {
            start: Instant::now(),
            metric_name,
            labels: Vec::new(),
        }
    }

    /// Attach a label recorded with the sample.
    pub fn with_label(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.labels.push((key, value.into()));
        self
    }

    /// Get elapsed time in milliseconds (without recording).
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        let latency_ms = self.elapsed_ms();
        let labels: Vec<metrics::Label> = self
            .labels
            .iter()
            .map(|(k, v)| metrics::Label::new(*k, v.clone()))
            .collect();
        histogram!(self.metric_name, labels).record(latency_ms);
    }
}

/// Create a latency timer for an exchange request.
pub fn timer_exchange_request(exchange: ExchangeId, operation: &'static str) -> LatencyTimer {
    LatencyTimer::new(METRIC_EXCHANGE_REQUEST_LATENCY)
        .with_label("exchange", exchange.to_string())
        .with_label("operation", operation)
}

/// Create a latency timer for a full scan.
pub fn timer_scan() -> LatencyTimer {
    LatencyTimer::new(METRIC_SCAN_LATENCY)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;
    use std::time::Duration;

    #[test]
    fn latency_timer_measures_time() {
        let timer = LatencyTimer::new("test_metric");
        sleep(Duration::from_millis(10));
        let elapsed = timer.elapsed_ms();
        assert!(elapsed >= 9.0); // Allow some tolerance
    }

    #[test]
    fn exchange_timer_carries_labels() {
        let timer = timer_exchange_request(ExchangeId::Okx, "ticker");
        assert_eq!(
            timer.labels,
            vec![
                ("exchange", "okx".to_string()),
                ("operation", "ticker".to_string())
            ]
        );
    }
}
