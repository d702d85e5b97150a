//! Inventory drift between the baseline and current positions.
//!
//! Value is measured in a single quote asset (normally USDT). Holdings of
//! other assets are reported per asset but do not contribute to value.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use rust_decimal::Decimal;

use crate::exchange::ExchangeId;
use crate::storage::RiskLimits;

/// Free amount per asset on one exchange.
pub type Holdings = BTreeMap<String, Decimal>;

/// Drift of one exchange's value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeDrift {
    /// Exchange.
    pub exchange: ExchangeId,
    /// Baseline value.
    pub initial_value: Decimal,
    /// Current value.
    pub current_value: Decimal,
    /// Absolute drift in percent, zero without a baseline value.
    pub drift_pct: Decimal,
}

/// A suggested manual transfer to bring an exchange back to its baseline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RebalanceSuggestion {
    /// The exchange holds more than its baseline.
    Withdraw {
        /// Exchange.
        exchange: ExchangeId,
        /// Value above baseline.
        excess: Decimal,
        /// Drift percent.
        drift_pct: Decimal,
    },
    /// The exchange holds less than its baseline.
    Deposit {
        /// Exchange.
        exchange: ExchangeId,
        /// Value below baseline.
        deficit: Decimal,
        /// Drift percent.
        drift_pct: Decimal,
    },
}

impl fmt::Display for RebalanceSuggestion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RebalanceSuggestion::Withdraw {
                exchange,
                excess,
                drift_pct,
            } => write!(
                f,
                "{}: excess +{} ({}% drift), consider withdrawing",
                exchange,
                excess.round_dp(2),
                drift_pct.round_dp(1)
            ),
            RebalanceSuggestion::Deposit {
                exchange,
                deficit,
                drift_pct,
            } => write!(
                f,
                "{}: deficit -{} ({}% drift), consider depositing",
                exchange,
                deficit.round_dp(2),
                drift_pct.round_dp(1)
            ),
        }
    }
}

/// Drift summary across every tracked exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriftReport {
    /// Asset value is measured in.
    pub value_asset: String,
    /// Total baseline value.
    pub total_initial: Decimal,
    /// Total current value.
    pub total_current: Decimal,
    /// Absolute drift of the total, in percent.
    pub overall_pct: Decimal,
    /// Per-exchange drift in exchange order.
    pub by_exchange: Vec<ExchangeDrift>,
    /// Per-asset drift of the amount held across all exchanges.
    pub by_asset: BTreeMap<String, Decimal>,
    /// Overall or some exchange drift is above its limit.
    pub needs_rebalancing: bool,
    /// Transfers for exchanges above the per-exchange limit, largest drift first.
    pub suggestions: Vec<RebalanceSuggestion>,
}

fn drift_pct(initial: Decimal, current: Decimal) -> Decimal {
    if initial > Decimal::ZERO {
        ((current - initial) / initial * Decimal::ONE_HUNDRED)
            .abs()
            .round_dp(2)
    } else {
        Decimal::ZERO
    }
}

fn value_of(holdings: Option<&Holdings>, value_asset: &str) -> Decimal {
    holdings
        .and_then(|h| h.get(value_asset))
        .copied()
        .unwrap_or(Decimal::ZERO)
}

/// Compare current holdings with the baseline.
pub fn calculate_drift(
    current: &BTreeMap<ExchangeId, Holdings>,
    initial: &BTreeMap<ExchangeId, Holdings>,
    value_asset: &str,
    limits: &RiskLimits,
) -> DriftReport {
    let by_exchange: Vec<ExchangeDrift> = current
        .iter()
        .map(|(exchange, holdings)| {
            let initial_value = value_of(initial.get(exchange), value_asset);
            let current_value = value_of(Some(holdings), value_asset);
            ExchangeDrift {
                exchange: *exchange,
                initial_value,
                current_value,
                drift_pct: drift_pct(initial_value, current_value),
            }
        })
        .collect();

    let total_initial: Decimal = by_exchange.iter().map(|d| d.initial_value).sum();
    let total_current: Decimal = by_exchange.iter().map(|d| d.current_value).sum();
    let overall_pct = drift_pct(total_initial, total_current);

    let assets: BTreeSet<&String> = current
        .values()
        .chain(initial.values())
        .flat_map(|h| h.keys())
        .collect();
    let by_asset = assets
        .into_iter()
        .map(|asset| {
            let sum = |side: &BTreeMap<ExchangeId, Holdings>| -> Decimal {
                side.values()
                    .filter_map(|h| h.get(asset))
                    .copied()
                    .sum()
            };
            (asset.clone(), drift_pct(sum(initial), sum(current)))
        })
        .collect();

    let needs_rebalancing = overall_pct > limits.max_inventory_drift_percent
        || by_exchange
            .iter()
            .any(|d| d.drift_pct > limits.max_per_exchange_drift_percent);

    let mut suggestions = Vec::new();
    if needs_rebalancing {
        let mut over: Vec<&ExchangeDrift> = by_exchange
            .iter()
            .filter(|d| d.drift_pct > limits.max_per_exchange_drift_percent)
            .collect();
        over.sort_by(|a, b| b.drift_pct.cmp(&a.drift_pct));
        suggestions = over
            .into_iter()
            .map(|d| {
                if d.current_value > d.initial_value {
                    RebalanceSuggestion::Withdraw {
                        exchange: d.exchange,
                        excess: d.current_value - d.initial_value,
                        drift_pct: d.drift_pct,
                    }
                } else {
                    RebalanceSuggestion::Deposit {
                        exchange: d.exchange,
                        deficit: d.initial_value - d.current_value,
                        drift_pct: d.drift_pct,
                    }
                }
            })
            .collect();
    }

    DriftReport {
        value_asset: value_asset.to_string(),
        total_initial,
        total_current,
        overall_pct,
        by_exchange,
        by_asset,
        needs_rebalancing,
        suggestions,
    }
}
