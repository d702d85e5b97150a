//! Risk limits applied to every priced opportunity.

use std::fmt;

use rust_decimal::Decimal;
use tracing::debug;

use super::calculator::ProfitEstimate;
use crate::exchange::ExchangeId;
use crate::portfolio::DriftReport;
use crate::storage::{RiskLimits, TradeConfig};

/// Why an opportunity was not offered for execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RiskViolation {
    /// Net profit is zero or negative.
    Unprofitable {
        /// Estimated net profit.
        net_profit: Decimal,
    },
    /// Net profit under the configured minimum.
    ProfitBelowMinimum {
        /// Estimated net profit.
        net_profit: Decimal,
        /// Configured minimum.
        minimum: Decimal,
    },
    /// Spread after fees under the minimum.
    NetSpreadBelowMinimum {
        /// Net spread percent.
        net_spread_pct: Decimal,
        /// Configured minimum.
        minimum: Decimal,
    },
    /// Fees take too large a share of gross profit.
    FeeImpactTooHigh {
        /// Fees as percent of gross profit.
        fee_impact_pct: Decimal,
        /// Configured maximum.
        maximum: Decimal,
    },
    /// Trade amount above the position limit.
    TradeTooLarge {
        /// Trade amount.
        trade_amount: Decimal,
        /// Configured maximum.
        maximum: Decimal,
    },
    /// Total inventory drift above its limit.
    OverallDriftTooHigh {
        /// Drift percent.
        drift_pct: Decimal,
        /// Configured maximum.
        maximum: Decimal,
    },
    /// One exchange drifted too far.
    ExchangeDriftTooHigh {
        /// Exchange.
        exchange: ExchangeId,
        /// Drift percent.
        drift_pct: Decimal,
        /// Configured maximum.
        maximum: Decimal,
    },
}

impl fmt::Display for RiskViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskViolation::Unprofitable { net_profit } => {
                write!(f, "not profitable after fees (net {})", net_profit.round_dp(4))
            }
            RiskViolation::ProfitBelowMinimum {
                net_profit,
                minimum,
            } => write!(
                f,
                "net profit {} below minimum {}",
                net_profit.round_dp(2),
                minimum
            ),
            RiskViolation::NetSpreadBelowMinimum {
                net_spread_pct,
                minimum,
            } => write!(
                f,
                "net spread {}% below minimum {}%",
                net_spread_pct.round_dp(3),
                minimum
            ),
            RiskViolation::FeeImpactTooHigh {
                fee_impact_pct,
                maximum,
            } => write!(
                f,
                "fees consume {}% of gross profit (max {}%)",
                fee_impact_pct.round_dp(1),
                maximum
            ),
            RiskViolation::TradeTooLarge {
                trade_amount,
                maximum,
            } => write!(f, "trade amount {} exceeds maximum {}", trade_amount, maximum),
            RiskViolation::OverallDriftTooHigh { drift_pct, maximum } => write!(
                f,
                "overall inventory drift {}% exceeds {}%, rebalance needed",
                drift_pct.round_dp(1),
                maximum
            ),
            RiskViolation::ExchangeDriftTooHigh {
                exchange,
                drift_pct,
                maximum,
            } => write!(
                f,
                "{} drift {}% exceeds {}%",
                exchange,
                drift_pct.round_dp(1),
                maximum
            ),
        }
    }
}

/// Check a priced opportunity against the trade config and risk limits.
/// Drift is only checked when a report is supplied.
pub fn validate_opportunity(
    estimate: &ProfitEstimate,
    trade: &TradeConfig,
    limits: &RiskLimits,
    drift: Option<&DriftReport>,
) -> Vec<RiskViolation> {
    let mut violations = Vec::new();

    if !estimate.is_profitable() {
        violations.push(RiskViolation::Unprofitable {
            net_profit: estimate.net_profit,
        });
    } else if estimate.net_profit < trade.min_profit {
        violations.push(RiskViolation::ProfitBelowMinimum {
            net_profit: estimate.net_profit,
            minimum: trade.min_profit,
        });
    }

    if estimate.net_spread_pct < limits.min_spread_percent_net {
        violations.push(RiskViolation::NetSpreadBelowMinimum {
            net_spread_pct: estimate.net_spread_pct,
            minimum: limits.min_spread_percent_net,
        });
    }

    if let Some(impact) = estimate.fee_impact_pct() {
        if impact > limits.max_fee_impact_percent {
            violations.push(RiskViolation::FeeImpactTooHigh {
                fee_impact_pct: impact,
                maximum: limits.max_fee_impact_percent,
            });
        }
    }

    if estimate.trade_amount > limits.max_position_size_usd {
        violations.push(RiskViolation::TradeTooLarge {
            trade_amount: estimate.trade_amount,
            maximum: limits.max_position_size_usd,
        });
    }

    if let Some(drift) = drift {
        if drift.overall_pct > limits.max_inventory_drift_percent {
            violations.push(RiskViolation::OverallDriftTooHigh {
                drift_pct: drift.overall_pct,
                maximum: limits.max_inventory_drift_percent,
            });
        }
        for exchange in &drift.by_exchange {
            if exchange.drift_pct > limits.max_per_exchange_drift_percent {
                violations.push(RiskViolation::ExchangeDriftTooHigh {
                    exchange: exchange.exchange,
                    drift_pct: exchange.drift_pct,
                    maximum: limits.max_per_exchange_drift_percent,
                });
            }
        }
    }

    if !violations.is_empty() {
        debug!(count = violations.len(), "Opportunity failed risk checks");
    }
    violations
}
