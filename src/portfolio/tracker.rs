//! Position baseline and current holdings, persisted in `positions.json`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::StorageError;
use crate::exchange::{Balances, ExchangeId};
use crate::storage::{read_json, write_json, RiskLimits, TradeRecord};

use super::drift::{calculate_drift, DriftReport, Holdings};

/// On-disk form of the tracker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionSnapshot {
    /// Holdings captured the first time each exchange was refreshed.
    #[serde(default)]
    pub initial_balances: BTreeMap<ExchangeId, Holdings>,
    /// Latest known holdings.
    #[serde(default)]
    pub current_positions: BTreeMap<ExchangeId, Holdings>,
    /// Last change.
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

/// Tracks free balances per exchange against a baseline.
#[derive(Debug)]
pub struct PositionTracker {
    path: PathBuf,
    snapshot: PositionSnapshot,
}

impl PositionTracker {
    /// Load the tracker. A missing or unreadable file starts empty.
    pub async fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let snapshot = match read_json(&path).await {
            Ok(snapshot) => snapshot.unwrap_or_default(),
            Err(e) => {
                warn!(error = %e, "Ignoring unreadable positions file");
                PositionSnapshot::default()
            }
        };
        Self { path, snapshot }
    }

    /// Current state.
    pub(crate) fn snapshot(&self) -> &PositionSnapshot {
        &self.snapshot
    }

    /// Whether any baseline has been captured.
    pub fn has_baseline(&self) -> bool {
        !self.snapshot.initial_balances.is_empty()
    }

    /// Replace current holdings with freshly fetched balances. Exchanges seen
    /// for the first time also get their baseline.
    pub async fn refresh_from(&mut self, balances: &[Balances]) -> Result<(), StorageError> {
        for balance in balances {
            let holdings: Holdings = balance
                .non_zero()
                .map(|(asset, b)| (asset.clone(), b.free))
                .collect();
            if !self.snapshot.initial_balances.contains_key(&balance.exchange) {
                info!(exchange = %balance.exchange, "Captured position baseline");
                self.snapshot
                    .initial_balances
                    .insert(balance.exchange, holdings.clone());
            }
            self.snapshot
                .current_positions
                .insert(balance.exchange, holdings);
        }
        self.save().await
    }

    /// Adjust current holdings for an executed trade.
    pub async fn apply_trade(&mut self, record: &TradeRecord) -> Result<(), StorageError> {
        let base = &record.pair.base;
        let quote = &record.pair.quote;

        if let Some(holdings) = self.snapshot.current_positions.get_mut(&record.buy.exchange) {
            adjust(holdings, quote, -(record.buy.price * record.buy.quantity));
            adjust(holdings, base, record.buy.quantity);
        }
        if let Some(sell) = &record.sell {
            if let Some(holdings) = self.snapshot.current_positions.get_mut(&sell.exchange) {
                adjust(holdings, base, -sell.quantity);
                adjust(holdings, quote, sell.price * sell.quantity);
            }
        }

        self.save().await?;
        info!(trade_id = %record.trade_id, "Positions updated after trade");
        Ok(())
    }

    /// Take the current holdings as the new baseline.
    pub async fn reset_baseline(&mut self) -> Result<(), StorageError> {
        self.snapshot.initial_balances = self.snapshot.current_positions.clone();
        self.save().await?;
        info!("Position baseline reset");
        Ok(())
    }

    /// Drop an exchange from tracking.
    pub async fn forget(&mut self, exchange: ExchangeId) -> Result<(), StorageError> {
        let had_current = self.snapshot.current_positions.remove(&exchange).is_some();
        let had_initial = self.snapshot.initial_balances.remove(&exchange).is_some();
        if had_current || had_initial {
            self.save().await?;
        }
        Ok(())
    }

    /// Drift against the baseline, valued in `value_asset`.
    pub fn drift(&self, value_asset: &str, limits: &RiskLimits) -> DriftReport {
        calculate_drift(
            &self.snapshot.current_positions,
            &self.snapshot.initial_balances,
            value_asset,
            limits,
        )
    }

    async fn save(&mut self) -> Result<(), StorageError> {
        self.snapshot.last_updated = Some(Utc::now());
        write_json(&self.path, &self.snapshot).await
    }
}

fn adjust(holdings: &mut Holdings, asset: &str, delta: Decimal) {
    *holdings.entry(asset.to_string()).or_insert(Decimal::ZERO) += delta;
}
