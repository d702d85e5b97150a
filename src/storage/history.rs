//! Append-only trade log in `trades.json`.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum::Display;
use tracing::info;

use crate::error::StorageError;
use crate::exchange::{ExchangeId, Symbol};

use super::{read_json, write_json};

/// Final state of an executed trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TradeStatus {
    /// Both legs were placed.
    Completed,
    /// The buy leg was placed and the sell leg failed.
    BuyOnly,
}

/// One side of an executed trade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeLeg {
    /// Exchange the order went to.
    pub exchange: ExchangeId,
    /// Exchange order id.
    pub order_id: String,
    /// Fill price (average if reported, else the quoted price).
    pub price: Decimal,
    /// Base quantity.
    pub quantity: Decimal,
}

/// Immutable record of one executed arbitrage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeRecord {
    /// `trade_YYYYMMDD_HHMMSSmmm`.
    pub trade_id: String,
    /// Execution time.
    pub timestamp: DateTime<Utc>,
    /// Traded pair.
    pub pair: Symbol,
    /// Base quantity on both legs.
    pub quantity: Decimal,
    /// Quote amount allotted to the buy leg.
    pub trade_amount: Decimal,
    /// Buy leg.
    pub buy: TradeLeg,
    /// Sell leg, absent when only the buy went through.
    pub sell: Option<TradeLeg>,
    /// Net profit estimated right before placing orders.
    pub estimated_net_profit: Decimal,
    /// ROI percent estimated right before placing orders.
    pub estimated_roi_pct: Decimal,
    /// Why the sell leg failed, for one-legged trades.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Outcome.
    pub status: TradeStatus,
}

impl TradeRecord {
    /// Id derived from the execution time.
    pub fn id_for(timestamp: DateTime<Utc>) -> String {
        format!("trade_{}", timestamp.format("%Y%m%d_%H%M%S%3f"))
    }
}

/// Trade log file.
#[derive(Debug, Clone)]
pub struct TradeHistory {
    path: PathBuf,
}

impl TradeHistory {
    /// Trade log at `path`.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Every record, oldest first.
    pub async fn load_all(&self) -> Result<Vec<TradeRecord>, StorageError> {
        Ok(read_json(&self.path).await?.unwrap_or_default())
    }

    /// Append a record.
    pub async fn append(&self, record: &TradeRecord) -> Result<(), StorageError> {
        let mut records = self.load_all().await?;
        records.push(record.clone());
        write_json(&self.path, &records).await?;

        info!(trade_id = %record.trade_id, status = %record.status, "Recorded trade");
        Ok(())
    }

    /// The `limit` most recent records, newest first.
    pub async fn recent(&self, limit: usize) -> Result<Vec<TradeRecord>, StorageError> {
        let records = self.load_all().await?;
        Ok(records.into_iter().rev().take(limit).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn record(id: &str, status: TradeStatus) -> TradeRecord {
        TradeRecord {
            trade_id: id.to_string(),
            timestamp: Utc::now(),
            pair: Symbol::new("BTC", "USDT"),
            quantity: dec!(0.001),
            trade_amount: dec!(100),
            buy: TradeLeg {
                exchange: ExchangeId::Binance,
                order_id: "1".to_string(),
                price: dec!(100000),
                quantity: dec!(0.001),
            },
            sell: None,
            estimated_net_profit: dec!(0.5),
            estimated_roi_pct: dec!(0.5),
            error: Some("sell failed".to_string()),
            status,
        }
    }

    #[test]
    fn trade_id_format() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        assert_eq!(TradeRecord::id_for(ts), "trade_20240309_140507000");
    }

    #[test]
    fn status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&TradeStatus::BuyOnly).unwrap(),
            "\"buy_only\""
        );
        assert_eq!(TradeStatus::Completed.to_string(), "completed");
    }

    #[tokio::test]
    async fn append_keeps_order_and_recent_reverses() {
        let dir = tempfile::tempdir().unwrap();
        let history = TradeHistory::new(dir.path().join("trades.json"));

        assert!(history.load_all().await.unwrap().is_empty());

        history.append(&record("a", TradeStatus::Completed)).await.unwrap();
        history.append(&record("b", TradeStatus::BuyOnly)).await.unwrap();
        history.append(&record("c", TradeStatus::Completed)).await.unwrap();

        let all = history.load_all().await.unwrap();
        assert_eq!(
            all.iter().map(|r| r.trade_id.as_str()).collect::<Vec<_>>(),
            vec!["a", "b", "c"]
        );

        let recent = history.recent(2).await.unwrap();
        assert_eq!(recent[0].trade_id, "c");
        assert_eq!(recent[1].trade_id, "b");
        assert_eq!(recent[1].status, TradeStatus::BuyOnly);
    }
}
