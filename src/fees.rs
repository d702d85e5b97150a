//! Per-exchange, per-pair fee cache with a time-based staleness policy.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::exchange::{Exchange, ExchangeId, Symbol, TradingFee};
use crate::metrics;
use crate::storage::{read_json, write_json};

/// Cached fee with its fetch time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeCacheEntry {
    /// Maker fee percent.
    pub maker: Decimal,
    /// Taker fee percent.
    pub taker: Decimal,
    /// When the fee was fetched.
    pub updated_at: DateTime<Utc>,
}

impl FeeCacheEntry {
    fn fee(&self) -> TradingFee {
        TradingFee {
            maker_pct: self.maker,
            taker_pct: self.taker,
        }
    }
}

/// Fee cache backed by `fees_cache.json`.
#[derive(Debug)]
pub struct FeeCache {
    path: PathBuf,
    ttl: Duration,
    default_pct: Decimal,
    entries: HashMap<String, FeeCacheEntry>,
}

impl FeeCache {
    /// Load the cache. A missing or unreadable file starts an empty cache.
    pub async fn load(path: impl AsRef<Path>, ttl: Duration, default_pct: Decimal) -> Self {
        let path = path.as_ref().to_path_buf();
        let entries = match read_json(&path).await {
            Ok(entries) => entries.unwrap_or_default(),
            Err(e) => {
                warn!(error = %e, "Ignoring unreadable fee cache");
                HashMap::new()
            }
        };
        Self {
            path,
            ttl,
            default_pct,
            entries,
        }
    }

    /// Cache key, e.g. `binance:BTC/USDT`.
    pub fn key(exchange: ExchangeId, symbol: &Symbol) -> String {
        format!("{}:{}", exchange, symbol)
    }

    /// Whether an entry fetched at `updated_at` is still usable at `now`.
    pub fn is_fresh(&self, updated_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(updated_at) < self.ttl
    }

    /// Cached entry regardless of freshness.
    #[cfg(test)]
    pub(crate) fn cached(&self, exchange: ExchangeId, symbol: &Symbol) -> Option<&FeeCacheEntry> {
        self.entries.get(&Self::key(exchange, symbol))
    }

    /// Fee used when a lookup fails.
    pub fn default_fee(&self) -> TradingFee {
        TradingFee::flat(self.default_pct)
    }

    /// Fee for a pair on an exchange, fetching when missing or stale.
    pub async fn get(&mut self, exchange: &dyn Exchange, symbol: &Symbol) -> TradingFee {
        self.get_at(exchange, symbol, Utc::now()).await
    }

    /// [`FeeCache::get`] with an explicit clock.
    pub async fn get_at(
        &mut self,
        exchange: &dyn Exchange,
        symbol: &Symbol,
        now: DateTime<Utc>,
    ) -> TradingFee {
        let id = exchange.id();
        let key = Self::key(id, symbol);

        if let Some(entry) = self.entries.get(&key) {
            if self.is_fresh(entry.updated_at, now) {
                debug!(key = %key, "Fee cache hit");
                return entry.fee();
            }
        }

        match exchange.fetch_trading_fee(symbol).await {
            Ok(fee) => {
                info!(
                    exchange = %id,
                    symbol = %symbol,
                    maker_pct = %fee.maker_pct,
                    taker_pct = %fee.taker_pct,
                    "Fetched trading fee"
                );
                self.entries.insert(
                    key,
                    FeeCacheEntry {
                        maker: fee.maker_pct,
                        taker: fee.taker_pct,
                        updated_at: now,
                    },
                );
                if let Err(e) = write_json(&self.path, &self.entries).await {
                    warn!(error = %e, "Failed to persist fee cache");
                }
                fee
            }
            Err(e) => {
                warn!(
                    exchange = %id,
                    symbol = %symbol,
                    error = %e,
                    default_pct = %self.default_pct,
                    "Fee lookup failed, using default"
                );
                metrics::inc_fee_fallbacks(id);
                self.default_fee()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::{MockConfig, MockExchange};
    use rust_decimal_macros::dec;

    fn symbol() -> Symbol {
        Symbol::new("BTC", "USDT")
    }

    async fn cache(dir: &tempfile::TempDir) -> FeeCache {
        FeeCache::load(dir.path().join("fees_cache.json"), Duration::hours(24), dec!(0.1)).await
    }

    #[tokio::test]
    async fn fresh_entry_is_served_from_cache() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = cache(&dir).await;
        let mock = MockExchange::new(ExchangeId::Binance);
        mock.set_fees(TradingFee {
            maker_pct: dec!(0.08),
            taker_pct: dec!(0.09),
        });

        let now = Utc::now();
        let first = cache.get_at(&mock, &symbol(), now).await;
        let second = cache
            .get_at(&mock, &symbol(), now + Duration::hours(23))
            .await;

        assert_eq!(first.taker_pct, dec!(0.09));
        assert_eq!(second, first);
        assert_eq!(mock.fee_calls(), 1);
    }

    #[tokio::test]
    async fn stale_entry_is_refetched() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = cache(&dir).await;
        let mock = MockExchange::new(ExchangeId::Okx);
        mock.set_fees(TradingFee::flat(dec!(0.1)));

        let now = Utc::now();
        cache.get_at(&mock, &symbol(), now).await;
        mock.set_fees(TradingFee::flat(dec!(0.05)));
        let refreshed = cache
            .get_at(&mock, &symbol(), now + Duration::hours(24))
            .await;

        assert_eq!(refreshed.taker_pct, dec!(0.05));
        assert_eq!(mock.fee_calls(), 2);
    }

    #[tokio::test]
    async fn failed_lookup_uses_default_and_is_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = cache(&dir).await;
        let mock = MockExchange::with_config(
            ExchangeId::Mexc,
            MockConfig {
                fail_fees: true,
                ..MockConfig::default()
            },
        );

        let fee = cache.get(&mock, &symbol()).await;

        assert_eq!(fee, TradingFee::flat(dec!(0.1)));
        assert!(cache.cached(ExchangeId::Mexc, &symbol()).is_none());
        cache.get(&mock, &symbol()).await;
        assert_eq!(mock.fee_calls(), 2);
    }

    #[tokio::test]
    async fn entries_persist_across_loads() {
        let dir = tempfile::tempdir().unwrap();
        let mock = MockExchange::new(ExchangeId::Bybit);
        mock.set_fees(TradingFee::flat(dec!(0.1)));
        {
            let mut cache = cache(&dir).await;
            cache.get(&mock, &symbol()).await;
        }

        let mut reloaded = cache(&dir).await;
        let entry = reloaded.cached(ExchangeId::Bybit, &symbol()).unwrap();
        assert_eq!(entry.taker, dec!(0.1));

        reloaded.get(&mock, &symbol()).await;
        assert_eq!(mock.fee_calls(), 1);
    }

    #[test]
    fn key_format() {
        assert_eq!(FeeCache::key(ExchangeId::Binance, &symbol()), "binance:BTC/USDT");
    }
}
