//! Cross-exchange opportunity detection.

use std::fmt;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use rust_decimal::Decimal;
use tracing::{debug, info, instrument, warn};

use super::calculator::{estimate_profit, spread_percent, ProfitEstimate};
use super::risk::{validate_opportunity, RiskViolation};
use crate::exchange::{ExchangeId, ExchangeManager, Symbol, Ticker, TradingFee};
use crate::fees::FeeCache;
use crate::metrics;
use crate::portfolio::DriftReport;
use crate::storage::Settings;

/// Best buy-low/sell-high combination for one pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpreadCandidate {
    /// Exchange to buy on.
    pub buy_exchange: ExchangeId,
    /// Ask on the buy exchange.
    pub buy_price: Decimal,
    /// Exchange to sell on.
    pub sell_exchange: ExchangeId,
    /// Bid on the sell exchange.
    pub sell_price: Decimal,
    /// Gross spread percent.
    pub spread_pct: Decimal,
}

/// Pick the ordered exchange pair with the widest spread, buying at the ask
/// and selling at the bid. Quotes with a non-positive side are ignored.
pub fn best_spread(tickers: &[Ticker]) -> Option<SpreadCandidate> {
    let valid: Vec<&Ticker> = tickers.iter().filter(|t| t.is_valid()).collect();
    let mut best: Option<SpreadCandidate> = None;

    for buy in &valid {
        for sell in &valid {
            if buy.exchange == sell.exchange {
                continue;
            }
            let Ok(spread_pct) = spread_percent(buy.ask, sell.bid) else {
                continue;
            };
            if best.as_ref().map_or(true, |b| spread_pct > b.spread_pct) {
                best = Some(SpreadCandidate {
                    buy_exchange: buy.exchange,
                    buy_price: buy.ask,
                    sell_exchange: sell.exchange,
                    sell_price: sell.bid,
                    spread_pct,
                });
            }
        }
    }
    best
}

/// A priced opportunity.
#[derive(Debug, Clone, PartialEq)]
pub struct Opportunity {
    /// Pair.
    pub pair: Symbol,
    /// Exchange to buy on.
    pub buy_exchange: ExchangeId,
    /// Exchange to sell on.
    pub sell_exchange: ExchangeId,
    /// Fees on the buy exchange.
    pub buy_fee: TradingFee,
    /// Fees on the sell exchange.
    pub sell_fee: TradingFee,
    /// Profit breakdown at detection time.
    pub estimate: ProfitEstimate,
    /// Detection time.
    pub detected_at: DateTime<Utc>,
}

/// An opportunity that failed profit or risk checks.
#[derive(Debug, Clone, PartialEq)]
pub struct RejectedOpportunity {
    /// The opportunity.
    pub opportunity: Opportunity,
    /// Every check it failed.
    pub violations: Vec<RiskViolation>,
}

/// Why a pair produced no opportunity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Fewer than two exchanges returned a usable quote.
    InsufficientQuotes {
        /// Exchanges with a usable quote.
        quoted: usize,
    },
    /// Widest spread below the configured gross minimum.
    SpreadBelowMinimum {
        /// Widest spread found.
        spread_pct: Decimal,
        /// Configured minimum.
        minimum: Decimal,
    },
    /// The profit calculation failed.
    Pricing(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::InsufficientQuotes { quoted } => {
                write!(f, "quoted on {} exchange(s), need 2", quoted)
            }
            SkipReason::SpreadBelowMinimum {
                spread_pct,
                minimum,
            } => write!(
                f,
                "best spread {}% below {}%",
                spread_pct.round_dp(3),
                minimum
            ),
            SkipReason::Pricing(reason) => write!(f, "pricing failed: {}", reason),
        }
    }
}

/// Outcome of scanning every configured pair.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanReport {
    /// Opportunities that passed every check, best net profit first.
    pub opportunities: Vec<Opportunity>,
    /// Opportunities that cleared the spread threshold but failed a check.
    pub rejected: Vec<RejectedOpportunity>,
    /// Pairs without an opportunity.
    pub skipped: Vec<(Symbol, SkipReason)>,
}

/// Fetch a pair from every connected exchange. Failed quotes are dropped.
async fn fetch_quotes(exchanges: &ExchangeManager, pair: &Symbol) -> Vec<Ticker> {
    let requests = exchanges
        .ids()
        .into_iter()
        .map(|id| async move { (id, exchanges.fetch_ticker(id, pair).await) });

    join_all(requests)
        .await
        .into_iter()
        .filter_map(|(id, result)| match result {
            Ok(ticker) => Some(ticker),
            Err(e) => {
                debug!(exchange = %id, pair = %pair, error = %e, "Quote unavailable");
                None
            }
        })
        .collect()
}

/// Price a spread with current fees from the cache.
pub async fn price_candidate(
    exchanges: &ExchangeManager,
    fees: &mut FeeCache,
    pair: &Symbol,
    candidate: &SpreadCandidate,
    trade_amount: Decimal,
) -> Result<Opportunity, SkipReason> {
    let buy_fee = match exchanges.get(candidate.buy_exchange) {
        Ok(connector) => fees.get(connector.as_ref(), pair).await,
        Err(_) => fees.default_fee(),
    };
    let sell_fee = match exchanges.get(candidate.sell_exchange) {
        Ok(connector) => fees.get(connector.as_ref(), pair).await,
        Err(_) => fees.default_fee(),
    };

    let estimate = estimate_profit(
        trade_amount,
        candidate.buy_price,
        candidate.sell_price,
        buy_fee.taker_pct,
        sell_fee.taker_pct,
    )
    .map_err(|e| SkipReason::Pricing(e.to_string()))?;

    Ok(Opportunity {
        pair: pair.clone(),
        buy_exchange: candidate.buy_exchange,
        sell_exchange: candidate.sell_exchange,
        buy_fee,
        sell_fee,
        estimate,
        detected_at: Utc::now(),
    })
}

/// Scan every configured pair across every connected exchange.
#[instrument(skip_all, fields(pairs = settings.trading_pairs.len(), exchanges = exchanges.len()))]
pub async fn scan(
    exchanges: &ExchangeManager,
    fees: &mut FeeCache,
    settings: &Settings,
    drift: Option<&DriftReport>,
) -> ScanReport {
    let _timer = metrics::timer_scan();
    metrics::inc_scans();

    let trade = &settings.trading_config;
    let mut report = ScanReport::default();

    for pair in &settings.trading_pairs {
        let quotes = fetch_quotes(exchanges, pair).await;
        let quoted = quotes.iter().filter(|t| t.is_valid()).count();

        let Some(candidate) = best_spread(&quotes) else {
            debug!(pair = %pair, quoted, "Not enough quotes");
            report
                .skipped
                .push((pair.clone(), SkipReason::InsufficientQuotes { quoted }));
            continue;
        };

        if candidate.spread_pct < trade.min_spread_pct {
            debug!(
                pair = %pair,
                spread_pct = %candidate.spread_pct,
                minimum = %trade.min_spread_pct,
                "Spread below minimum"
            );
            report.skipped.push((
                pair.clone(),
                SkipReason::SpreadBelowMinimum {
                    spread_pct: candidate.spread_pct,
                    minimum: trade.min_spread_pct,
                },
            ));
            continue;
        }

        let opportunity =
            match price_candidate(exchanges, fees, pair, &candidate, trade.trade_amount).await {
                Ok(opportunity) => opportunity,
                Err(reason) => {
                    warn!(pair = %pair, reason = %reason, "Could not price opportunity");
                    report.skipped.push((pair.clone(), reason));
                    continue;
                }
            };

        let violations =
            validate_opportunity(&opportunity.estimate, trade, &settings.risk_limits, drift);
        if violations.is_empty() {
            info!(
                pair = %pair,
                buy = %opportunity.buy_exchange,
                sell = %opportunity.sell_exchange,
                spread_pct = %opportunity.estimate.gross_spread_pct,
                net_profit = %opportunity.estimate.net_profit,
                "Arbitrage opportunity detected"
            );
            metrics::inc_opportunities_detected();
            report.opportunities.push(opportunity);
        } else {
            metrics::inc_opportunities_rejected();
            report.rejected.push(RejectedOpportunity {
                opportunity,
                violations,
            });
        }
    }

    report
        .opportunities
        .sort_by(|a, b| b.estimate.net_profit.cmp(&a.estimate.net_profit));
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::MockExchange;
    use crate::storage::{RiskLimits, TradeConfig};
    use rust_decimal_macros::dec;
    use std::sync::Arc;
    use std::time::Duration;

    fn ticker(exchange: ExchangeId, bid: Decimal, ask: Decimal) -> Ticker {
        Ticker {
            exchange,
            symbol: Symbol::new("BTC", "USDT"),
            bid,
            ask,
            last: None,
            fetched_at: Utc::now(),
        }
    }

    #[test]
    fn best_spread_buys_lowest_ask_sells_highest_bid() {
        let tickers = vec![
            ticker(ExchangeId::Binance, dec!(99.9), dec!(100)),
            ticker(ExchangeId::Okx, dec!(101.9), dec!(102)),
            ticker(ExchangeId::Bybit, dec!(100.9), dec!(101)),
        ];

        let best = best_spread(&tickers).unwrap();

        assert_eq!(best.buy_exchange, ExchangeId::Binance);
        assert_eq!(best.sell_exchange, ExchangeId::Okx);
        assert_eq!(best.buy_price, dec!(100));
        assert_eq!(best.sell_price, dec!(101.9));
        assert_eq!(best.spread_pct, dec!(1.9));
    }

    #[test]
    fn best_spread_may_be_negative() {
        let tickers = vec![
            ticker(ExchangeId::Binance, dec!(99), dec!(100)),
            ticker(ExchangeId::Okx, dec!(99), dec!(100)),
        ];
        let best = best_spread(&tickers).unwrap();
        assert_eq!(best.spread_pct, dec!(-1));
    }

    #[test]
    fn best_spread_needs_two_valid_quotes() {
        assert!(best_spread(&[ticker(ExchangeId::Binance, dec!(1), dec!(2))]).is_none());
        assert!(best_spread(&[
            ticker(ExchangeId::Binance, dec!(1), dec!(2)),
            ticker(ExchangeId::Okx, dec!(0), dec!(2)),
        ])
        .is_none());
    }

    async fn setup() -> (ExchangeManager, FeeCache, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let fees = FeeCache::load(
            dir.path().join("fees_cache.json"),
            chrono::Duration::hours(24),
            dec!(0.1),
        )
        .await;
        let manager = ExchangeManager::new(Duration::from_secs(1)).unwrap();
        (manager, fees, dir)
    }

    fn settings(pairs: &[Symbol]) -> Settings {
        Settings {
            trading_config: TradeConfig {
                trade_amount: dec!(300),
                min_profit: dec!(2),
                min_spread_pct: dec!(0.5),
            },
            trading_pairs: pairs.to_vec(),
            risk_limits: RiskLimits::default(),
        }
    }

    #[tokio::test]
    async fn scan_classifies_pairs() {
        let (mut manager, mut fees, _dir) = setup().await;
        let btc = Symbol::new("BTC", "USDT");
        let eth = Symbol::new("ETH", "USDT");
        let sol = Symbol::new("SOL", "USDT");
        let doge = Symbol::new("DOGE", "USDT");

        let binance = MockExchange::new(ExchangeId::Binance);
        let okx = MockExchange::new(ExchangeId::Okx);
        for mock in [&binance, &okx] {
            mock.set_fees(TradingFee::flat(dec!(0.1)));
        }
        // 2% spread: passes
        binance.set_ticker(&btc, dec!(99.9), dec!(100));
        okx.set_ticker(&btc, dec!(102), dec!(102.1));
        // 0.2% spread: below minimum
        binance.set_ticker(&eth, dec!(9.99), dec!(10));
        okx.set_ticker(&eth, dec!(10.02), dec!(10.03));
        // 0.6% spread: nets about 1.2, under the profit minimum
        binance.set_ticker(&sol, dec!(99.9), dec!(100));
        okx.set_ticker(&sol, dec!(100.6), dec!(100.7));
        // only one exchange
        binance.set_ticker(&doge, dec!(1), dec!(1.01));

        manager.insert(Arc::new(binance));
        manager.insert(Arc::new(okx));

        let report = scan(
            &manager,
            &mut fees,
            &settings(&[btc.clone(), eth.clone(), sol.clone(), doge.clone()]),
            None,
        )
        .await;

        assert_eq!(report.opportunities.len(), 1);
        let opp = &report.opportunities[0];
        assert_eq!(opp.pair, btc);
        assert_eq!(opp.buy_exchange, ExchangeId::Binance);
        assert_eq!(opp.sell_exchange, ExchangeId::Okx);
        assert_eq!(opp.estimate.net_profit, dec!(5.394));

        assert_eq!(report.rejected.len(), 1);
        assert_eq!(report.rejected[0].opportunity.pair, sol);

        assert_eq!(report.skipped.len(), 2);
        assert!(matches!(
            report.skipped[0],
            (ref pair, SkipReason::SpreadBelowMinimum { .. }) if *pair == eth
        ));
        assert!(matches!(
            report.skipped[1],
            (ref pair, SkipReason::InsufficientQuotes { quoted: 1 }) if *pair == doge
        ));
    }

    #[tokio::test]
    async fn opportunities_sorted_by_net_profit() {
        let (mut manager, mut fees, _dir) = setup().await;
        let small = Symbol::new("AAA", "USDT");
        let large = Symbol::new("BBB", "USDT");

        let binance = MockExchange::new(ExchangeId::Binance);
        let bybit = MockExchange::new(ExchangeId::Bybit);
        binance.set_fees(TradingFee::flat(dec!(0.1)));
        bybit.set_fees(TradingFee::flat(dec!(0.1)));
        binance.set_ticker(&small, dec!(1), dec!(1));
        bybit.set_ticker(&small, dec!(1.02), dec!(1.03));
        binance.set_ticker(&large, dec!(1), dec!(1));
        bybit.set_ticker(&large, dec!(1.05), dec!(1.06));
        manager.insert(Arc::new(binance));
        manager.insert(Arc::new(bybit));

        let report = scan(&manager, &mut fees, &settings(&[small, large.clone()]), None).await;

        assert_eq!(report.opportunities.len(), 2);
        assert_eq!(report.opportunities[0].pair, large);
    }

    #[tokio::test]
    async fn failing_exchange_is_left_out() {
        let (mut manager, mut fees, _dir) = setup().await;
        let btc = Symbol::new("BTC", "USDT");
        let binance = MockExchange::new(ExchangeId::Binance);
        binance.set_ticker(&btc, dec!(99), dec!(100));
        let okx = MockExchange::with_config(
            ExchangeId::Okx,
            crate::exchange::MockConfig {
                fail_ticker: true,
                ..Default::default()
            },
        );
        manager.insert(Arc::new(binance));
        manager.insert(Arc::new(okx));

        let report = scan(&manager, &mut fees, &settings(&[btc]), None).await;

        assert!(report.opportunities.is_empty());
        assert!(matches!(
            report.skipped[0].1,
            SkipReason::InsufficientQuotes { quoted: 1 }
        ));
    }
}
