//! Pre-trade checklist and two-leg market order execution.

use std::fmt;
use std::time::Instant;

use chrono::Utc;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;
use tracing::{error, info, instrument, warn};

use super::calculator::{estimate_profit, ProfitEstimate};
use super::detector::Opportunity;
use crate::error::TradingError;
use crate::exchange::{
    ExchangeId, ExchangeManager, MarketOrder, OrderReceipt, OrderSide, Symbol,
};
use crate::fees::FeeCache;
use crate::metrics;
use crate::storage::{TradeConfig, TradeLeg, TradeRecord, TradeStatus};

/// Why the checklist stopped before any order was placed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortReason {
    /// Fresh prices no longer produce a profit.
    NoLongerProfitable {
        /// Net profit at current prices.
        net_profit: Decimal,
    },
    /// Not enough quote currency on the buy exchange.
    InsufficientQuote {
        /// Buy exchange.
        exchange: ExchangeId,
        /// Quote asset.
        asset: String,
        /// Amount needed.
        required: Decimal,
        /// Free amount.
        available: Decimal,
    },
    /// Not enough base asset on the sell exchange.
    InsufficientBase {
        /// Sell exchange.
        exchange: ExchangeId,
        /// Base asset.
        asset: String,
        /// Amount needed.
        required: Decimal,
        /// Free amount.
        available: Decimal,
    },
    /// The quantity rounds down to zero at the configured precision.
    QuantityTooSmall {
        /// Unrounded quantity.
        quantity: Decimal,
    },
}

impl AbortReason {
    /// Short label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            AbortReason::NoLongerProfitable { .. } => "unprofitable",
            AbortReason::InsufficientQuote { .. } => "insufficient_quote",
            AbortReason::InsufficientBase { .. } => "insufficient_base",
            AbortReason::QuantityTooSmall { .. } => "quantity_too_small",
        }
    }
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::NoLongerProfitable { net_profit } => write!(
                f,
                "opportunity is no longer profitable (net {})",
                net_profit.round_dp(4)
            ),
            AbortReason::InsufficientQuote {
                exchange,
                asset,
                required,
                available,
            }
            | AbortReason::InsufficientBase {
                exchange,
                asset,
                required,
                available,
            } => write!(
                f,
                "insufficient {} on {}: need {}, have {}",
                asset,
                exchange,
                required.normalize(),
                available.normalize()
            ),
            AbortReason::QuantityTooSmall { quantity } => {
                write!(f, "quantity {} is below exchange precision", quantity)
            }
        }
    }
}

/// Result of running the executor.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionResult {
    /// Both legs were placed.
    Completed(TradeRecord),
    /// The buy was placed, the sell failed. Nothing is unwound.
    BuyOnly {
        /// Record with status `buy_only`.
        record: TradeRecord,
        /// Sell-leg failure.
        error: String,
    },
    /// A pre-trade check failed; no orders were placed.
    Aborted(AbortReason),
}

impl ExecutionResult {
    /// The record to append to history, if any order was placed.
    pub fn record(&self) -> Option<&TradeRecord> {
        match self {
            ExecutionResult::Completed(record) | ExecutionResult::BuyOnly { record, .. } => {
                Some(record)
            }
            ExecutionResult::Aborted(_) => None,
        }
    }
}

/// Executor counters since startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExecutorStats {
    /// Executions attempted.
    pub attempts: u64,
    /// Trades with both legs placed.
    pub completed: u64,
    /// Trades where only the buy went through.
    pub buy_only: u64,
    /// Checklist aborts.
    pub aborted: u64,
    /// Buy legs that failed.
    pub failed: u64,
}

/// Runs the pre-trade checklist and places orders.
#[derive(Debug)]
pub struct TradeExecutor {
    quantity_decimals: u32,
    stats: ExecutorStats,
}

impl TradeExecutor {
    /// Executor rounding quantities down to `quantity_decimals` places.
    pub fn new(quantity_decimals: u32) -> Self {
        Self {
            quantity_decimals,
            stats: ExecutorStats::default(),
        }
    }

    /// Counters since startup.
    pub fn stats(&self) -> ExecutorStats {
        self.stats
    }

    /// Round a base quantity down to the configured precision.
    pub fn round_quantity(&self, quantity: Decimal) -> Decimal {
        quantity.round_dp_with_strategy(self.quantity_decimals, RoundingStrategy::ToZero)
    }

    /// Re-check prices and balances, then buy and sell.
    ///
    /// Checks run in order and the first failure aborts:
    /// 1. fresh tickers and fees still give a positive net profit;
    /// 2. the buy exchange holds the trade amount in quote currency;
    /// 3. the sell exchange holds the rounded quantity in base asset.
    ///
    /// Errors fetching prices or balances and a failed buy order are returned
    /// as [`TradingError`]. A failed sell after a filled buy is reported as
    /// [`ExecutionResult::BuyOnly`].
    #[instrument(
        skip_all,
        fields(
            pair = %opportunity.pair,
            buy = %opportunity.buy_exchange,
            sell = %opportunity.sell_exchange
        )
    )]
    pub async fn execute(
        &mut self,
        exchanges: &ExchangeManager,
        fees: &mut FeeCache,
        opportunity: &Opportunity,
        trade: &TradeConfig,
    ) -> Result<ExecutionResult, TradingError> {
        self.stats.attempts += 1;
        let pair = &opportunity.pair;
        let buy_id = opportunity.buy_exchange;
        let sell_id = opportunity.sell_exchange;

        let buy_exchange = exchanges.get(buy_id)?;
        let sell_exchange = exchanges.get(sell_id)?;

        // 1. Fresh prices and fees
        let (buy_ticker, sell_ticker) = tokio::try_join!(
            exchanges.fetch_ticker(buy_id, pair),
            exchanges.fetch_ticker(sell_id, pair),
        )?;
        let buy_fee = fees.get(buy_exchange.as_ref(), pair).await;
        let sell_fee = fees.get(sell_exchange.as_ref(), pair).await;

        let estimate = estimate_profit(
            trade.trade_amount,
            buy_ticker.ask,
            sell_ticker.bid,
            buy_fee.taker_pct,
            sell_fee.taker_pct,
        )?;
        if !estimate.is_profitable() {
            return Ok(self.abort(AbortReason::NoLongerProfitable {
                net_profit: estimate.net_profit,
            }));
        }

        // 2. Quote balance on the buy exchange
        let buy_balances = exchanges.fetch_balance(buy_id).await?;
        let quote_free = buy_balances.free(&pair.quote);
        if quote_free < trade.trade_amount {
            return Ok(self.abort(AbortReason::InsufficientQuote {
                exchange: buy_id,
                asset: pair.quote.clone(),
                required: trade.trade_amount,
                available: quote_free,
            }));
        }

        // 3. Base balance on the sell exchange
        let quantity = self.round_quantity(estimate.quantity);
        if quantity <= Decimal::ZERO {
            return Ok(self.abort(AbortReason::QuantityTooSmall {
                quantity: estimate.quantity,
            }));
        }
        let sell_balances = exchanges.fetch_balance(sell_id).await?;
        let base_free = sell_balances.free(&pair.base);
        if base_free < quantity {
            return Ok(self.abort(AbortReason::InsufficientBase {
                exchange: sell_id,
                asset: pair.base.clone(),
                required: quantity,
                available: base_free,
            }));
        }

        self.log_plan(pair, quantity, &estimate);

        // 4. Buy, then sell
        let buy_receipt = match place(exchanges, buy_id, pair, OrderSide::Buy, quantity).await {
            Ok(receipt) => receipt,
            Err(source) => {
                self.stats.failed += 1;
                return Err(TradingError::OrderFailed {
                    leg: OrderSide::Buy,
                    exchange: buy_id,
                    source,
                });
            }
        };
        let buy_leg = leg(&buy_receipt, buy_ticker.ask, quantity);

        let timestamp = Utc::now();
        let mut record = TradeRecord {
            trade_id: TradeRecord::id_for(timestamp),
            timestamp,
            pair: pair.clone(),
            quantity,
            trade_amount: trade.trade_amount,
            buy: buy_leg,
            sell: None,
            estimated_net_profit: estimate.net_profit,
            estimated_roi_pct: estimate.roi_pct,
            error: None,
            status: TradeStatus::BuyOnly,
        };

        match place(exchanges, sell_id, pair, OrderSide::Sell, quantity).await {
            Ok(sell_receipt) => {
                record.sell = Some(leg(&sell_receipt, sell_ticker.bid, quantity));
                record.status = TradeStatus::Completed;
                self.stats.completed += 1;
                metrics::inc_trades_executed(&record.status.to_string());
                info!(
                    trade_id = %record.trade_id,
                    quantity = %quantity,
                    net_profit = %estimate.net_profit,
                    "Arbitrage executed"
                );
                Ok(ExecutionResult::Completed(record))
            }
            Err(e) => {
                let message = e.user_message();
                error!(
                    trade_id = %record.trade_id,
                    error = %e,
                    "Sell leg failed after buy, position left open"
                );
                record.error = Some(message.clone());
                self.stats.buy_only += 1;
                metrics::inc_trades_executed(&record.status.to_string());
                Ok(ExecutionResult::BuyOnly {
                    record,
                    error: message,
                })
            }
        }
    }

    fn abort(&mut self, reason: AbortReason) -> ExecutionResult {
        warn!(reason = %reason, "Trade aborted");
        self.stats.aborted += 1;
        metrics::inc_trades_aborted(reason.label());
        ExecutionResult::Aborted(reason)
    }

    fn log_plan(&self, pair: &Symbol, quantity: Decimal, estimate: &ProfitEstimate) {
        info!("========================================");
        info!("EXECUTING {}", pair);
        info!("Buy price:            {}", estimate.buy_price);
        info!("Sell price:           {}", estimate.sell_price);
        info!("Quantity:             {}", quantity);
        info!("Trade amount:         {}", estimate.trade_amount);
        info!("Fees:                 {}", estimate.total_fees.round_dp(4));
        info!("EXPECTED NET PROFIT:  {}", estimate.net_profit.round_dp(4));
        info!("========================================");
    }
}

async fn place(
    exchanges: &ExchangeManager,
    exchange: ExchangeId,
    pair: &Symbol,
    side: OrderSide,
    quantity: Decimal,
) -> Result<OrderReceipt, crate::error::ExchangeError> {
    let connector = exchanges.get(exchange)?;
    let order = MarketOrder {
        symbol: pair.clone(),
        side,
        quantity,
    };
    let start = Instant::now();
    let result = connector.create_market_order(&order).await;
    metrics::record_order_submit_latency(start, exchange, side);

    match &result {
        Ok(receipt) => {
            metrics::inc_orders_submitted(exchange);
            info!(exchange = %exchange, side = %side, order_id = %receipt.order_id, "Order placed");
        }
        Err(e) => {
            metrics::inc_orders_failed(exchange);
            warn!(exchange = %exchange, side = %side, error = %e, "Order failed");
        }
    }
    result
}

fn leg(receipt: &OrderReceipt, quoted_price: Decimal, quantity: Decimal) -> TradeLeg {
    TradeLeg {
        exchange: receipt.exchange,
        order_id: receipt.order_id.clone(),
        price: receipt.average_price.unwrap_or(quoted_price),
        quantity: receipt
            .filled_quantity
            .filter(|q| *q > Decimal::ZERO)
            .unwrap_or(quantity),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arbitrage::detector::price_candidate;
    use crate::arbitrage::detector::SpreadCandidate;
    use crate::exchange::{MockConfig, MockExchange, TradingFee};
    use rust_decimal_macros::dec;
    use std::sync::Arc;
    use std::time::Duration;

    struct Fixture {
        manager: ExchangeManager,
        fees: FeeCache,
        buy: MockExchange,
        sell: MockExchange,
        pair: Symbol,
        _dir: tempfile::TempDir,
    }

    /// Binance asks 100, OKX bids 102, both funded.
    async fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let fees = FeeCache::load(
            dir.path().join("fees_cache.json"),
            chrono::Duration::hours(24),
            dec!(0.1),
        )
        .await;
        let pair = Symbol::new("ETH", "USDT");

        let buy = MockExchange::new(ExchangeId::Binance);
        buy.set_ticker(&pair, dec!(99.9), dec!(100));
        buy.set_balance("USDT", dec!(1000));
        buy.set_fees(TradingFee::flat(dec!(0.1)));

        let sell = MockExchange::new(ExchangeId::Okx);
        sell.set_ticker(&pair, dec!(102), dec!(102.1));
        sell.set_balance("ETH", dec!(10));
        sell.set_fees(TradingFee::flat(dec!(0.1)));

        let mut manager = ExchangeManager::new(Duration::from_secs(1)).unwrap();
        manager.insert(Arc::new(buy.clone()));
        manager.insert(Arc::new(sell.clone()));

        Fixture {
            manager,
            fees,
            buy,
            sell,
            pair,
            _dir: dir,
        }
    }

    fn trade(amount: Decimal) -> TradeConfig {
        TradeConfig {
            trade_amount: amount,
            min_profit: dec!(1),
            min_spread_pct: dec!(0.5),
        }
    }

    async fn opportunity(f: &mut Fixture) -> Opportunity {
        let candidate = SpreadCandidate {
            buy_exchange: ExchangeId::Binance,
            buy_price: dec!(100),
            sell_exchange: ExchangeId::Okx,
            sell_price: dec!(102),
            spread_pct: dec!(2),
        };
        price_candidate(&f.manager, &mut f.fees, &f.pair, &candidate, dec!(300))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn completes_both_legs() {
        let mut f = fixture().await;
        let opp = opportunity(&mut f).await;
        let mut executor = TradeExecutor::new(6);

        let result = executor
            .execute(&f.manager, &mut f.fees, &opp, &trade(dec!(300)))
            .await
            .unwrap();

        let record = match result {
            ExecutionResult::Completed(record) => record,
            other => panic!("expected completed trade, got {:?}", other),
        };
        assert_eq!(record.status, TradeStatus::Completed);
        assert_eq!(record.quantity, dec!(3));
        assert_eq!(record.buy.exchange, ExchangeId::Binance);
        assert_eq!(record.buy.price, dec!(100));
        let sell = record.sell.unwrap();
        assert_eq!(sell.exchange, ExchangeId::Okx);
        assert_eq!(sell.price, dec!(102));
        assert_eq!(record.estimated_net_profit, dec!(5.394));

        assert_eq!(f.buy.orders()[0].side, OrderSide::Buy);
        assert_eq!(f.sell.orders()[0].side, OrderSide::Sell);
        assert_eq!(executor.stats().completed, 1);
    }

    #[tokio::test]
    async fn aborts_when_prices_moved() {
        let mut f = fixture().await;
        let opp = opportunity(&mut f).await;
        f.sell.set_ticker(&f.pair, dec!(100), dec!(100.1));
        let mut executor = TradeExecutor::new(6);

        let result = executor
            .execute(&f.manager, &mut f.fees, &opp, &trade(dec!(300)))
            .await
            .unwrap();

        assert!(matches!(
            result,
            ExecutionResult::Aborted(AbortReason::NoLongerProfitable { .. })
        ));
        assert!(f.buy.orders().is_empty());
        assert_eq!(executor.stats().aborted, 1);
    }

    #[tokio::test]
    async fn aborts_without_quote_balance() {
        let mut f = fixture().await;
        let opp = opportunity(&mut f).await;
        f.buy.set_balance("USDT", dec!(50));
        let mut executor = TradeExecutor::new(6);

        let result = executor
            .execute(&f.manager, &mut f.fees, &opp, &trade(dec!(300)))
            .await
            .unwrap();

        assert_eq!(
            result,
            ExecutionResult::Aborted(AbortReason::InsufficientQuote {
                exchange: ExchangeId::Binance,
                asset: "USDT".to_string(),
                required: dec!(300),
                available: dec!(50),
            })
        );
    }

    #[tokio::test]
    async fn quote_shortfall_is_reported_before_sell_balance_is_read() {
        let mut f = fixture().await;
        let opp = opportunity(&mut f).await;
        f.buy.set_balance("USDT", dec!(50));
        f.sell.set_config(MockConfig {
            fail_balance: true,
            ..MockConfig::default()
        });
        let mut executor = TradeExecutor::new(6);

        let result = executor
            .execute(&f.manager, &mut f.fees, &opp, &trade(dec!(300)))
            .await
            .unwrap();

        assert!(matches!(
            result,
            ExecutionResult::Aborted(AbortReason::InsufficientQuote {
                exchange: ExchangeId::Binance,
                ..
            })
        ));
        assert!(f.buy.orders().is_empty());
    }

    #[tokio::test]
    async fn sell_balance_failure_is_a_pre_trade_error() {
        let mut f = fixture().await;
        let opp = opportunity(&mut f).await;
        f.sell.set_config(MockConfig {
            fail_balance: true,
            ..MockConfig::default()
        });
        let mut executor = TradeExecutor::new(6);

        let result = executor
            .execute(&f.manager, &mut f.fees, &opp, &trade(dec!(300)))
            .await;

        assert!(matches!(result, Err(TradingError::PreTrade(_))));
        assert!(f.buy.orders().is_empty());
    }

    #[tokio::test]
    async fn aborts_without_base_balance() {
        let mut f = fixture().await;
        let opp = opportunity(&mut f).await;
        f.sell.set_balance("ETH", dec!(2.5));
        let mut executor = TradeExecutor::new(6);

        let result = executor
            .execute(&f.manager, &mut f.fees, &opp, &trade(dec!(300)))
            .await
            .unwrap();

        assert!(matches!(
            result,
            ExecutionResult::Aborted(AbortReason::InsufficientBase { ref asset, .. }) if asset == "ETH"
        ));
        assert!(f.buy.orders().is_empty());
        assert!(f.sell.orders().is_empty());
    }

    #[tokio::test]
    async fn aborts_when_quantity_rounds_to_zero() {
        let mut f = fixture().await;
        let opp = opportunity(&mut f).await;
        let mut executor = TradeExecutor::new(0);

        let result = executor
            .execute(&f.manager, &mut f.fees, &opp, &trade(dec!(50)))
            .await
            .unwrap();

        assert!(matches!(
            result,
            ExecutionResult::Aborted(AbortReason::QuantityTooSmall { .. })
        ));
    }

    #[tokio::test]
    async fn failed_buy_is_an_error() {
        let mut f = fixture().await;
        let opp = opportunity(&mut f).await;
        f.buy.set_config(MockConfig {
            fail_buy: true,
            ..MockConfig::default()
        });
        let mut executor = TradeExecutor::new(6);

        let result = executor
            .execute(&f.manager, &mut f.fees, &opp, &trade(dec!(300)))
            .await;

        assert!(matches!(
            result,
            Err(TradingError::OrderFailed {
                leg: OrderSide::Buy,
                exchange: ExchangeId::Binance,
                ..
            })
        ));
        assert!(f.sell.orders().is_empty());
        assert_eq!(executor.stats().failed, 1);
    }

    #[tokio::test]
    async fn failed_sell_leaves_buy_only_record() {
        let mut f = fixture().await;
        let opp = opportunity(&mut f).await;
        f.sell.set_config(MockConfig {
            fail_sell: true,
            ..MockConfig::default()
        });
        let mut executor = TradeExecutor::new(6);

        let result = executor
            .execute(&f.manager, &mut f.fees, &opp, &trade(dec!(300)))
            .await
            .unwrap();

        let (record, error) = match result {
            ExecutionResult::BuyOnly { record, error } => (record, error),
            other => panic!("expected buy-only trade, got {:?}", other),
        };
        assert_eq!(record.status, TradeStatus::BuyOnly);
        assert!(record.sell.is_none());
        assert_eq!(record.error.as_deref(), Some(error.as_str()));
        assert_eq!(f.buy.orders().len(), 1);
        assert_eq!(executor.stats().buy_only, 1);
    }

    #[tokio::test]
    async fn ticker_failure_is_a_pre_trade_error() {
        let mut f = fixture().await;
        let opp = opportunity(&mut f).await;
        f.sell.set_config(MockConfig {
            fail_ticker: true,
            ..MockConfig::default()
        });
        let mut executor = TradeExecutor::new(6);

        let result = executor
            .execute(&f.manager, &mut f.fees, &opp, &trade(dec!(300)))
            .await;

        assert!(matches!(result, Err(TradingError::PreTrade(_))));
        assert!(f.buy.orders().is_empty());
    }

    #[test]
    fn quantity_rounds_toward_zero() {
        let executor = TradeExecutor::new(3);
        assert_eq!(executor.round_quantity(dec!(0.123999)), dec!(0.123));
        assert_eq!(executor.round_quantity(dec!(5)), dec!(5));
    }
}
