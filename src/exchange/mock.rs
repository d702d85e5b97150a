//! In-memory exchange for unit testing and dry runs.
//!
//! Market orders fill instantly at the current ask (buy) or bid (sell) and
//! move the mock balances accordingly.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;

use crate::error::ExchangeError;

use super::{
    AssetBalance, Balances, Exchange, ExchangeId, ExchangeResult, MarketOrder, OrderReceipt,
    OrderSide, Symbol, Ticker, TradingFee,
};

/// Configuration for mock exchange behavior.
#[derive(Debug, Clone, Default)]
pub struct MockConfig {
    /// Whether to fail balance requests.
    pub fail_balance: bool,
    /// Whether to fail ticker requests.
    pub fail_ticker: bool,
    /// Whether to fail fee requests.
    pub fail_fees: bool,
    /// Whether to fail buy orders.
    pub fail_buy: bool,
    /// Whether to fail sell orders.
    pub fail_sell: bool,
    /// Simulated latency in milliseconds.
    pub latency_ms: u64,
}

#[derive(Debug, Default)]
struct MockState {
    config: MockConfig,
    tickers: HashMap<Symbol, (Decimal, Decimal)>,
    balances: BTreeMap<String, Decimal>,
    fees: Option<TradingFee>,
    orders: Vec<MarketOrder>,
    fee_calls: usize,
    next_order_id: u64,
}

/// Mock exchange. Clones share state.
#[derive(Debug, Clone)]
pub struct MockExchange {
    id: ExchangeId,
    state: Arc<Mutex<MockState>>,
}

impl MockExchange {
    /// Create a new mock exchange with default configuration.
    pub fn new(id: ExchangeId) -> Self {
        Self::with_config(id, MockConfig::default())
    }

    /// Create a mock exchange with custom configuration.
    pub fn with_config(id: ExchangeId, config: MockConfig) -> Self {
        Self {
            id,
            state: Arc::new(Mutex::new(MockState {
                config,
                next_order_id: 1,
                ..MockState::default()
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Replace the failure configuration.
    pub fn set_config(&self, config: MockConfig) {
        self.state().config = config;
    }

    /// Set the best bid/ask for a pair.
    pub fn set_ticker(&self, symbol: &Symbol, bid: Decimal, ask: Decimal) {
        self.state().tickers.insert(symbol.clone(), (bid, ask));
    }

    /// Set the free balance of an asset.
    pub fn set_balance(&self, asset: &str, free: Decimal) {
        self.state().balances.insert(asset.to_uppercase(), free);
    }

    /// Set the fee returned for every pair.
    pub fn set_fees(&self, fees: TradingFee) {
        self.state().fees = Some(fees);
    }

    /// Orders placed so far.
    pub fn orders(&self) -> Vec<MarketOrder> {
        self.state().orders.clone()
    }

    /// Number of fee lookups served.
    pub fn fee_calls(&self) -> usize {
        self.state().fee_calls
    }

    fn failure(&self, message: &str) -> ExchangeError {
        ExchangeError::Simulated {
            exchange: self.id,
            message: message.to_string(),
        }
    }

    async fn simulate_latency(&self) {
        let latency = self.state().config.latency_ms;
        if latency > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(latency)).await;
        }
    }
}

#[async_trait]
impl Exchange for MockExchange {
    fn id(&self) -> ExchangeId {
        self.id
    }

    async fn fetch_ticker(&self, symbol: &Symbol) -> ExchangeResult<Ticker> {
        self.simulate_latency().await;
        let state = self.state();
        if state.config.fail_ticker {
            return Err(self.failure("mock ticker failure"));
        }
        let (bid, ask) = state
            .tickers
            .get(symbol)
            .copied()
            .ok_or_else(|| self.failure(&format!("no market {}", symbol)))?;

        Ok(Ticker {
            exchange: self.id,
            symbol: symbol.clone(),
            bid,
            ask,
            last: None,
            fetched_at: Utc::now(),
        })
    }

    async fn fetch_balance(&self) -> ExchangeResult<Balances> {
        self.simulate_latency().await;
        let state = self.state();
        if state.config.fail_balance {
            return Err(self.failure("mock balance failure"));
        }
        let assets = state
            .balances
            .iter()
            .map(|(asset, free)| {
                (
                    asset.clone(),
                    AssetBalance {
                        free: *free,
                        locked: Decimal::ZERO,
                    },
                )
            })
            .collect();

        Ok(Balances {
            exchange: self.id,
            assets,
        })
    }

    async fn fetch_trading_fee(&self, _symbol: &Symbol) -> ExchangeResult<TradingFee> {
        let mut state = self.state();
        state.fee_calls += 1;
        if state.config.fail_fees {
            return Err(self.failure("mock fee failure"));
        }
        state
            .fees
            .ok_or_else(|| self.failure("no fees configured"))
    }

    async fn create_market_order(&self, order: &MarketOrder) -> ExchangeResult<OrderReceipt> {
        self.simulate_latency().await;
        let mut state = self.state();

        let failing = match order.side {
            OrderSide::Buy => state.config.fail_buy,
            OrderSide::Sell => state.config.fail_sell,
        };
        if failing {
            return Err(self.failure(&format!("mock {} order failure", order.side)));
        }

        let (bid, ask) = state
            .tickers
            .get(&order.symbol)
            .copied()
            .ok_or_else(|| self.failure(&format!("no market {}", order.symbol)))?;
        let price = match order.side {
            OrderSide::Buy => ask,
            OrderSide::Sell => bid,
        };
        let notional = price * order.quantity;

        let (spend_asset, spend, receive_asset, receive) = match order.side {
            OrderSide::Buy => (&order.symbol.quote, notional, &order.symbol.base, order.quantity),
            OrderSide::Sell => (&order.symbol.base, order.quantity, &order.symbol.quote, notional),
        };

        let available = state.balances.get(spend_asset).copied().unwrap_or_default();
        if available < spend {
            return Err(self.failure(&format!(
                "insufficient {}: need {}, have {}",
                spend_asset, spend, available
            )));
        }
        state.balances.insert(spend_asset.clone(), available - spend);
        *state.balances.entry(receive_asset.clone()).or_default() += receive;

        let order_id = format!("{}-{}", self.id, state.next_order_id);
        state.next_order_id += 1;
        state.orders.push(order.clone());

        Ok(OrderReceipt {
            order_id,
            exchange: self.id,
            side: order.side,
            quantity: order.quantity,
            filled_quantity: Some(order.quantity),
            average_price: Some(price),
            status: Some("FILLED".to_string()),
        })
    }
}
