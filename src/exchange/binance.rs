//! Binance spot REST connector. MEXC exposes the same v3 API shape and is
//! served by the same type with a different host and key header.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Method;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use crate::error::ExchangeError;

use super::signing::{hmac_sha256_hex, timestamp_ms};
use super::{
    api_error, parse_decimal, ApiCredentials, AssetBalance, Balances, Exchange, ExchangeId,
    ExchangeResult, MarketOrder, OrderReceipt, OrderSide, Symbol, Ticker, TradingFee,
};

const BINANCE_URL: &str = "https://api.binance.com";
const BINANCE_TESTNET_URL: &str = "https://testnet.binance.vision";
const MEXC_URL: &str = "https://api.mexc.com";
const RECV_WINDOW_MS: u64 = 5000;

/// Connector for Binance-compatible spot APIs.
#[derive(Debug, Clone)]
pub struct BinanceExchange {
    id: ExchangeId,
    http: reqwest::Client,
    base_url: String,
    credentials: ApiCredentials,
    api_key_header: &'static str,
    /// Only Binance serves per-account fees; MEXC falls back to the caller's default.
    has_fee_endpoint: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BookTicker {
    bid_price: String,
    ask_price: String,
}

#[derive(Debug, Deserialize)]
struct AccountResponse {
    #[serde(default)]
    balances: Vec<BalanceEntry>,
}

#[derive(Debug, Deserialize)]
struct BalanceEntry {
    asset: String,
    free: String,
    locked: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TradeFeeEntry {
    maker_commission: String,
    taker_commission: String,
}

/// Binance returns numeric order ids, MEXC returns strings.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OrderId {
    Number(u64),
    Text(String),
}

impl OrderId {
    fn into_string(self) -> String {
        match self {
            OrderId::Number(n) => n.to_string(),
            OrderId::Text(s) => s,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderResponse {
    order_id: OrderId,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    executed_qty: Option<String>,
    #[serde(default)]
    cummulative_quote_qty: Option<String>,
}

impl BinanceExchange {
    /// Binance spot, or the spot testnet.
    pub fn binance(http: reqwest::Client, credentials: ApiCredentials, testnet: bool) -> Self {
        let base_url = if testnet { BINANCE_TESTNET_URL } else { BINANCE_URL };
        Self {
            id: ExchangeId::Binance,
            http,
            base_url: base_url.to_string(),
            credentials,
            api_key_header: "X-MBX-APIKEY",
            has_fee_endpoint: !testnet,
        }
    }

    /// MEXC spot. MEXC has no public testnet.
    pub fn mexc(http: reqwest::Client, credentials: ApiCredentials) -> Self {
        Self {
            id: ExchangeId::Mexc,
            http,
            base_url: MEXC_URL.to_string(),
            credentials,
            api_key_header: "X-MEXC-APIKEY",
            has_fee_endpoint: false,
        }
    }

    /// Point the connector at another host.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    async fn public_get<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> ExchangeResult<T> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.http.get(&url).query(params).send().await?;
        self.read(response).await
    }

    async fn signed<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        mut params: Vec<(&str, String)>,
    ) -> ExchangeResult<T> {
        params.push(("recvWindow", RECV_WINDOW_MS.to_string()));
        params.push(("timestamp", timestamp_ms().to_string()));

        let query = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(params.iter().map(|(k, v)| (*k, v.as_str())))
            .finish();
        let signature = hmac_sha256_hex(&self.credentials.secret, &query)?;
        let url = format!("{}{}?{}&signature={}", self.base_url, path, query, signature);

        debug!(exchange = %self.id, method = %method, path, "Signed request");

        let response = self
            .http
            .request(method, &url)
            .header(self.api_key_header, &self.credentials.api_key)
            .send()
            .await?;
        self.read(response).await
    }

    async fn read<T: DeserializeOwned>(&self, response: reqwest::Response) -> ExchangeResult<T> {
        if !response.status().is_success() {
            return Err(api_error(self.id, response).await);
        }
        response.json::<T>().await.map_err(|e| ExchangeError::Parse {
            exchange: self.id,
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl Exchange for BinanceExchange {
    fn id(&self) -> ExchangeId {
        self.id
    }

    #[instrument(skip_all, fields(exchange = %self.id, symbol = %symbol))]
    async fn fetch_ticker(&self, symbol: &Symbol) -> ExchangeResult<Ticker> {
        let book: BookTicker = self
            .public_get("/api/v3/ticker/bookTicker", &[("symbol", symbol.concat())])
            .await?;

        Ok(Ticker {
            exchange: self.id,
            symbol: symbol.clone(),
            bid: parse_decimal(self.id, "bidPrice", &book.bid_price)?,
            ask: parse_decimal(self.id, "askPrice", &book.ask_price)?,
            last: None,
            fetched_at: Utc::now(),
        })
    }

    #[instrument(skip_all, fields(exchange = %self.id))]
    async fn fetch_balance(&self) -> ExchangeResult<Balances> {
        let account: AccountResponse = self.signed(Method::GET, "/api/v3/account", Vec::new()).await?;

        let mut assets = BTreeMap::new();
        for entry in account.balances {
            assets.insert(
                entry.asset.to_uppercase(),
                AssetBalance {
                    free: parse_decimal(self.id, "free", &entry.free)?,
                    locked: parse_decimal(self.id, "locked", &entry.locked)?,
                },
            );
        }

        Ok(Balances {
            exchange: self.id,
            assets,
        })
    }

    #[instrument(skip_all, fields(exchange = %self.id, symbol = %symbol))]
    async fn fetch_trading_fee(&self, symbol: &Symbol) -> ExchangeResult<TradingFee> {
        if !self.has_fee_endpoint {
            return Err(ExchangeError::NotSupported {
                exchange: self.id,
                operation: "trade fee lookup",
            });
        }

        let entries: Vec<TradeFeeEntry> = self
            .signed(
                Method::GET,
                "/sapi/v1/asset/tradeFee",
                vec![("symbol", symbol.concat())],
            )
            .await?;

        let entry = entries.into_iter().next().ok_or_else(|| ExchangeError::Parse {
            exchange: self.id,
            reason: format!("no fee entry for {}", symbol),
        })?;

        // Commissions are fractions (0.001 = 0.1%).
        Ok(TradingFee {
            maker_pct: parse_decimal(self.id, "makerCommission", &entry.maker_commission)?
                * Decimal::ONE_HUNDRED,
            taker_pct: parse_decimal(self.id, "takerCommission", &entry.taker_commission)?
                * Decimal::ONE_HUNDRED,
        })
    }

    #[instrument(skip_all, fields(exchange = %self.id, symbol = %order.symbol, side = %order.side, quantity = %order.quantity))]
    async fn create_market_order(&self, order: &MarketOrder) -> ExchangeResult<OrderReceipt> {
        let side = match order.side {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        };

        let response: OrderResponse = self
            .signed(
                Method::POST,
                "/api/v3/order",
                vec![
                    ("symbol", order.symbol.concat()),
                    ("side", side.to_string()),
                    ("type", "MARKET".to_string()),
                    ("quantity", order.quantity.normalize().to_string()),
                    ("newOrderRespType", "FULL".to_string()),
                ],
            )
            .await?;

        let filled = response
            .executed_qty
            .as_deref()
            .map(|q| parse_decimal(self.id, "executedQty", q))
            .transpose()?;
        let quote = response
            .cummulative_quote_qty
            .as_deref()
            .map(|q| parse_decimal(self.id, "cummulativeQuoteQty", q))
            .transpose()?;
        let average_price = match (filled, quote) {
            (Some(f), Some(q)) if f > Decimal::ZERO => Some(q / f),
            _ => None,
        };

        if average_price.is_none() {
            warn!(exchange = %self.id, "Order response carried no fill information");
        }

        Ok(OrderReceipt {
            order_id: response.order_id.into_string(),
            exchange: self.id,
            side: order.side,
            quantity: order.quantity,
            filled_quantity: filled,
            average_price,
            status: response.status,
        })
    }
}
