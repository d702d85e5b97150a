//! Bybit v5 spot REST connector (unified trading account).

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, instrument};

use crate::error::ExchangeError;

use super::signing::{hmac_sha256_hex, timestamp_ms};
use super::{
    api_error, parse_decimal, ApiCredentials, AssetBalance, Balances, Exchange, ExchangeId,
    ExchangeResult, MarketOrder, OrderReceipt, OrderSide, Symbol, Ticker, TradingFee,
};

const BYBIT_URL: &str = "https://api.bybit.com";
const BYBIT_TESTNET_URL: &str = "https://api-testnet.bybit.com";
const RECV_WINDOW_MS: &str = "5000";

/// Bybit connector.
#[derive(Debug, Clone)]
pub struct BybitExchange {
    http: reqwest::Client,
    base_url: String,
    credentials: ApiCredentials,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope<T> {
    ret_code: i64,
    #[serde(default)]
    ret_msg: String,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct List<T> {
    #[serde(default = "Vec::new")]
    list: Vec<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TickerEntry {
    bid1_price: String,
    ask1_price: String,
    #[serde(default)]
    last_price: String,
}

#[derive(Debug, Deserialize)]
struct WalletAccount {
    #[serde(default)]
    coin: Vec<WalletCoin>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WalletCoin {
    coin: String,
    #[serde(default)]
    wallet_balance: String,
    #[serde(default)]
    locked: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FeeEntry {
    taker_fee_rate: String,
    maker_fee_rate: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderCreated {
    order_id: String,
}

impl BybitExchange {
    /// Mainnet, or the public testnet.
    pub fn new(http: reqwest::Client, credentials: ApiCredentials, testnet: bool) -> Self {
        let base_url = if testnet { BYBIT_TESTNET_URL } else { BYBIT_URL };
        Self {
            http,
            base_url: base_url.to_string(),
            credentials,
        }
    }

    /// Point the connector at another host.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn query_string(params: &[(&str, String)]) -> String {
        url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(params.iter().map(|(k, v)| (*k, v.as_str())))
            .finish()
    }

    async fn public_get<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> ExchangeResult<T> {
        let url = format!("{}{}?{}", self.base_url, path, Self::query_string(params));
        let response = self.http.get(&url).send().await?;
        self.read(response).await
    }

    /// Signature input is `timestamp + apiKey + recvWindow + (query | body)`.
    async fn signed<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
        body: Option<serde_json::Value>,
    ) -> ExchangeResult<T> {
        let query = Self::query_string(params);
        let body = body.map(|b| b.to_string());
        let payload = body.as_deref().unwrap_or(&query);
        let timestamp = timestamp_ms().to_string();
        let prehash = format!(
            "{}{}{}{}",
            timestamp, self.credentials.api_key, RECV_WINDOW_MS, payload
        );
        let signature = hmac_sha256_hex(&self.credentials.secret, &prehash)?;

        let url = if query.is_empty() {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}{}?{}", self.base_url, path, query)
        };

        debug!(method = %method, path, "Signed Bybit request");

        let mut request = self
            .http
            .request(method, &url)
            .header("X-BAPI-API-KEY", &self.credentials.api_key)
            .header("X-BAPI-TIMESTAMP", &timestamp)
            .header("X-BAPI-RECV-WINDOW", RECV_WINDOW_MS)
            .header("X-BAPI-SIGN", signature);
        if let Some(body) = body {
            request = request.header("Content-Type", "application/json").body(body);
        }

        let response = request.send().await?;
        self.read(response).await
    }

    async fn read<T: DeserializeOwned>(&self, response: reqwest::Response) -> ExchangeResult<T> {
        if !response.status().is_success() {
            return Err(api_error(ExchangeId::Bybit, response).await);
        }
        let envelope: Envelope<T> = response.json().await.map_err(|e| ExchangeError::Parse {
            exchange: ExchangeId::Bybit,
            reason: e.to_string(),
        })?;

        if envelope.ret_code != 0 {
            return Err(ExchangeError::Rejected {
                exchange: ExchangeId::Bybit,
                code: envelope.ret_code.to_string(),
                message: envelope.ret_msg,
            });
        }

        envelope.result.ok_or_else(|| ExchangeError::Parse {
            exchange: ExchangeId::Bybit,
            reason: "missing result".to_string(),
        })
    }
}

#[async_trait]
impl Exchange for BybitExchange {
    fn id(&self) -> ExchangeId {
        ExchangeId::Bybit
    }

    #[instrument(skip_all, fields(exchange = "bybit", symbol = %symbol))]
    async fn fetch_ticker(&self, symbol: &Symbol) -> ExchangeResult<Ticker> {
        let result: List<TickerEntry> = self
            .public_get(
                "/v5/market/tickers",
                &[("category", "spot".to_string()), ("symbol", symbol.concat())],
            )
            .await?;
        let entry = result.list.into_iter().next().ok_or_else(|| ExchangeError::Parse {
            exchange: ExchangeId::Bybit,
            reason: format!("no ticker for {}", symbol),
        })?;

        let last = parse_decimal(ExchangeId::Bybit, "lastPrice", &entry.last_price)?;
        Ok(Ticker {
            exchange: ExchangeId::Bybit,
            symbol: symbol.clone(),
            bid: parse_decimal(ExchangeId::Bybit, "bid1Price", &entry.bid1_price)?,
            ask: parse_decimal(ExchangeId::Bybit, "ask1Price", &entry.ask1_price)?,
            last: (!last.is_zero()).then_some(last),
            fetched_at: Utc::now(),
        })
    }

    #[instrument(skip_all, fields(exchange = "bybit"))]
    async fn fetch_balance(&self) -> ExchangeResult<Balances> {
        let result: List<WalletAccount> = self
            .signed(
                Method::GET,
                "/v5/account/wallet-balance",
                &[("accountType", "UNIFIED".to_string())],
                None,
            )
            .await?;

        let mut assets = BTreeMap::new();
        for account in result.list {
            for coin in account.coin {
                let total = parse_decimal(ExchangeId::Bybit, "walletBalance", &coin.wallet_balance)?;
                let locked = parse_decimal(ExchangeId::Bybit, "locked", &coin.locked)?;
                assets.insert(
                    coin.coin.to_uppercase(),
                    AssetBalance {
                        free: (total - locked).max(rust_decimal::Decimal::ZERO),
                        locked,
                    },
                );
            }
        }

        Ok(Balances {
            exchange: ExchangeId::Bybit,
            assets,
        })
    }

    #[instrument(skip_all, fields(exchange = "bybit", symbol = %symbol))]
    async fn fetch_trading_fee(&self, symbol: &Symbol) -> ExchangeResult<TradingFee> {
        let result: List<FeeEntry> = self
            .signed(
                Method::GET,
                "/v5/account/fee-rate",
                &[("category", "spot".to_string()), ("symbol", symbol.concat())],
                None,
            )
            .await?;
        let entry = result.list.into_iter().next().ok_or_else(|| ExchangeError::Parse {
            exchange: ExchangeId::Bybit,
            reason: format!("no fee rate for {}", symbol),
        })?;

        let hundred = rust_decimal::Decimal::ONE_HUNDRED;
        Ok(TradingFee {
            maker_pct: parse_decimal(ExchangeId::Bybit, "makerFeeRate", &entry.maker_fee_rate)?
                * hundred,
            taker_pct: parse_decimal(ExchangeId::Bybit, "takerFeeRate", &entry.taker_fee_rate)?
                * hundred,
        })
    }

    #[instrument(skip_all, fields(exchange = "bybit", symbol = %order.symbol, side = %order.side, quantity = %order.quantity))]
    async fn create_market_order(&self, order: &MarketOrder) -> ExchangeResult<OrderReceipt> {
        let side = match order.side {
            OrderSide::Buy => "Buy",
            OrderSide::Sell => "Sell",
        };
        let body = json!({
            "category": "spot",
            "symbol": order.symbol.concat(),
            "side": side,
            "orderType": "Market",
            "qty": order.quantity.normalize().to_string(),
            "marketUnit": "baseCoin",
        });

        let created: OrderCreated = self
            .signed(Method::POST, "/v5/order/create", &[], Some(body))
            .await?;

        Ok(OrderReceipt {
            order_id: created.order_id,
            exchange: ExchangeId::Bybit,
            side: order.side,
            quantity: order.quantity,
            filled_quantity: None,
            average_price: None,
            status: None,
        })
    }
}
