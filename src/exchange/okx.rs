//! OKX v5 spot REST connector.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Method;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, instrument};

use crate::error::ExchangeError;

use super::signing::{hmac_sha256_base64, timestamp_iso};
use super::{
    api_error, parse_decimal, ApiCredentials, AssetBalance, Balances, Exchange, ExchangeId,
    ExchangeResult, MarketOrder, OrderReceipt, OrderSide, Symbol, Ticker, TradingFee,
};

const OKX_URL: &str = "https://www.okx.com";

/// OKX connector. Demo trading uses the live host plus a header.
#[derive(Debug, Clone)]
pub struct OkxExchange {
    http: reqwest::Client,
    base_url: String,
    credentials: ApiCredentials,
    simulated: bool,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    code: String,
    #[serde(default)]
    msg: String,
    #[serde(default = "Vec::new")]
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TickerData {
    #[serde(default)]
    last: String,
    ask_px: String,
    bid_px: String,
}

#[derive(Debug, Deserialize)]
struct BalanceData {
    #[serde(default)]
    details: Vec<BalanceDetail>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BalanceDetail {
    ccy: String,
    #[serde(default)]
    avail_bal: String,
    #[serde(default)]
    frozen_bal: String,
}

#[derive(Debug, Deserialize)]
struct FeeData {
    maker: String,
    taker: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderData {
    #[serde(default)]
    ord_id: String,
    #[serde(default)]
    s_code: String,
    #[serde(default)]
    s_msg: String,
}

impl OkxExchange {
    /// Live trading, or demo trading when `simulated` is set.
    pub fn new(http: reqwest::Client, credentials: ApiCredentials, simulated: bool) -> Self {
        Self {
            http,
            base_url: OKX_URL.to_string(),
            credentials,
            simulated,
        }
    }

    /// Point the connector at another host.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn request_path(path: &str, params: &[(&str, String)]) -> String {
        if params.is_empty() {
            return path.to_string();
        }
        let query = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(params.iter().map(|(k, v)| (*k, v.as_str())))
            .finish();
        format!("{}?{}", path, query)
    }

    async fn public_get<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> ExchangeResult<Vec<T>> {
        let url = format!("{}{}", self.base_url, Self::request_path(path, params));
        let response = self.http.get(&url).send().await?;
        self.read(response).await
    }

    /// Signature input is `timestamp + METHOD + requestPath + body`.
    async fn signed<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
        body: Option<serde_json::Value>,
    ) -> ExchangeResult<Vec<T>> {
        let request_path = Self::request_path(path, params);
        let body = body.map(|b| b.to_string()).unwrap_or_default();
        let timestamp = timestamp_iso();
        let prehash = format!("{}{}{}{}", timestamp, method.as_str(), request_path, body);
        let signature = hmac_sha256_base64(&self.credentials.secret, &prehash)?;

        debug!(method = %method, path = %request_path, "Signed OKX request");

        let mut request = self
            .http
            .request(method, format!("{}{}", self.base_url, request_path))
            .header("OK-ACCESS-KEY", &self.credentials.api_key)
            .header("OK-ACCESS-SIGN", signature)
            .header("OK-ACCESS-TIMESTAMP", timestamp)
            .header(
                "OK-ACCESS-PASSPHRASE",
                self.credentials.passphrase.as_deref().unwrap_or_default(),
            )
            .header("Content-Type", "application/json");
        if self.simulated {
            request = request.header("x-simulated-trading", "1");
        }
        if !body.is_empty() {
            request = request.body(body);
        }

        let response = request.send().await?;
        self.read(response).await
    }

    async fn read<T: DeserializeOwned>(&self, response: reqwest::Response) -> ExchangeResult<Vec<T>> {
        if !response.status().is_success() {
            return Err(api_error(ExchangeId::Okx, response).await);
        }
        let envelope: Envelope<serde_json::Value> =
            response.json().await.map_err(|e| ExchangeError::Parse {
                exchange: ExchangeId::Okx,
                reason: e.to_string(),
            })?;

        if envelope.code != "0" {
            // Order endpoints put the useful reason in data[0].sMsg.
            let detail = envelope
                .data
                .first()
                .and_then(|d| d.get("sMsg"))
                .and_then(|m| m.as_str())
                .filter(|m| !m.is_empty())
                .map(str::to_string);
            return Err(ExchangeError::Rejected {
                exchange: ExchangeId::Okx,
                code: envelope.code,
                message: detail.unwrap_or(envelope.msg),
            });
        }

        envelope
            .data
            .into_iter()
            .map(|value| {
                serde_json::from_value(value).map_err(|e| ExchangeError::Parse {
                    exchange: ExchangeId::Okx,
                    reason: e.to_string(),
                })
            })
            .collect()
    }

    fn first<T>(data: Vec<T>, what: &str) -> ExchangeResult<T> {
        data.into_iter().next().ok_or_else(|| ExchangeError::Parse {
            exchange: ExchangeId::Okx,
            reason: format!("empty {} response", what),
        })
    }
}

#[async_trait]
impl Exchange for OkxExchange {
    fn id(&self) -> ExchangeId {
        ExchangeId::Okx
    }

    #[instrument(skip_all, fields(exchange = "okx", symbol = %symbol))]
    async fn fetch_ticker(&self, symbol: &Symbol) -> ExchangeResult<Ticker> {
        let data: Vec<TickerData> = self
            .public_get("/api/v5/market/ticker", &[("instId", symbol.dashed())])
            .await?;
        let ticker = Self::first(data, "ticker")?;

        let last = parse_decimal(ExchangeId::Okx, "last", &ticker.last)?;
        Ok(Ticker {
            exchange: ExchangeId::Okx,
            symbol: symbol.clone(),
            bid: parse_decimal(ExchangeId::Okx, "bidPx", &ticker.bid_px)?,
            ask: parse_decimal(ExchangeId::Okx, "askPx", &ticker.ask_px)?,
            last: (!last.is_zero()).then_some(last),
            fetched_at: Utc::now(),
        })
    }

    #[instrument(skip_all, fields(exchange = "okx"))]
    async fn fetch_balance(&self) -> ExchangeResult<Balances> {
        let data: Vec<BalanceData> = self
            .signed(Method::GET, "/api/v5/account/balance", &[], None)
            .await?;

        let mut assets = BTreeMap::new();
        for account in data {
            for detail in account.details {
                assets.insert(
                    detail.ccy.to_uppercase(),
                    AssetBalance {
                        free: parse_decimal(ExchangeId::Okx, "availBal", &detail.avail_bal)?,
                        locked: parse_decimal(ExchangeId::Okx, "frozenBal", &detail.frozen_bal)?,
                    },
                );
            }
        }

        Ok(Balances {
            exchange: ExchangeId::Okx,
            assets,
        })
    }

    #[instrument(skip_all, fields(exchange = "okx", symbol = %symbol))]
    async fn fetch_trading_fee(&self, symbol: &Symbol) -> ExchangeResult<TradingFee> {
        let data: Vec<FeeData> = self
            .signed(
                Method::GET,
                "/api/v5/account/trade-fee",
                &[("instType", "SPOT".to_string()), ("instId", symbol.dashed())],
                None,
            )
            .await?;
        let fee = Self::first(data, "trade-fee")?;

        // OKX signs fees from the account's side: -0.001 is 0.1% charged and
        // a positive rate is a rebate. Rebates count as zero cost.
        let charged = |field: &str, raw: &str| -> ExchangeResult<Decimal> {
            let rate = -parse_decimal(ExchangeId::Okx, field, raw)?;
            Ok(rate.max(Decimal::ZERO) * Decimal::ONE_HUNDRED)
        };
        Ok(TradingFee {
            maker_pct: charged("maker", &fee.maker)?,
            taker_pct: charged("taker", &fee.taker)?,
        })
    }

    #[instrument(skip_all, fields(exchange = "okx", symbol = %order.symbol, side = %order.side, quantity = %order.quantity))]
    async fn create_market_order(&self, order: &MarketOrder) -> ExchangeResult<OrderReceipt> {
        let side = match order.side {
            OrderSide::Buy => "buy",
            OrderSide::Sell => "sell",
        };
        let body = json!({
            "instId": order.symbol.dashed(),
            "tdMode": "cash",
            "side": side,
            "ordType": "market",
            "sz": order.quantity.normalize().to_string(),
            "tgtCcy": "base_ccy",
        });

        let data: Vec<OrderData> = self
            .signed(Method::POST, "/api/v5/trade/order", &[], Some(body))
            .await?;
        let placed = Self::first(data, "order")?;

        if placed.s_code != "0" && !placed.s_code.is_empty() {
            return Err(ExchangeError::Rejected {
                exchange: ExchangeId::Okx,
                code: placed.s_code,
                message: placed.s_msg,
            });
        }

        Ok(OrderReceipt {
            order_id: placed.ord_id,
            exchange: ExchangeId::Okx,
            side: order.side,
            quantity: order.quantity,
            filled_quantity: None,
            average_price: None,
            status: None,
        })
    }
}
