//! Exchange connectors.
//!
//! Each supported exchange implements [`Exchange`] over its public REST API.
//! [`ExchangeManager`] owns the live connectors and [`MockExchange`] is an
//! in-memory stand-in used by tests and the one-shot CLI scan.

pub mod binance;
pub mod bybit;
pub mod manager;
pub mod mock;
pub mod okx;
pub mod signing;
pub mod types;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::error::ExchangeError;

pub use binance::BinanceExchange;
pub use bybit::BybitExchange;
pub use manager::ExchangeManager;
pub use mock::{MockConfig, MockExchange};
pub use okx::OkxExchange;
pub use types::{
    AssetBalance, Balances, ExchangeId, MarketOrder, OrderReceipt, OrderSide, Symbol, Ticker,
    TradingFee,
};

/// Result alias for connector calls.
pub type ExchangeResult<T> = std::result::Result<T, ExchangeError>;

/// API credentials for one exchange account.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiCredentials {
    /// API key.
    pub api_key: String,
    /// API secret.
    pub secret: String,
    /// Passphrase (OKX).
    pub passphrase: Option<String>,
}

impl fmt::Debug for ApiCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiCredentials")
            .field("api_key", &"<redacted>")
            .field("secret", &"<redacted>")
            .field("passphrase", &self.passphrase.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Trading operations the bot needs from a spot exchange.
#[async_trait]
pub trait Exchange: Send + Sync {
    /// Which exchange this connector talks to.
    fn id(&self) -> ExchangeId;

    /// Make one authenticated call to prove the credentials work.
    async fn verify_credentials(&self) -> ExchangeResult<()> {
        self.fetch_balance().await.map(|_| ())
    }

    /// Best bid/ask for a pair.
    async fn fetch_ticker(&self, symbol: &Symbol) -> ExchangeResult<Ticker>;

    /// Free and locked balance per asset.
    async fn fetch_balance(&self) -> ExchangeResult<Balances>;

    /// Account maker/taker fee for a pair, in percent.
    async fn fetch_trading_fee(&self, symbol: &Symbol) -> ExchangeResult<TradingFee>;

    /// Place a market order sized in base-asset quantity.
    async fn create_market_order(&self, order: &MarketOrder) -> ExchangeResult<OrderReceipt>;
}

/// Build the REST connector for an exchange. `base_url` replaces the
/// exchange's default endpoint when set.
pub fn build_connector(
    id: ExchangeId,
    http: reqwest::Client,
    credentials: ApiCredentials,
    testnet: bool,
    base_url: Option<&str>,
) -> ExchangeResult<Arc<dyn Exchange>> {
    let connector: Arc<dyn Exchange> = match id {
        ExchangeId::Binance | ExchangeId::Mexc => {
            let connector = if id == ExchangeId::Binance {
                BinanceExchange::binance(http, credentials, testnet)
            } else {
                BinanceExchange::mexc(http, credentials)
            };
            match base_url {
                Some(url) => Arc::new(connector.with_base_url(url)),
                None => Arc::new(connector),
            }
        }
        ExchangeId::Okx => {
            if credentials.passphrase.as_deref().map_or(true, str::is_empty) {
                return Err(ExchangeError::MissingPassphrase(id));
            }
            let connector = OkxExchange::new(http, credentials, testnet);
            match base_url {
                Some(url) => Arc::new(connector.with_base_url(url)),
                None => Arc::new(connector),
            }
        }
        ExchangeId::Bybit => {
            let connector = BybitExchange::new(http, credentials, testnet);
            match base_url {
                Some(url) => Arc::new(connector.with_base_url(url)),
                None => Arc::new(connector),
            }
        }
    };
    Ok(connector)
}

/// Parse a decimal string field from an exchange payload. Empty strings read
/// as zero, since several APIs send `""` for absent balances.
pub(crate) fn parse_decimal(exchange: ExchangeId, field: &str, value: &str) -> ExchangeResult<Decimal> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(Decimal::ZERO);
    }
    value
        .parse::<Decimal>()
        .or_else(|_| Decimal::from_scientific(value))
        .map_err(|e| ExchangeError::Parse {
            exchange,
            reason: format!("{} = {:?}: {}", field, value, e),
        })
}

/// Read an error response body, keeping the HTTP status.
pub(crate) async fn api_error(exchange: ExchangeId, response: reqwest::Response) -> ExchangeError {
    let status = response.status().as_u16();
    let message = response
        .text()
        .await
        .unwrap_or_else(|e| format!("<unreadable body: {}>", e));
    ExchangeError::Api {
        exchange,
        status,
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn parse_decimal_handles_empty_and_scientific() {
        assert_eq!(parse_decimal(ExchangeId::Okx, "x", "").unwrap(), Decimal::ZERO);
        assert_eq!(parse_decimal(ExchangeId::Okx, "x", "1.50").unwrap(), dec!(1.5));
        assert_eq!(parse_decimal(ExchangeId::Okx, "x", "1e-4").unwrap(), dec!(0.0001));
        assert!(parse_decimal(ExchangeId::Okx, "x", "abc").is_err());
    }

    #[test]
    fn credentials_debug_is_redacted() {
        let creds = ApiCredentials {
            api_key: "visible-key".to_string(),
            secret: "visible-secret".to_string(),
            passphrase: Some("visible-pass".to_string()),
        };
        let debug = format!("{:?}", creds);
        assert!(!debug.contains("visible"));
    }

    #[test]
    fn okx_requires_passphrase() {
        let creds = ApiCredentials {
            api_key: "k".to_string(),
            secret: "s".to_string(),
            passphrase: None,
        };
        let result = build_connector(ExchangeId::Okx, reqwest::Client::new(), creds, false, None);
        assert!(matches!(result, Err(ExchangeError::MissingPassphrase(ExchangeId::Okx))));
    }
}
