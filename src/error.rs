//! Unified error types for the arbitrage bot.

use rust_decimal::Decimal;
use thiserror::Error;

use crate::exchange::{ExchangeId, OrderSide};

/// Unified error type for the arbitrage bot.
#[derive(Error, Debug)]
pub enum BotError {
    /// Configuration loading error.
    #[error("configuration error: {0}")]
    Config(#[from] envy::Error),

    /// Exchange connector error.
    #[error("exchange error: {0}")]
    Exchange(#[from] ExchangeError),

    /// Arbitrage detection/pricing error.
    #[error("arbitrage error: {0}")]
    Arbitrage(#[from] ArbitrageError),

    /// Trading/order error.
    #[error("trading error: {0}")]
    Trading(#[from] TradingError),

    /// Persistence error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Credential encryption error.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Bad command arguments supplied by the user.
    #[error("{0}")]
    Usage(String),
}

impl BotError {
    /// Message suitable for showing to a chat user.
    pub fn user_message(&self) -> String {
        match self {
            BotError::Exchange(e) => e.user_message(),
            BotError::Trading(TradingError::OrderFailed { leg, exchange, source }) => format!(
                "{} order on {} failed: {}",
                leg,
                exchange,
                source.user_message()
            ),
            BotError::Usage(msg) => msg.clone(),
            other => other.to_string(),
        }
    }
}

/// Exchange connector errors.
#[derive(Error, Debug)]
pub enum ExchangeError {
    /// Exchange name not recognised.
    #[error("unsupported exchange: {0}")]
    Unsupported(String),

    /// No live connector for the exchange.
    #[error("exchange {0} is not connected")]
    NotConnected(ExchangeId),

    /// Exchange needs a passphrase and none was given.
    #[error("{0} requires an API passphrase")]
    MissingPassphrase(ExchangeId),

    /// HTTP transport failure.
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success HTTP status with the exchange's error payload.
    #[error("{exchange} API error (HTTP {status}): {message}")]
    Api {
        /// Exchange that answered.
        exchange: ExchangeId,
        /// HTTP status code.
        status: u16,
        /// Error body or message.
        message: String,
    },

    /// Request accepted over HTTP but rejected in the response envelope.
    #[error("{exchange} rejected request (code {code}): {message}")]
    Rejected {
        /// Exchange that answered.
        exchange: ExchangeId,
        /// Exchange-specific error code.
        code: String,
        /// Exchange-specific message.
        message: String,
    },

    /// Response could not be understood.
    #[error("failed to parse {exchange} response: {reason}")]
    Parse {
        /// Exchange that answered.
        exchange: ExchangeId,
        /// What went wrong.
        reason: String,
    },

    /// The exchange API offers no endpoint for the operation.
    #[error("{exchange} does not support {operation}")]
    NotSupported {
        /// Exchange asked.
        exchange: ExchangeId,
        /// Operation requested.
        operation: &'static str,
    },

    /// Request signing failed.
    #[error("signing error: {0}")]
    Signing(String),

    /// Injected failure from the in-memory exchange.
    #[error("{exchange}: {message}")]
    Simulated {
        /// Exchange reporting the failure.
        exchange: ExchangeId,
        /// Failure text.
        message: String,
    },
}

impl ExchangeError {
    /// Classify the error into a message a chat user can act on.
    pub fn user_message(&self) -> String {
        let text = self.to_string();
        let lower = text.to_lowercase();

        if lower.contains("invalid api") || lower.contains("api-key format invalid") {
            "Invalid API Key or Secret".to_string()
        } else if lower.contains("ip") && lower.contains("whitelist") {
            "IP not whitelisted. Add this server's IP to the API key whitelist".to_string()
        } else if lower.contains("permission") {
            "Insufficient permissions. Enable reading and spot trading on the API key".to_string()
        } else if lower.contains("passphrase") {
            "Invalid passphrase".to_string()
        } else if matches!(self, ExchangeError::Api { status: 400 | 401 | 403, .. }) {
            format!("Authentication failed ({}). Check your API credentials", text)
        } else {
            text
        }
    }
}

/// Arbitrage pricing errors.
#[derive(Error, Debug)]
pub enum ArbitrageError {
    /// Price is zero or negative.
    #[error("invalid price: {0}")]
    InvalidPrice(Decimal),

    /// Trade amount is zero or negative.
    #[error("invalid trade amount: {0}")]
    InvalidAmount(Decimal),

    /// Fee percent is negative.
    #[error("invalid fee percent: {0}")]
    InvalidFee(Decimal),

    /// Arithmetic overflowed.
    #[error("arithmetic overflow while pricing opportunity")]
    Overflow,
}

/// Trading and order execution errors.
#[derive(Error, Debug)]
pub enum TradingError {
    /// Could not read prices or balances before trading.
    #[error("pre-trade check failed: {0}")]
    PreTrade(#[from] ExchangeError),

    /// Pricing failed during re-verification.
    #[error("pricing failed: {0}")]
    Pricing(#[from] ArbitrageError),

    /// An order leg was rejected and nothing was traded after it.
    #[error("{leg} order on {exchange} failed: {source}")]
    OrderFailed {
        /// Which leg failed.
        leg: OrderSide,
        /// Exchange the order was sent to.
        exchange: ExchangeId,
        /// Underlying connector error.
        #[source]
        source: ExchangeError,
    },
}

/// Persistence errors.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Filesystem failure.
    #[error("io error on {path}: {source}")]
    Io {
        /// File involved.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// File content is not the expected JSON.
    #[error("invalid json in {path}: {source}")]
    Json {
        /// File involved.
        path: String,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },
}

/// Credential encryption errors.
#[derive(Error, Debug)]
pub enum CryptoError {
    /// Key is not a url-safe base64 32-byte Fernet key.
    #[error("ENCRYPTION_KEY is not a valid Fernet key")]
    InvalidKey,

    /// Token failed authentication or decoding.
    #[error("failed to decrypt stored credential")]
    Decrypt,
}

/// Convenient Result type alias.
pub type Result<T> = std::result::Result<T, BotError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_invalid_key() {
        let err = ExchangeError::Api {
            exchange: ExchangeId::Binance,
            status: 401,
            message: "Invalid API-key, IP, or permissions for action.".to_string(),
        };
        assert_eq!(err.user_message(), "Invalid API Key or Secret");
    }

    #[test]
    fn classifies_passphrase() {
        let err = ExchangeError::Rejected {
            exchange: ExchangeId::Okx,
            code: "50105".to_string(),
            message: "Passphrase incorrect".to_string(),
        };
        assert_eq!(err.user_message(), "Invalid passphrase");
    }

    #[test]
    fn classifies_auth_status() {
        let err = ExchangeError::Api {
            exchange: ExchangeId::Bybit,
            status: 403,
            message: "forbidden".to_string(),
        };
        assert!(err.user_message().starts_with("Authentication failed"));
    }

    #[test]
    fn passes_through_other_errors() {
        let err = ExchangeError::Parse {
            exchange: ExchangeId::Mexc,
            reason: "missing field".to_string(),
        };
        assert_eq!(err.user_message(), err.to_string());
    }
}
