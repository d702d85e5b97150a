//! Application configuration loaded from environment variables.

use std::path::PathBuf;

use rust_decimal::Decimal;
use serde::Deserialize;

use crate::exchange::ExchangeId;
use crate::security::CredentialCipher;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    // === Telegram ===
    /// Bot token issued by BotFather.
    #[serde(default)]
    pub telegram_bot_token: String,

    /// Only this chat may issue commands when set.
    #[serde(default)]
    pub authorized_chat_id: Option<i64>,

    // === Credentials at rest ===
    /// Fernet key used to encrypt stored API credentials.
    #[serde(default)]
    pub encryption_key: String,

    // === Storage ===
    /// Directory holding the JSON state files.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    // === Fees ===
    /// Hours before a cached fee is refetched.
    #[serde(default = "default_fee_cache_ttl_hours")]
    pub fee_cache_ttl_hours: i64,

    /// Fee percent assumed when an exchange fee lookup fails.
    #[serde(default = "default_fee_percent")]
    pub default_fee_percent: Decimal,

    // === Exchanges ===
    /// Exchange HTTP timeout in milliseconds.
    #[serde(default = "default_http_timeout_ms")]
    pub http_timeout_ms: u64,

    /// Decimal places kept on order quantities (rounded down).
    #[serde(default = "default_quantity_decimals")]
    pub quantity_decimals: u32,

    /// Connect newly added exchanges to their testnet/demo environment.
    #[serde(default)]
    pub exchange_testnet: bool,

    /// Binance REST endpoint override (e.g. an outbound proxy).
    #[serde(default)]
    pub binance_base_url: Option<String>,

    /// MEXC REST endpoint override.
    #[serde(default)]
    pub mexc_base_url: Option<String>,

    /// OKX REST endpoint override.
    #[serde(default)]
    pub okx_base_url: Option<String>,

    /// Bybit REST endpoint override.
    #[serde(default)]
    pub bybit_base_url: Option<String>,

    // === Server Configuration ===
    /// HTTP server port for health/metrics endpoints.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Serve the health/status/metrics HTTP API.
    #[serde(default = "default_true")]
    pub api_enabled: bool,

    /// Log output format: `pretty` or `json`.
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_fee_cache_ttl_hours() -> i64 {
    24
}

fn default_fee_percent() -> Decimal {
    Decimal::new(1, 1) // 0.1%
}

fn default_http_timeout_ms() -> u64 {
    10_000
}

fn default_quantity_decimals() -> u32 {
    6
}

fn default_port() -> u16 {
    8080
}

fn default_true() -> bool {
    true
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            telegram_bot_token: String::new(),
            authorized_chat_id: None,
            encryption_key: String::new(),
            data_dir: default_data_dir(),
            fee_cache_ttl_hours: default_fee_cache_ttl_hours(),
            default_fee_percent: default_fee_percent(),
            http_timeout_ms: default_http_timeout_ms(),
            quantity_decimals: default_quantity_decimals(),
            exchange_testnet: false,
            binance_base_url: None,
            mexc_base_url: None,
            okx_base_url: None,
            bybit_base_url: None,
            port: default_port(),
            api_enabled: true,
            log_format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from environment, reading .env file first.
    pub fn load() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    /// Check if the configuration is valid for running the bot.
    pub fn validate(&self) -> Result<(), String> {
        if self.telegram_bot_token.trim().is_empty() {
            return Err("TELEGRAM_BOT_TOKEN is required".to_string());
        }

        self.validate_offline()
    }

    /// Validation for commands that never talk to Telegram.
    pub fn validate_offline(&self) -> Result<(), String> {
        if self.encryption_key.trim().is_empty() {
            return Err(
                "ENCRYPTION_KEY is required (generate one with `spread-arb-bot generate-key`)"
                    .to_string(),
            );
        }

        if CredentialCipher::new(&self.encryption_key).is_err() {
            return Err("ENCRYPTION_KEY must be a url-safe base64 32-byte Fernet key".to_string());
        }

        if self.fee_cache_ttl_hours <= 0
            || chrono::Duration::try_hours(self.fee_cache_ttl_hours).is_none()
        {
            return Err("FEE_CACHE_TTL_HOURS must be a positive number of hours".to_string());
        }

        if self.default_fee_percent < Decimal::ZERO || self.default_fee_percent >= Decimal::ONE_HUNDRED {
            return Err("DEFAULT_FEE_PERCENT must be between 0 and 100".to_string());
        }

        if self.quantity_decimals > 16 {
            return Err("QUANTITY_DECIMALS must be at most 16".to_string());
        }

        if !matches!(self.log_format.as_str(), "pretty" | "json") {
            return Err("LOG_FORMAT must be `pretty` or `json`".to_string());
        }

        Ok(())
    }

    /// Fee cache TTL as a chrono duration.
    /// Out-of-range values fall back to the default TTL.
    pub fn fee_cache_ttl(&self) -> chrono::Duration {
        chrono::Duration::try_hours(self.fee_cache_ttl_hours)
            .filter(|ttl| *ttl > chrono::Duration::zero())
            .or_else(|| chrono::Duration::try_hours(default_fee_cache_ttl_hours()))
            .unwrap_or_else(chrono::Duration::zero)
    }

    /// Configured REST endpoint override for an exchange.
    pub fn base_url(&self, exchange: ExchangeId) -> Option<&str> {
        let url = match exchange {
            ExchangeId::Binance => &self.binance_base_url,
            ExchangeId::Mexc => &self.mexc_base_url,
            ExchangeId::Okx => &self.okx_base_url,
            ExchangeId::Bybit => &self.bybit_base_url,
        };
        url.as_deref().map(str::trim).filter(|u| !u.is_empty())
    }

    /// Whether JSON log output was requested.
    pub fn json_logs(&self) -> bool {
        self.log_format == "json"
    }
}
