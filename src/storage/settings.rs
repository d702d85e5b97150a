//! Trading settings editable from chat.

use std::path::{Path, PathBuf};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::StorageError;
use crate::exchange::Symbol;

use super::{read_json, write_json};

/// Per-trade parameters, replaced wholesale by `/setconfig`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeConfig {
    /// Quote-currency amount spent on the buy leg.
    #[serde(rename = "trade_amount_usdt")]
    pub trade_amount: Decimal,
    /// Minimum net profit in quote currency.
    #[serde(rename = "min_profit_usd")]
    pub min_profit: Decimal,
    /// Minimum gross spread percent for an opportunity to be reported.
    #[serde(rename = "min_spread_percent_gross")]
    pub min_spread_pct: Decimal,
}

impl Default for TradeConfig {
    fn default() -> Self {
        Self {
            trade_amount: Decimal::new(100, 0),
            min_profit: Decimal::new(5, 0),
            min_spread_pct: Decimal::new(5, 1),
        }
    }
}

impl TradeConfig {
    /// Check values a user typed into `/setconfig`.
    pub fn validate(&self) -> Result<(), String> {
        if self.trade_amount <= Decimal::ZERO {
            return Err("trade amount must be positive".to_string());
        }
        if self.min_profit < Decimal::ZERO {
            return Err("minimum profit cannot be negative".to_string());
        }
        if self.min_spread_pct < Decimal::ZERO {
            return Err("minimum spread cannot be negative".to_string());
        }
        Ok(())
    }
}

/// Limits every scanned opportunity is validated against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskLimits {
    /// Minimum spread after fees, in percent of trade amount.
    pub min_spread_percent_net: Decimal,
    /// Largest allowed trade amount in quote currency.
    pub max_position_size_usd: Decimal,
    /// Largest share of gross profit fees may consume, in percent.
    pub max_fee_impact_percent: Decimal,
    /// Overall inventory drift that blocks trading, in percent.
    pub max_inventory_drift_percent: Decimal,
    /// Per-exchange inventory drift that blocks trading, in percent.
    pub max_per_exchange_drift_percent: Decimal,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            min_spread_percent_net: Decimal::new(3, 1),
            max_position_size_usd: Decimal::new(500, 0),
            max_fee_impact_percent: Decimal::new(50, 0),
            max_inventory_drift_percent: Decimal::new(15, 0),
            max_per_exchange_drift_percent: Decimal::new(20, 0),
        }
    }
}

/// Contents of `settings.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Per-trade parameters.
    #[serde(default)]
    pub trading_config: TradeConfig,
    /// Ordered, de-duplicated pairs to scan.
    #[serde(default)]
    pub trading_pairs: Vec<Symbol>,
    /// Risk limits.
    #[serde(default)]
    pub risk_limits: RiskLimits,
}

/// Settings file with its in-memory copy.
#[derive(Debug)]
pub struct SettingsStore {
    path: PathBuf,
    settings: Settings,
}

impl SettingsStore {
    /// Load settings, writing defaults when the file does not exist yet.
    pub async fn load_or_init(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let settings = match read_json::<Settings>(&path).await? {
            Some(settings) => settings,
            None => {
                let settings = Settings::default();
                write_json(&path, &settings).await?;
                info!(path = %path.display(), "Created default settings");
                settings
            }
        };
        Ok(Self { path, settings })
    }

    /// Current settings.
    pub fn get(&self) -> &Settings {
        &self.settings
    }

    /// Replace the trade config and persist.
    pub async fn set_trade_config(&mut self, config: TradeConfig) -> Result<(), StorageError> {
        let mut next = self.settings.clone();
        next.trading_config = config;
        self.replace(next).await
    }

    /// Replace the pair list and persist.
    pub async fn set_pairs(&mut self, pairs: Vec<Symbol>) -> Result<(), StorageError> {
        let mut next = self.settings.clone();
        next.trading_pairs = pairs;
        self.replace(next).await
    }

    async fn replace(&mut self, next: Settings) -> Result<(), StorageError> {
        write_json(&self.path, &next).await?;
        self.settings = next;
        Ok(())
    }
}

/// Split user input into pairs.
///
/// Accepts commas, whitespace and newlines as separators. Returns the valid
/// pairs in first-seen order without duplicates, plus the rejected tokens.
pub fn parse_pairs(input: &str) -> (Vec<Symbol>, Vec<String>) {
    let mut pairs: Vec<Symbol> = Vec::new();
    let mut invalid = Vec::new();

    for token in input
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|t| !t.is_empty())
    {
        match token.parse::<Symbol>() {
            Ok(symbol) => {
                if !pairs.contains(&symbol) {
                    pairs.push(symbol);
                }
            }
            Err(_) => invalid.push(token.to_string()),
        }
    }

    (pairs, invalid)
}
