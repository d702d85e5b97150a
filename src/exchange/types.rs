//! Exchange-agnostic market and account types.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

/// Supported exchange identifiers.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ExchangeId {
    /// Binance spot.
    Binance,
    /// MEXC spot (Binance-compatible REST).
    Mexc,
    /// OKX spot.
    Okx,
    /// Bybit spot (v5 unified account).
    Bybit,
}

impl ExchangeId {
    /// Lowercase name used in commands and state files.
    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeId::Binance => "binance",
            ExchangeId::Mexc => "mexc",
            ExchangeId::Okx => "okx",
            ExchangeId::Bybit => "bybit",
        }
    }

    /// Whether API keys for this exchange carry a passphrase.
    pub fn requires_passphrase(&self) -> bool {
        matches!(self, ExchangeId::Okx)
    }

    /// Comma-separated list of every supported exchange name.
    pub fn supported_list() -> String {
        use strum::IntoEnumIterator;
        ExchangeId::iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    /// Buy order.
    #[strum(serialize = "buy")]
    Buy,
    /// Sell order.
    #[strum(serialize = "sell")]
    Sell,
}

static SYMBOL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z0-9]{1,15}/[A-Z0-9]{2,10}$").expect("valid regex"));

/// A spot pair written `BASE/QUOTE`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Symbol {
    /// Asset being bought or sold.
    pub base: String,
    /// Asset the price is quoted in.
    pub quote: String,
}

impl Symbol {
    /// Build a symbol from its two assets.
    pub fn new(base: impl Into<String>, quote: impl Into<String>) -> Self {
        Self {
            base: base.into().to_uppercase(),
            quote: quote.into().to_uppercase(),
        }
    }

    /// `BTCUSDT` form used by Binance, MEXC and Bybit.
    pub fn concat(&self) -> String {
        format!("{}{}", self.base, self.quote)
    }

    /// `BTC-USDT` form used by OKX.
    pub fn dashed(&self) -> String {
        format!("{}-{}", self.base, self.quote)
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base, self.quote)
    }
}

impl FromStr for Symbol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_uppercase();
        if !SYMBOL_RE.is_match(&normalized) {
            return Err(format!("invalid pair `{}` (expected BASE/QUOTE)", s.trim()));
        }
        let (base, quote) = normalized
            .split_once('/')
            .ok_or_else(|| format!("invalid pair `{}`", s.trim()))?;
        Ok(Symbol::new(base, quote))
    }
}

impl TryFrom<String> for Symbol {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Symbol> for String {
    fn from(symbol: Symbol) -> Self {
        symbol.to_string()
    }
}

/// Best bid/ask for a pair on one exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct Ticker {
    /// Exchange that quoted the price.
    pub exchange: ExchangeId,
    /// Quoted pair.
    pub symbol: Symbol,
    /// Best bid (what a market sell receives).
    pub bid: Decimal,
    /// Best ask (what a market buy pays).
    pub ask: Decimal,
    /// Last traded price, when the endpoint reports one.
    pub last: Option<Decimal>,
    /// When the quote was fetched.
    pub fetched_at: DateTime<Utc>,
}

impl Ticker {
    /// Both sides of the book are positive.
    pub fn is_valid(&self) -> bool {
        self.bid > Decimal::ZERO && self.ask > Decimal::ZERO
    }
}

/// Free and locked amount of one asset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetBalance {
    /// Available for trading.
    pub free: Decimal,
    /// Reserved by open orders.
    pub locked: Decimal,
}

impl AssetBalance {
    /// Free plus locked.
    pub fn total(&self) -> Decimal {
        self.free + self.locked
    }
}

/// Account balances on one exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct Balances {
    /// Exchange the balances belong to.
    pub exchange: ExchangeId,
    /// Per-asset balances, keyed by uppercase asset code.
    pub assets: BTreeMap<String, AssetBalance>,
}

impl Balances {
    /// Free balance of an asset, zero when absent.
    pub fn free(&self, asset: &str) -> Decimal {
        self.assets
            .get(&asset.to_uppercase())
            .map(|b| b.free)
            .unwrap_or(Decimal::ZERO)
    }

    /// Assets with a positive free balance.
    pub fn non_zero(&self) -> impl Iterator<Item = (&String, &AssetBalance)> {
        self.assets.iter().filter(|(_, b)| b.free > Decimal::ZERO)
    }
}

/// Maker/taker fee in percent (0.1 means 0.1%).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradingFee {
    /// Maker fee percent.
    pub maker_pct: Decimal,
    /// Taker fee percent.
    pub taker_pct: Decimal,
}

impl TradingFee {
    /// Same percent for maker and taker.
    pub fn flat(pct: Decimal) -> Self {
        Self {
            maker_pct: pct,
            taker_pct: pct,
        }
    }
}

/// Market order request in base-asset quantity.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketOrder {
    /// Pair to trade.
    pub symbol: Symbol,
    /// Buy or sell.
    pub side: OrderSide,
    /// Base-asset quantity.
    pub quantity: Decimal,
}

/// What the exchange reported back for a placed order.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderReceipt {
    /// Exchange order id.
    pub order_id: String,
    /// Exchange the order was placed on.
    pub exchange: ExchangeId,
    /// Side of the order.
    pub side: OrderSide,
    /// Quantity requested.
    pub quantity: Decimal,
    /// Filled base quantity, when reported.
    pub filled_quantity: Option<Decimal>,
    /// Average fill price, when reported.
    pub average_price: Option<Decimal>,
    /// Raw exchange status, when reported.
    pub status: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn exchange_id_parses_case_insensitively() {
        assert_eq!("Binance".parse::<ExchangeId>().unwrap(), ExchangeId::Binance);
        assert_eq!("OKX".parse::<ExchangeId>().unwrap(), ExchangeId::Okx);
        assert!("kraken".parse::<ExchangeId>().is_err());
        assert_eq!(ExchangeId::Bybit.to_string(), "bybit");
    }

    #[test]
    fn supported_list_names_every_exchange() {
        assert_eq!(ExchangeId::supported_list(), "binance, mexc, okx, bybit");
    }

    #[test]
    fn symbol_parses_and_normalizes() {
        let symbol: Symbol = " btc/usdt ".parse().unwrap();
        assert_eq!(symbol, Symbol::new("BTC", "USDT"));
        assert_eq!(symbol.concat(), "BTCUSDT");
        assert_eq!(symbol.dashed(), "BTC-USDT");
        assert_eq!(symbol.to_string(), "BTC/USDT");
    }

    #[test]
    fn symbol_rejects_malformed_input() {
        assert!("BTCUSDT".parse::<Symbol>().is_err());
        assert!("BTC/".parse::<Symbol>().is_err());
        assert!("BTC-USDT".parse::<Symbol>().is_err());
        assert!("BTC/USDT/X".parse::<Symbol>().is_err());
    }

    #[test]
    fn symbol_serializes_as_string() {
        let json = serde_json::to_string(&Symbol::new("ETH", "USDT")).unwrap();
        assert_eq!(json, "\"ETH/USDT\"");
        let back: Symbol = serde_json::from_str(&json).unwrap();
        assert_eq!(back.base, "ETH");
    }

    #[test]
    fn balances_free_defaults_to_zero() {
        let mut assets = BTreeMap::new();
        assets.insert(
            "USDT".to_string(),
            AssetBalance {
                free: dec!(100),
                locked: dec!(5),
            },
        );
        let balances = Balances {
            exchange: ExchangeId::Binance,
            assets,
        };

        assert_eq!(balances.free("usdt"), dec!(100));
        assert_eq!(balances.free("BTC"), Decimal::ZERO);
        assert_eq!(balances.assets["USDT"].total(), dec!(105));
    }
}
