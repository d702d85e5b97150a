//! Telegram-driven cross-exchange spot arbitrage bot.
//!
//! The bot watches the same spot pair on several exchanges. When one venue's
//! best ask is below another's best bid by more than the fees on both legs,
//! it buys on the cheap venue and sells on the expensive one:
//!
//! ```text
//! buy  BTC/USDT on mexc    @ 100.00 (taker 0.10%)
//! sell BTC/USDT on binance @ 101.00 (taker 0.10%)
//! ──────────────────────────────────────────────
//! 1000 USDT -> gross +10.00, fees -2.01, net +7.99
//! ```
//!
//! Opportunities are only found and executed on request from chat.
//!
//! # Modules
//!
//! - [`config`]: Configuration loading from environment
//! - [`error`]: Unified error types
//! - [`exchange`]: Exchange connectors and the connector registry
//! - [`fees`]: Trading fee cache
//! - [`arbitrage`]: Spread detection, profit math, risk checks and execution
//! - [`portfolio`]: Position tracking and inventory drift
//! - [`storage`]: JSON state files and encrypted credentials
//! - [`bot`]: Chat commands and the Telegram front end
//! - [`api`]: HTTP API for health/status/metrics

pub mod api;
pub mod arbitrage;
pub mod bot;
pub mod config;
pub mod error;
pub mod exchange;
pub mod fees;
pub mod metrics;
pub mod portfolio;
pub mod security;
pub mod storage;

pub use config::Config;
pub use error::{BotError, Result};
