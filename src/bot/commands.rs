//! Chat commands and their argument parsing.

use rust_decimal::Decimal;
use teloxide::utils::command::BotCommands;

use crate::error::BotError;
use crate::exchange::{ApiCredentials, ExchangeId};
use crate::storage::TradeConfig;

/// Commands understood by the bot.
#[derive(BotCommands, Clone, Debug, PartialEq, Eq)]
#[command(rename_rule = "lowercase", description = "Available commands:")]
pub enum Command {
    #[command(description = "welcome message and quick start")]
    Start,
    #[command(description = "show this help")]
    Help,
    #[command(description = "connect an exchange: <exchange> <api_key> <secret> [passphrase]")]
    AddExchange(String),
    #[command(description = "disconnect an exchange: <exchange>")]
    RemoveExchange(String),
    #[command(description = "list connected exchanges")]
    Exchanges,
    #[command(description = "set trading pairs: BTC/USDT, ETH/USDT")]
    SetPairs(String),
    #[command(description = "set trade config: <trade_amount> <min_profit> <min_spread_pct>")]
    SetConfig(String),
    #[command(description = "show trade config, pairs and risk limits")]
    Config,
    #[command(description = "show balances on connected exchanges")]
    Balance,
    #[command(description = "scan configured pairs for opportunities")]
    Scan,
    #[command(description = "execute opportunity <n> from the last scan")]
    Execute(String),
    #[command(description = "show recent trades")]
    History,
    #[command(description = "show inventory drift and rebalancing suggestions")]
    Drift,
    #[command(description = "take current balances as the drift baseline (after rebalancing)")]
    ResetBaseline,
    #[command(description = "continuous monitoring (not available)")]
    Monitor,
}

impl Command {
    /// Command name used for metrics and logs.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Start => "start",
            Command::Help => "help",
            Command::AddExchange(_) => "addexchange",
            Command::RemoveExchange(_) => "removeexchange",
            Command::Exchanges => "exchanges",
            Command::SetPairs(_) => "setpairs",
            Command::SetConfig(_) => "setconfig",
            Command::Config => "config",
            Command::Balance => "balance",
            Command::Scan => "scan",
            Command::Execute(_) => "execute",
            Command::History => "history",
            Command::Drift => "drift",
            Command::ResetBaseline => "resetbaseline",
            Command::Monitor => "monitor",
        }
    }

    /// Whether the message carries secrets and should be deleted from the chat.
    pub fn carries_secrets(&self) -> bool {
        matches!(self, Command::AddExchange(_))
    }

    /// Full command list for `/help`.
    pub fn help_text() -> String {
        Self::descriptions().to_string()
    }
}

/// Parsed `/addexchange` arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddExchangeArgs {
    /// Exchange to connect.
    pub exchange: ExchangeId,
    /// Credentials to verify and store.
    pub credentials: ApiCredentials,
}

/// Parse an exchange name.
pub fn parse_exchange(name: &str) -> Result<ExchangeId, BotError> {
    name.trim().parse().map_err(|_| {
        BotError::Usage(format!(
            "Unsupported exchange `{}`. Supported: {}",
            name.trim(),
            ExchangeId::supported_list()
        ))
    })
}

/// Parse `<exchange> <api_key> <secret> [passphrase]`.
pub fn parse_add_exchange(args: &str) -> Result<AddExchangeArgs, BotError> {
    let parts: Vec<&str> = args.split_whitespace().collect();
    if !(3..=4).contains(&parts.len()) {
        return Err(BotError::Usage(
            "Usage: /addexchange <exchange> <api_key> <secret> [passphrase]".to_string(),
        ));
    }

    let exchange = parse_exchange(parts[0])?;
    let passphrase = parts.get(3).map(|p| p.to_string());
    if exchange.requires_passphrase() && passphrase.is_none() {
        return Err(BotError::Usage(format!(
            "{} requires a passphrase: /addexchange {} <api_key> <secret> <passphrase>",
            exchange, exchange
        )));
    }

    Ok(AddExchangeArgs {
        exchange,
        credentials: ApiCredentials {
            api_key: parts[1].to_string(),
            secret: parts[2].to_string(),
            passphrase,
        },
    })
}

fn parse_amount(field: &str, value: &str) -> Result<Decimal, BotError> {
    value
        .parse::<Decimal>()
        .map_err(|_| BotError::Usage(format!("Invalid {}: `{}` is not a number", field, value)))
}

/// Parse `<trade_amount> <min_profit> <min_spread_pct>`.
pub fn parse_trade_config(args: &str) -> Result<TradeConfig, BotError> {
    let parts: Vec<&str> = args.split_whitespace().collect();
    let [amount, profit, spread] = parts.as_slice() else {
        return Err(BotError::Usage(
            "Usage: /setconfig <trade_amount> <min_profit> <min_spread_pct>\nExample: /setconfig 100 5 0.5"
                .to_string(),
        ));
    };

    let config = TradeConfig {
        trade_amount: parse_amount("trade amount", amount)?,
        min_profit: parse_amount("minimum profit", profit)?,
        min_spread_pct: parse_amount("minimum spread", spread)?,
    };
    config.validate().map_err(BotError::Usage)?;
    Ok(config)
}

/// Parse a 1-based opportunity number into an index.
pub fn parse_index(args: &str, available: usize) -> Result<usize, BotError> {
    if available == 0 {
        return Err(BotError::Usage(
            "No opportunities to execute. Run /scan first.".to_string(),
        ));
    }
    let usage = || BotError::Usage(format!("Usage: /execute <n> where n is 1..{}", available));
    let n: usize = args.trim().parse().map_err(|_| usage())?;
    if n == 0 || n > available {
        return Err(usage());
    }
    Ok(n - 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn parses_commands_with_arguments() {
        assert_eq!(Command::parse("/scan", "arb_bot").unwrap(), Command::Scan);
        assert_eq!(
            Command::parse("/setpairs BTC/USDT, ETH/USDT", "arb_bot").unwrap(),
            Command::SetPairs("BTC/USDT, ETH/USDT".to_string())
        );
        assert_eq!(
            Command::parse("/execute 2", "arb_bot").unwrap(),
            Command::Execute("2".to_string())
        );
        assert_eq!(
            Command::parse("/resetbaseline", "arb_bot").unwrap(),
            Command::ResetBaseline
        );
        assert!(Command::parse("/unknown", "arb_bot").is_err());
    }

    #[test]
    fn help_lists_every_command() {
        let help = Command::help_text();
        for name in [
            "/addexchange",
            "/setconfig",
            "/execute",
            "/drift",
            "/resetbaseline",
            "/monitor",
        ] {
            assert!(help.contains(name), "missing {}", name);
        }
    }

    #[test]
    fn add_exchange_arguments() {
        let args = parse_add_exchange("Binance key secret").unwrap();
        assert_eq!(args.exchange, ExchangeId::Binance);
        assert_eq!(args.credentials.api_key, "key");
        assert_eq!(args.credentials.passphrase, None);

        let args = parse_add_exchange("okx key secret pass").unwrap();
        assert_eq!(args.credentials.passphrase.as_deref(), Some("pass"));
    }

    #[test]
    fn add_exchange_rejects_bad_input() {
        assert!(matches!(parse_add_exchange("binance key"), Err(BotError::Usage(_))));
        assert!(matches!(parse_add_exchange("okx key secret"), Err(BotError::Usage(_))));
        let err = parse_add_exchange("kraken key secret").unwrap_err();
        assert!(err.to_string().contains("binance, mexc, okx, bybit"));
    }

    #[test]
    fn trade_config_arguments() {
        let config = parse_trade_config("250 3 0.8").unwrap();
        assert_eq!(config.trade_amount, dec!(250));
        assert_eq!(config.min_profit, dec!(3));
        assert_eq!(config.min_spread_pct, dec!(0.8));

        assert!(parse_trade_config("250 3").is_err());
        assert!(parse_trade_config("abc 3 0.5").is_err());
        assert!(parse_trade_config("0 3 0.5").is_err());
    }

    #[test]
    fn execute_index_is_one_based() {
        assert_eq!(parse_index("1", 3).unwrap(), 0);
        assert_eq!(parse_index(" 3 ", 3).unwrap(), 2);
        assert!(parse_index("0", 3).is_err());
        assert!(parse_index("4", 3).is_err());
        assert!(parse_index("x", 3).is_err());
        assert!(parse_index("1", 0).is_err());
    }

    #[test]
    fn only_addexchange_is_secret() {
        assert!(Command::AddExchange(String::new()).carries_secrets());
        assert!(!Command::SetPairs(String::new()).carries_secrets());
    }
}
