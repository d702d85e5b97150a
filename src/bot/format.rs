//! Plain-text rendering of bot replies.

use std::fmt::Write;

use rust_decimal::Decimal;

use crate::arbitrage::{ExecutionResult, Opportunity, RiskViolation, ScanReport};
use crate::exchange::{Balances, ExchangeId};
use crate::portfolio::DriftReport;
use crate::storage::{Settings, TradeRecord, TradeStatus};

/// Telegram's message length limit.
pub const MAX_MESSAGE_LEN: usize = 4096;

/// Reply to `/start`.
pub fn welcome() -> String {
    format!(
        "Cross-exchange arbitrage bot\n\
         \n\
         Quick start:\n\
         1. /addexchange <exchange> <api_key> <secret> [passphrase]\n   \
            (supported: {})\n\
         2. /setpairs BTC/USDT, ETH/USDT\n\
         3. /setconfig <trade_amount> <min_profit> <min_spread_pct>\n\
         4. /scan, then /execute <n>\n\
         \n\
         /help lists every command.",
        ExchangeId::supported_list()
    )
}

/// Connected exchanges.
pub fn exchanges(ids: &[ExchangeId]) -> String {
    if ids.is_empty() {
        return "No exchanges connected. Use /addexchange.".to_string();
    }
    let mut out = format!("Connected exchanges ({}):\n", ids.len());
    for id in ids {
        let _ = writeln!(out, "- {}", id);
    }
    out
}

/// Settings for `/config`.
pub fn settings(settings: &Settings) -> String {
    let trade = &settings.trading_config;
    let limits = &settings.risk_limits;
    let pairs = if settings.trading_pairs.is_empty() {
        "none (use /setpairs)".to_string()
    } else {
        settings
            .trading_pairs
            .iter()
            .map(|p| p.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    };

    format!(
        "Trade config\n\
         - trade amount: {}\n\
         - min profit: {}\n\
         - min gross spread: {}%\n\
         \n\
         Pairs: {}\n\
         \n\
         Risk limits\n\
         - min net spread: {}%\n\
         - max trade size: {}\n\
         - max fee impact: {}% of gross profit\n\
         - max inventory drift: {}%\n\
         - max per-exchange drift: {}%",
        trade.trade_amount,
        trade.min_profit,
        trade.min_spread_pct,
        pairs,
        limits.min_spread_percent_net,
        limits.max_position_size_usd,
        limits.max_fee_impact_percent,
        limits.max_inventory_drift_percent,
        limits.max_per_exchange_drift_percent,
    )
}

/// Balances per exchange; failures are shown inline.
pub fn balances(results: &[(ExchangeId, Result<Balances, String>)]) -> String {
    if results.is_empty() {
        return "No exchanges connected. Use /addexchange.".to_string();
    }
    let mut out = String::from("Balances (free)\n");
    for (id, result) in results {
        let _ = writeln!(out, "\n{}", id);
        match result {
            Ok(balances) => {
                let mut any = false;
                for (asset, balance) in balances.non_zero() {
                    any = true;
                    let _ = writeln!(out, "  {}: {}", asset, balance.free.normalize());
                }
                if !any {
                    out.push_str("  (empty)\n");
                }
            }
            Err(e) => {
                let _ = writeln!(out, "  error: {}", e);
            }
        }
    }
    out
}

fn opportunity_line(n: usize, opp: &Opportunity) -> String {
    let est = &opp.estimate;
    format!(
        "{}. {}: buy {} @ {}, sell {} @ {}\n   \
         spread {}% gross / {}% net, fees {} ({}% + {}%)\n   \
         net profit {} (ROI {}%)",
        n,
        opp.pair,
        opp.buy_exchange,
        est.buy_price,
        opp.sell_exchange,
        est.sell_price,
        est.gross_spread_pct.round_dp(3),
        est.net_spread_pct.round_dp(3),
        est.total_fees.round_dp(4),
        opp.buy_fee.taker_pct,
        opp.sell_fee.taker_pct,
        est.net_profit.round_dp(4),
        est.roi_pct.round_dp(3),
    )
}

/// Reply to `/scan`.
pub fn scan(report: &ScanReport) -> String {
    let mut out = String::new();
    if report.opportunities.is_empty() {
        out.push_str("No executable opportunities found.\n");
    } else {
        let _ = writeln!(out, "Opportunities ({}):", report.opportunities.len());
        for (i, opp) in report.opportunities.iter().enumerate() {
            let _ = writeln!(out, "{}", opportunity_line(i + 1, opp));
        }
        out.push_str("\nUse /execute <n> to trade one.\n");
    }

    if !report.rejected.is_empty() {
        out.push_str("\nRejected:\n");
        for rejected in &report.rejected {
            let opp = &rejected.opportunity;
            let reasons = rejected
                .violations
                .iter()
                .map(|v| v.to_string())
                .collect::<Vec<_>>()
                .join("; ");
            let _ = writeln!(
                out,
                "- {} ({} -> {}, {}%): {}",
                opp.pair,
                opp.buy_exchange,
                opp.sell_exchange,
                opp.estimate.gross_spread_pct.round_dp(3),
                reasons
            );
        }
    }

    let drift_blocked = report.rejected.iter().any(|r| {
        r.violations.iter().any(|v| {
            matches!(
                v,
                RiskViolation::OverallDriftTooHigh { .. } | RiskViolation::ExchangeDriftTooHigh { .. }
            )
        })
    });
    if drift_blocked {
        out.push_str("Inventory drift is blocking trades: rebalance, then /resetbaseline.\n");
    }

    if !report.skipped.is_empty() {
        out.push_str("\nSkipped:\n");
        for (pair, reason) in &report.skipped {
            let _ = writeln!(out, "- {}: {}", pair, reason);
        }
    }
    out
}

fn record_summary(record: &TradeRecord) -> String {
    let mut out = format!(
        "{} {} qty {}\n  buy {} @ {} (order {})",
        record.trade_id,
        record.pair,
        record.quantity.normalize(),
        record.buy.exchange,
        record.buy.price,
        record.buy.order_id
    );
    match &record.sell {
        Some(sell) => {
            let _ = write!(
                out,
                "\n  sell {} @ {} (order {})",
                sell.exchange, sell.price, sell.order_id
            );
        }
        None => out.push_str("\n  sell: not placed"),
    }
    let _ = write!(
        out,
        "\n  estimated net {} ({}%)",
        record.estimated_net_profit.round_dp(4),
        record.estimated_roi_pct.round_dp(3)
    );
    out
}

/// Reply to `/execute`.
pub fn execution(result: &ExecutionResult) -> String {
    match result {
        ExecutionResult::Completed(record) => {
            format!("Trade executed\n{}", record_summary(record))
        }
        ExecutionResult::BuyOnly { record, error } => format!(
            "WARNING: only the buy leg was executed. Sell failed: {}\n\
             You now hold {} {} on {}; rebalance manually.\n{}",
            error,
            record.quantity.normalize(),
            record.pair.base,
            record.buy.exchange,
            record_summary(record)
        ),
        ExecutionResult::Aborted(reason) => format!("Trade aborted: {}", reason),
    }
}

/// Reply to `/history`.
pub fn history(records: &[TradeRecord]) -> String {
    if records.is_empty() {
        return "No trades yet.".to_string();
    }
    let mut out = format!("Last {} trade(s):\n", records.len());
    for record in records {
        let marker = match record.status {
            TradeStatus::Completed => "completed",
            TradeStatus::BuyOnly => "BUY ONLY",
        };
        let _ = writeln!(out, "\n[{}] {}", marker, record_summary(record));
    }
    out
}

/// Reply to `/drift`.
pub fn drift(report: &DriftReport, has_baseline: bool) -> String {
    if !has_baseline {
        return "No position baseline yet. Run /balance first.".to_string();
    }
    let mut out = format!(
        "Inventory drift ({} value)\n\
         Total: {} -> {} ({}%)\n",
        report.value_asset,
        report.total_initial.normalize(),
        report.total_current.normalize(),
        report.overall_pct
    );

    out.push_str("\nBy exchange:\n");
    for d in &report.by_exchange {
        let _ = writeln!(
            out,
            "- {}: {} -> {} ({}%)",
            d.exchange,
            d.initial_value.normalize(),
            d.current_value.normalize(),
            d.drift_pct
        );
    }

    let moved: Vec<_> = report
        .by_asset
        .iter()
        .filter(|(_, pct)| **pct > Decimal::ZERO)
        .collect();
    if !moved.is_empty() {
        out.push_str("\nBy asset:\n");
        for (asset, pct) in moved {
            let _ = writeln!(out, "- {}: {}%", asset, pct);
        }
    }

    if report.needs_rebalancing {
        out.push_str("\nRebalancing needed:\n");
        if report.suggestions.is_empty() {
            out.push_str("- overall drift above limit, no single exchange stands out\n");
        }
        for suggestion in &report.suggestions {
            let _ = writeln!(out, "- {}", suggestion);
        }
        out.push_str("After rebalancing, /resetbaseline takes current balances as the new baseline.\n");
    } else {
        out.push_str("\nAll exchanges within drift limits.\n");
    }
    out
}

/// Split text into chunks no longer than `limit` bytes, breaking on line
/// boundaries where possible.
pub fn split_message(text: &str, limit: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();

    for line in text.split_inclusive('\n') {
        if current.len() + line.len() > limit && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
        }
        if line.len() > limit {
            let mut rest = line;
            while rest.len() > limit {
                let mut cut = limit;
                while !rest.is_char_boundary(cut) {
                    cut -= 1;
                }
                chunks.push(rest[..cut].to_string());
                rest = &rest[cut..];
            }
            current.push_str(rest);
        } else {
            current.push_str(line);
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::Symbol;
    use crate::storage::TradeLeg;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn record(status: TradeStatus) -> TradeRecord {
        TradeRecord {
            trade_id: "trade_20240101_000000000".to_string(),
            timestamp: Utc::now(),
            pair: Symbol::new("BTC", "USDT"),
            quantity: dec!(0.0010),
            trade_amount: dec!(100),
            buy: TradeLeg {
                exchange: ExchangeId::Binance,
                order_id: "42".to_string(),
                price: dec!(100000),
                quantity: dec!(0.001),
            },
            sell: None,
            estimated_net_profit: dec!(0.8),
            estimated_roi_pct: dec!(0.8),
            error: Some("rejected".to_string()),
            status,
        }
    }

    #[test]
    fn split_respects_limit_and_lines() {
        let text = "aaaa\nbbbb\ncccc\n";
        let chunks = split_message(text, 10);
        assert_eq!(chunks, vec!["aaaa\nbbbb\n", "cccc\n"]);
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn split_breaks_long_lines() {
        let text = "x".repeat(25);
        let chunks = split_message(&text, 10);
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.len() <= 10));
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn split_short_text_is_one_chunk() {
        assert_eq!(split_message("hello", MAX_MESSAGE_LEN), vec!["hello"]);
        assert!(split_message("", MAX_MESSAGE_LEN).is_empty());
    }

    #[test]
    fn buy_only_execution_warns() {
        let text = execution(&ExecutionResult::BuyOnly {
            record: record(TradeStatus::BuyOnly),
            error: "rejected".to_string(),
        });
        assert!(text.starts_with("WARNING"));
        assert!(text.contains("You now hold 0.001 BTC on binance"));
        assert!(text.contains("sell: not placed"));
    }

    #[test]
    fn history_marks_status() {
        let text = history(&[record(TradeStatus::BuyOnly)]);
        assert!(text.contains("[BUY ONLY]"));
        assert_eq!(history(&[]), "No trades yet.");
    }

    #[test]
    fn empty_exchange_list() {
        assert!(exchanges(&[]).contains("/addexchange"));
        assert_eq!(
            exchanges(&[ExchangeId::Okx]),
            "Connected exchanges (1):\n- okx\n"
        );
    }
}
