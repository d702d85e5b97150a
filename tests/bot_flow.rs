//! End-to-end command flow against in-memory exchanges.
//!
//! Drives [`BotService`] the way the Telegram front end does, with two mock
//! exchanges quoting BTC/USDT one percent apart.

use std::sync::Arc;

use pretty_assertions::assert_eq;
use rust_decimal_macros::dec;

use spread_arb_bot::bot::{BotService, BotState, Command};
use spread_arb_bot::config::Config;
use spread_arb_bot::exchange::{ExchangeId, MockExchange, OrderSide, Symbol, TradingFee};
use spread_arb_bot::security::CredentialCipher;
use spread_arb_bot::storage::{TradeHistory, TradeStatus, TRADES_FILE};

const CHAT: i64 = 4242;

struct Harness {
    _dir: tempfile::TempDir,
    data_dir: std::path::PathBuf,
    service: BotService,
    mexc: MockExchange,
    binance: MockExchange,
}

fn btc() -> Symbol {
    Symbol::new("BTC", "USDT")
}

async fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        data_dir: dir.path().to_path_buf(),
        encryption_key: CredentialCipher::generate_key(),
        authorized_chat_id: Some(CHAT),
        ..Config::default()
    };

    let mexc = MockExchange::new(ExchangeId::Mexc);
    mexc.set_ticker(&btc(), dec!(99.9), dec!(100));
    mexc.set_fees(TradingFee::flat(dec!(0.1)));
    mexc.set_balance("USDT", dec!(1000));

    let binance = MockExchange::new(ExchangeId::Binance);
    binance.set_ticker(&btc(), dec!(101), dec!(101.1));
    binance.set_fees(TradingFee::flat(dec!(0.1)));
    binance.set_balance("BTC", dec!(10));

    let mut state = BotState::open(&config).await.unwrap();
    state.exchanges_mut().insert(Arc::new(mexc.clone()));
    state.exchanges_mut().insert(Arc::new(binance.clone()));

    Harness {
        data_dir: dir.path().to_path_buf(),
        _dir: dir,
        service: BotService::new(state, config.authorized_chat_id),
        mexc,
        binance,
    }
}

async fn configure(h: &Harness) {
    let reply = h.service.handle(Command::SetPairs("BTC/USDT".to_string())).await;
    assert_eq!(reply, "Trading pairs set: BTC/USDT");
    let reply = h.service.handle(Command::SetConfig("400 1 0.5".to_string())).await;
    assert!(reply.starts_with("Trade config updated."), "{}", reply);
}

#[tokio::test]
async fn scan_execute_and_review() {
    let h = harness().await;
    assert!(h.service.is_authorized(CHAT));
    assert!(!h.service.is_authorized(CHAT + 1));
    configure(&h).await;

    let balance = h.service.handle(Command::Balance).await;
    assert!(balance.contains("mexc"));
    assert!(balance.contains("USDT: 1000"));

    let scan = h.service.handle(Command::Scan).await;
    assert!(scan.starts_with("Opportunities (1):"), "{}", scan);
    assert!(scan.contains("buy mexc @ 100, sell binance @ 101"), "{}", scan);
    assert!(scan.contains("net profit 3.196"), "{}", scan);

    let executed = h.service.handle(Command::Execute("1".to_string())).await;
    assert!(executed.starts_with("Trade executed"), "{}", executed);

    let buys = h.mexc.orders();
    assert_eq!(buys.len(), 1);
    assert_eq!(buys[0].side, OrderSide::Buy);
    assert_eq!(buys[0].quantity, dec!(4));
    let sells = h.binance.orders();
    assert_eq!(sells.len(), 1);
    assert_eq!(sells[0].side, OrderSide::Sell);

    let history = h.service.handle(Command::History).await;
    assert!(history.contains("Last 1 trade(s)"), "{}", history);
    assert!(history.contains("[completed]"), "{}", history);

    let records = TradeHistory::new(h.data_dir.join(TRADES_FILE))
        .load_all()
        .await
        .unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, TradeStatus::Completed);

    // 400 USDT left mexc, so it drifted 40% from its baseline.
    let drift = h.service.handle(Command::Drift).await;
    assert!(drift.contains("Rebalancing needed"), "{}", drift);
    assert!(drift.contains("mexc: deficit -400"), "{}", drift);

    let status = h.service.state().await.status_snapshot();
    assert_eq!(status.executor.completed, 1);
    assert_eq!(status.last_scan_opportunities, 1);
}

#[tokio::test]
async fn execution_rechecks_prices() {
    let h = harness().await;
    configure(&h).await;

    let scan = h.service.handle(Command::Scan).await;
    assert!(scan.starts_with("Opportunities (1):"), "{}", scan);

    h.mexc.set_ticker(&btc(), dec!(100.9), dec!(101));
    let reply = h.service.handle(Command::Execute("1".to_string())).await;

    assert!(
        reply.starts_with("Trade aborted: opportunity is no longer profitable"),
        "{}",
        reply
    );
    assert!(h.mexc.orders().is_empty());
    assert!(h.binance.orders().is_empty());
    assert_eq!(h.service.handle(Command::History).await, "No trades yet.");
}

#[tokio::test]
async fn trade_too_large_is_rejected_by_risk_limits() {
    let h = harness().await;
    h.service.handle(Command::SetPairs("BTC/USDT".to_string())).await;
    h.service.handle(Command::SetConfig("900 1 0.5".to_string())).await;

    let scan = h.service.handle(Command::Scan).await;

    assert!(scan.starts_with("No executable opportunities found."), "{}", scan);
    assert!(scan.contains("Rejected:"), "{}", scan);
    let reply = h.service.handle(Command::Execute("1".to_string())).await;
    assert!(reply.contains("Run /scan first"), "{}", reply);
}

#[tokio::test]
async fn removing_an_exchange_blocks_scans() {
    let h = harness().await;
    configure(&h).await;

    let reply = h
        .service
        .handle(Command::RemoveExchange("binance".to_string()))
        .await;
    assert_eq!(reply, "binance disconnected and credentials deleted.");

    assert_eq!(
        h.service.handle(Command::Exchanges).await,
        "Connected exchanges (1):\n- mexc\n"
    );
    let scan = h.service.handle(Command::Scan).await;
    assert!(scan.starts_with("Error: Connect at least two exchanges"), "{}", scan);
}

#[tokio::test]
async fn settings_survive_restart() {
    let h = harness().await;
    configure(&h).await;

    let config = Config {
        data_dir: h.data_dir.clone(),
        encryption_key: CredentialCipher::generate_key(),
        ..Config::default()
    };
    let reopened = BotService::new(BotState::open(&config).await.unwrap(), None);

    let text = reopened.handle(Command::Config).await;
    assert!(text.contains("trade amount: 400"), "{}", text);
    assert!(text.contains("Pairs: BTC/USDT"), "{}", text);
}

#[tokio::test]
async fn reset_baseline_clears_drift_after_rebalancing() {
    let h = harness().await;
    configure(&h).await;
    h.service.handle(Command::Balance).await;

    let scan = h.service.handle(Command::Scan).await;
    assert!(scan.starts_with("Opportunities (1):"), "{}", scan);
    let executed = h.service.handle(Command::Execute("1".to_string())).await;
    assert!(executed.starts_with("Trade executed"), "{}", executed);

    // The trade moved 400 USDT off mexc: 40% drift blocks every later scan.
    let blocked = h.service.handle(Command::Scan).await;
    assert!(blocked.starts_with("No executable opportunities found."), "{}", blocked);
    assert!(blocked.contains("mexc drift 40"), "{}", blocked);
    assert!(blocked.contains("/resetbaseline"), "{}", blocked);

    let reset = h.service.handle(Command::ResetBaseline).await;
    assert!(reset.starts_with("Position baseline reset"), "{}", reset);
    assert!(reset.contains("All exchanges within drift limits."), "{}", reset);

    let scan = h.service.handle(Command::Scan).await;
    assert!(scan.starts_with("Opportunities (1):"), "{}", scan);
    assert!(scan.contains("buy mexc @ 100, sell binance @ 101"), "{}", scan);
}

#[tokio::test]
async fn reset_baseline_needs_balances() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        data_dir: dir.path().to_path_buf(),
        encryption_key: CredentialCipher::generate_key(),
        ..Config::default()
    };
    let service = BotService::new(BotState::open(&config).await.unwrap(), None);

    let reply = service.handle(Command::ResetBaseline).await;

    assert!(reply.starts_with("Error: No balances to use as a baseline"), "{}", reply);
}
