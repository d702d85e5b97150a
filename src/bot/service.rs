//! Command handling behind one async mutex.
//!
//! Every chat command locks [`BotState`], runs to completion and renders a
//! plain-text reply. Errors never escape: they are turned into a message for
//! the user.

use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use strum::IntoEnumIterator;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{info, instrument, warn};

use super::commands::{
    parse_add_exchange, parse_exchange, parse_index, parse_trade_config, Command,
};
use super::format;
use crate::api::{AppState, StatusSnapshot};
use crate::arbitrage::{scan, Opportunity, ScanReport, TradeExecutor};
use crate::config::Config;
use crate::error::{BotError, Result};
use crate::exchange::{Balances, ExchangeId, ExchangeManager};
use crate::fees::FeeCache;
use crate::metrics;
use crate::portfolio::{DriftReport, PositionTracker};
use crate::security::CredentialCipher;
use crate::storage::{
    parse_pairs, CredentialStore, SettingsStore, TradeHistory, API_KEYS_FILE, FEES_CACHE_FILE,
    POSITIONS_FILE, SETTINGS_FILE, TRADES_FILE,
};

/// Trades shown by `/history`.
pub const HISTORY_LIMIT: usize = 10;

/// Asset drift is valued in when no pair is configured.
pub const DEFAULT_VALUE_ASSET: &str = "USDT";

/// Everything a command may touch.
#[derive(Debug)]
pub struct BotState {
    exchanges: ExchangeManager,
    credentials: CredentialStore,
    settings: SettingsStore,
    fees: FeeCache,
    history: TradeHistory,
    positions: PositionTracker,
    executor: TradeExecutor,
    last_scan: Vec<Opportunity>,
    last_scan_at: Option<DateTime<Utc>>,
    testnet: bool,
    commands_handled: u64,
}

impl BotState {
    /// Open every state file under the data directory. No exchange is
    /// connected yet.
    pub async fn open(config: &Config) -> Result<Self> {
        let dir = &config.data_dir;
        let cipher = CredentialCipher::new(&config.encryption_key)?;

        let mut exchanges = ExchangeManager::new(Duration::from_millis(config.http_timeout_ms))?;
        for id in ExchangeId::iter() {
            if let Some(url) = config.base_url(id) {
                info!(exchange = %id, url, "Using REST endpoint override");
                exchanges.set_base_url(id, url);
            }
        }
        let credentials = CredentialStore::load(dir.join(API_KEYS_FILE), cipher).await?;
        let settings = SettingsStore::load_or_init(dir.join(SETTINGS_FILE)).await?;
        let fees = FeeCache::load(
            dir.join(FEES_CACHE_FILE),
            config.fee_cache_ttl(),
            config.default_fee_percent,
        )
        .await;
        let positions = PositionTracker::load(dir.join(POSITIONS_FILE)).await;

        Ok(Self {
            exchanges,
            credentials,
            settings,
            fees,
            history: TradeHistory::new(dir.join(TRADES_FILE)),
            positions,
            executor: TradeExecutor::new(config.quantity_decimals),
            last_scan: Vec::new(),
            last_scan_at: None,
            testnet: config.exchange_testnet,
            commands_handled: 0,
        })
    }

    /// Connect every exchange with stored credentials. Returns the failures.
    pub async fn reconnect_stored(&mut self) -> Vec<(ExchangeId, String)> {
        let mut failures = Vec::new();
        for (id, credentials, testnet) in self.credentials.decrypt_all() {
            match self.exchanges.connect(id, credentials, testnet).await {
                Ok(()) => info!(exchange = %id, "Reconnected stored exchange"),
                Err(e) => {
                    warn!(exchange = %id, error = %e, "Stored exchange failed to connect");
                    failures.push((id, e.user_message()));
                }
            }
        }
        failures
    }

    /// Live connectors.
    pub fn exchanges(&self) -> &ExchangeManager {
        &self.exchanges
    }

    /// Live connectors, for registering connectors built elsewhere.
    pub fn exchanges_mut(&mut self) -> &mut ExchangeManager {
        &mut self.exchanges
    }

    /// State published on the status endpoint.
    pub fn status_snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            exchanges: self.exchanges.ids(),
            pairs: self
                .settings
                .get()
                .trading_pairs
                .iter()
                .map(|p| p.to_string())
                .collect(),
            last_scan_at: self.last_scan_at,
            last_scan_opportunities: self.last_scan.len(),
            commands_handled: self.commands_handled,
            executor: self.executor.stats(),
        }
    }

    fn value_asset(&self) -> String {
        self.settings
            .get()
            .trading_pairs
            .first()
            .map(|p| p.quote.clone())
            .unwrap_or_else(|| DEFAULT_VALUE_ASSET.to_string())
    }

    fn drift_report(&self) -> Option<DriftReport> {
        if !self.positions.has_baseline() {
            return None;
        }
        Some(
            self.positions
                .drift(&self.value_asset(), &self.settings.get().risk_limits),
        )
    }

    /// Run the scanner over the configured pairs and remember the result.
    pub async fn run_scan(&mut self) -> Result<ScanReport> {
        if self.exchanges.len() < 2 {
            return Err(BotError::Usage(
                "Connect at least two exchanges with /addexchange before scanning.".to_string(),
            ));
        }
        if self.settings.get().trading_pairs.is_empty() {
            return Err(BotError::Usage(
                "No trading pairs configured. Use /setpairs BTC/USDT, ETH/USDT".to_string(),
            ));
        }

        let drift = self.drift_report();
        let settings = self.settings.get().clone();
        let report = scan(&self.exchanges, &mut self.fees, &settings, drift.as_ref()).await;

        self.last_scan = report.opportunities.clone();
        self.last_scan_at = Some(Utc::now());
        Ok(report)
    }

    async fn dispatch(&mut self, command: Command) -> Result<String> {
        match command {
            Command::Start => Ok(format::welcome()),
            Command::Help => Ok(Command::help_text()),
            Command::AddExchange(args) => self.add_exchange(&args).await,
            Command::RemoveExchange(args) => self.remove_exchange(&args).await,
            Command::Exchanges => Ok(format::exchanges(&self.exchanges.ids())),
            Command::SetPairs(args) => self.set_pairs(&args).await,
            Command::SetConfig(args) => self.set_config(&args).await,
            Command::Config => Ok(format::settings(self.settings.get())),
            Command::Balance => self.balance().await,
            Command::Scan => Ok(format::scan(&self.run_scan().await?)),
            Command::Execute(args) => self.execute(&args).await,
            Command::History => Ok(format::history(
                &self.history.recent(HISTORY_LIMIT).await?,
            )),
            Command::Drift => Ok(format::drift(
                &self
                    .positions
                    .drift(&self.value_asset(), &self.settings.get().risk_limits),
                self.positions.has_baseline(),
            )),
            Command::ResetBaseline => self.reset_baseline().await,
            Command::Monitor => Ok(
                "Continuous monitoring is not available. Use /scan to check for opportunities."
                    .to_string(),
            ),
        }
    }

    #[instrument(skip_all)]
    async fn add_exchange(&mut self, args: &str) -> Result<String> {
        let args = parse_add_exchange(args)?;
        let exchange = args.exchange;

        self.exchanges
            .connect(exchange, args.credentials.clone(), self.testnet)
            .await?;
        if let Err(e) = self
            .credentials
            .save(exchange, &args.credentials, self.testnet)
            .await
        {
            self.exchanges.remove(exchange);
            warn!(exchange = %exchange, error = %e, "Credentials not saved, disconnected");
            return Err(e.into());
        }

        Ok(format!(
            "{} connected{}. Credentials verified and stored encrypted.",
            exchange,
            if self.testnet { " (testnet)" } else { "" }
        ))
    }

    async fn remove_exchange(&mut self, args: &str) -> Result<String> {
        let exchange = parse_exchange(args)?;
        let connected = self.exchanges.remove(exchange);
        let stored = self.credentials.remove(exchange).await?;
        if !connected && !stored {
            return Err(BotError::Usage(format!("{} is not connected.", exchange)));
        }

        if let Err(e) = self.positions.forget(exchange).await {
            warn!(exchange = %exchange, error = %e, "Failed to drop positions");
        }
        self.last_scan.clear();
        info!(exchange = %exchange, "Exchange removed");
        Ok(format!("{} disconnected and credentials deleted.", exchange))
    }

    async fn set_pairs(&mut self, args: &str) -> Result<String> {
        let (pairs, invalid) = parse_pairs(args);
        if pairs.is_empty() {
            return Err(BotError::Usage(
                "Usage: /setpairs BTC/USDT, ETH/USDT".to_string(),
            ));
        }

        self.settings.set_pairs(pairs.clone()).await?;
        self.last_scan.clear();

        let mut reply = format!(
            "Trading pairs set: {}",
            pairs
                .iter()
                .map(|p| p.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        );
        if !invalid.is_empty() {
            reply.push_str(&format!("\nIgnored invalid: {}", invalid.join(", ")));
        }
        Ok(reply)
    }

    async fn set_config(&mut self, args: &str) -> Result<String> {
        let config = parse_trade_config(args)?;
        self.settings.set_trade_config(config).await?;
        self.last_scan.clear();
        Ok(format!(
            "Trade config updated.\n\n{}",
            format::settings(self.settings.get())
        ))
    }

    /// Fetch every connected balance and fold the successes into positions.
    async fn refresh_positions(
        &mut self,
    ) -> Vec<(ExchangeId, std::result::Result<Balances, String>)> {
        let ids = self.exchanges.ids();
        let exchanges = &self.exchanges;
        let results = join_all(ids.iter().map(|id| async move {
            (*id, exchanges.fetch_balance(*id).await)
        }))
        .await;

        let fetched: Vec<_> = results
            .iter()
            .filter_map(|(_, r)| r.as_ref().ok().cloned())
            .collect();
        if !fetched.is_empty() {
            if let Err(e) = self.positions.refresh_from(&fetched).await {
                warn!(error = %e, "Failed to save positions");
            }
        }

        results
            .into_iter()
            .map(|(id, r)| (id, r.map_err(|e| e.user_message())))
            .collect()
    }

    async fn balance(&mut self) -> Result<String> {
        Ok(format::balances(&self.refresh_positions().await))
    }

    /// Take freshly fetched balances as the new drift baseline, e.g. after a
    /// manual rebalance.
    async fn reset_baseline(&mut self) -> Result<String> {
        let results = self.refresh_positions().await;
        if self.positions.snapshot().current_positions.is_empty() {
            return Err(BotError::Usage(
                "No balances to use as a baseline. Connect an exchange and run /balance."
                    .to_string(),
            ));
        }
        self.positions.reset_baseline().await?;
        self.last_scan.clear();

        let mut reply = String::from("Position baseline reset to current balances.\n");
        for (id, result) in &results {
            if let Err(e) = result {
                reply.push_str(&format!("{}: balance unavailable ({}), kept last known\n", id, e));
            }
        }
        reply.push('\n');
        reply.push_str(&format::drift(
            &self
                .positions
                .drift(&self.value_asset(), &self.settings.get().risk_limits),
            self.positions.has_baseline(),
        ));
        Ok(reply)
    }

    async fn execute(&mut self, args: &str) -> Result<String> {
        let index = parse_index(args, self.last_scan.len())?;
        let opportunity = self.last_scan[index].clone();
        let trade = self.settings.get().trading_config.clone();

        let result = self
            .executor
            .execute(&self.exchanges, &mut self.fees, &opportunity, &trade)
            .await?;

        let mut reply = format::execution(&result);
        if let Some(record) = result.record() {
            if let Err(e) = self.history.append(record).await {
                warn!(trade_id = %record.trade_id, error = %e, "Failed to record trade");
                reply.push_str(&format!("\n\nWarning: trade not saved to history: {}", e));
            }
            if let Err(e) = self.positions.apply_trade(record).await {
                warn!(trade_id = %record.trade_id, error = %e, "Failed to update positions");
            }
        }
        Ok(reply)
    }
}

/// Serializes command handling and enforces the authorized chat.
#[derive(Debug)]
pub struct BotService {
    state: Mutex<BotState>,
    authorized_chat: Option<i64>,
    app: Option<AppState>,
}

impl BotService {
    /// Wrap opened state.
    pub fn new(state: BotState, authorized_chat: Option<i64>) -> Self {
        Self {
            state: Mutex::new(state),
            authorized_chat,
            app: None,
        }
    }

    /// Open state from config and reconnect stored exchanges.
    pub async fn bootstrap(config: &Config) -> Result<Self> {
        let mut state = BotState::open(config).await?;
        let failures = state.reconnect_stored().await;
        info!(
            connected = state.exchanges().len(),
            failed = failures.len(),
            "Bot state ready"
        );
        Ok(Self::new(state, config.authorized_chat_id))
    }

    /// Publish status to the HTTP API after each command.
    pub fn with_app_state(mut self, app: AppState) -> Self {
        self.app = Some(app);
        self
    }

    /// Whether a chat may issue commands.
    pub fn is_authorized(&self, chat_id: i64) -> bool {
        self.authorized_chat.map_or(true, |allowed| allowed == chat_id)
    }

    /// Exclusive access to the state.
    pub async fn state(&self) -> MutexGuard<'_, BotState> {
        self.state.lock().await
    }

    /// Push the current status to the HTTP API.
    pub async fn publish_status(&self) {
        if let Some(app) = &self.app {
            let snapshot = self.state.lock().await.status_snapshot();
            app.publish(snapshot).await;
        }
    }

    /// Run one command and render the reply.
    #[instrument(skip_all, fields(command = command.name()))]
    pub async fn handle(&self, command: Command) -> String {
        let mut state = self.state.lock().await;
        state.commands_handled += 1;
        metrics::inc_commands(command.name());

        let reply = match state.dispatch(command).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(error = %e, "Command failed");
                format!("Error: {}", e.user_message())
            }
        };

        if let Some(app) = &self.app {
            app.publish(state.status_snapshot()).await;
        }
        reply
    }
}
