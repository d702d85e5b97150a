//! Registry of live exchange connectors.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, instrument, warn};

use crate::error::ExchangeError;
use crate::metrics;

use super::{build_connector, ApiCredentials, Balances, Exchange, ExchangeId, ExchangeResult, Symbol, Ticker};

/// Live connectors keyed by exchange.
pub struct ExchangeManager {
    http: reqwest::Client,
    exchanges: BTreeMap<ExchangeId, Arc<dyn Exchange>>,
    base_urls: BTreeMap<ExchangeId, String>,
}

impl std::fmt::Debug for ExchangeManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExchangeManager")
            .field("exchanges", &self.ids())
            .field("base_urls", &self.base_urls)
            .finish()
    }
}

impl ExchangeManager {
    /// Create an empty manager whose connectors share one HTTP client.
    pub fn new(http_timeout: Duration) -> ExchangeResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(http_timeout)
            .connect_timeout(Duration::from_secs(5))
            .tcp_keepalive(Duration::from_secs(30))
            .pool_idle_timeout(Duration::from_secs(90))
            .build()?;
        Ok(Self {
            http,
            exchanges: BTreeMap::new(),
            base_urls: BTreeMap::new(),
        })
    }

    /// Send an exchange's requests to another REST endpoint (a proxy or
    /// regional host). Applies to connectors built after the call.
    pub fn set_base_url(&mut self, id: ExchangeId, base_url: impl Into<String>) {
        self.base_urls.insert(id, base_url.into());
    }

    /// Build a connector, prove the credentials with one authenticated call,
    /// and register it. Nothing is registered when verification fails.
    #[instrument(skip(self, credentials))]
    pub async fn connect(
        &mut self,
        id: ExchangeId,
        credentials: ApiCredentials,
        testnet: bool,
    ) -> ExchangeResult<()> {
        let connector = build_connector(
            id,
            self.http.clone(),
            credentials,
            testnet,
            self.base_urls.get(&id).map(String::as_str),
        )?;
        connector.verify_credentials().await.map_err(|e| {
            warn!(exchange = %id, error = %e, "Credential verification failed");
            e
        })?;

        self.insert(connector);
        info!(exchange = %id, "Exchange connected");
        Ok(())
    }

    /// Register an already-built connector, replacing any previous one.
    pub fn insert(&mut self, connector: Arc<dyn Exchange>) {
        self.exchanges.insert(connector.id(), connector);
    }

    /// Drop a connector. Returns whether one was registered.
    pub fn remove(&mut self, id: ExchangeId) -> bool {
        self.exchanges.remove(&id).is_some()
    }

    /// Connector for an exchange.
    pub fn get(&self, id: ExchangeId) -> ExchangeResult<Arc<dyn Exchange>> {
        self.exchanges
            .get(&id)
            .cloned()
            .ok_or(ExchangeError::NotConnected(id))
    }

    /// Connected exchanges in stable order.
    pub fn ids(&self) -> Vec<ExchangeId> {
        self.exchanges.keys().copied().collect()
    }

    /// Whether an exchange is connected.
    pub fn contains(&self, id: ExchangeId) -> bool {
        self.exchanges.contains_key(&id)
    }

    /// Number of connected exchanges.
    pub fn len(&self) -> usize {
        self.exchanges.len()
    }

    /// No exchanges connected.
    pub fn is_empty(&self) -> bool {
        self.exchanges.is_empty()
    }

    /// Fetch a ticker, recording request latency.
    pub async fn fetch_ticker(&self, id: ExchangeId, symbol: &Symbol) -> ExchangeResult<Ticker> {
        let connector = self.get(id)?;
        let _timer = metrics::timer_exchange_request(id, "ticker");
        connector.fetch_ticker(symbol).await
    }

    /// Fetch balances, recording request latency.
    pub async fn fetch_balance(&self, id: ExchangeId) -> ExchangeResult<Balances> {
        let connector = self.get(id)?;
        let _timer = metrics::timer_exchange_request(id, "balance");
        connector.fetch_balance().await
    }
}
