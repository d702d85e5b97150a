//! HTTP API handlers.

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use chrono::{DateTime, Utc};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use std::sync::Arc;

use crate::arbitrage::ExecutorStats;
use crate::exchange::ExchangeId;

/// Bot state published to the status endpoint after every command.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StatusSnapshot {
    /// Connected exchanges.
    pub exchanges: Vec<ExchangeId>,
    /// Configured pairs.
    pub pairs: Vec<String>,
    /// When the last scan finished.
    pub last_scan_at: Option<DateTime<Utc>>,
    /// Executable opportunities found by the last scan.
    pub last_scan_opportunities: usize,
    /// Chat commands handled since startup.
    pub commands_handled: u64,
    /// Executor counters.
    pub executor: ExecutorStats,
}

/// Application state shared with handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Whether the bot is polling for updates.
    pub ready: Arc<std::sync::atomic::AtomicBool>,
    /// Latest bot status.
    pub status: Arc<tokio::sync::RwLock<StatusSnapshot>>,
    /// Prometheus recorder handle, when one is installed.
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    /// Create new app state.
    pub fn new() -> Self {
        Self {
            ready: Arc::new(std::sync::atomic::AtomicBool::new(false)),
            status: Arc::new(tokio::sync::RwLock::new(StatusSnapshot::default())),
            metrics: None,
        }
    }

    /// Attach the Prometheus handle rendered by `/metrics`.
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Set ready state.
    pub fn set_ready(&self, ready: bool) {
        self.ready
            .store(ready, std::sync::atomic::Ordering::SeqCst);
    }

    /// Check if ready.
    pub fn is_ready(&self) -> bool {
        self.ready.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Replace the published status.
    pub async fn publish(&self, snapshot: StatusSnapshot) {
        *self.status.write().await = snapshot;
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Status: "ok".
    pub status: &'static str,
}

/// Readiness check response.
#[derive(Debug, Serialize)]
pub struct ReadyResponse {
    /// Whether service is ready.
    pub ready: bool,
    /// Number of connected exchanges.
    pub exchanges: usize,
}

/// Status response.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    /// Service status.
    pub status: &'static str,
    /// Bot state.
    #[serde(flatten)]
    pub snapshot: StatusSnapshot,
}

/// Health check handler - always returns 200.
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse { status: "ok" })
}

/// Readiness check handler - returns 200 if ready, 503 otherwise.
pub async fn ready(State(state): State<AppState>) -> impl IntoResponse {
    let is_ready = state.is_ready();
    let exchanges = state.status.read().await.exchanges.len();

    let response = ReadyResponse {
        ready: is_ready,
        exchanges,
    };

    if is_ready {
        (StatusCode::OK, Json(response))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(response))
    }
}

/// Status handler - returns bot status and statistics.
pub async fn status(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.status.read().await.clone();
    let status = if state.is_ready() { "running" } else { "starting" };

    Json(StatusResponse { status, snapshot })
}

/// Prometheus text exposition.
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    match &state.metrics {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (
            StatusCode::NOT_FOUND,
            "metrics recorder not installed".to_string(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_state_ready_toggle() {
        let state = AppState::new();
        assert!(!state.is_ready());

        state.set_ready(true);
        assert!(state.is_ready());

        state.set_ready(false);
        assert!(!state.is_ready());
    }

    #[tokio::test]
    async fn publish_replaces_snapshot() {
        let state = AppState::new();
        state
            .publish(StatusSnapshot {
                exchanges: vec![ExchangeId::Okx],
                commands_handled: 3,
                ..StatusSnapshot::default()
            })
            .await;

        let snapshot = state.status.read().await;
        assert_eq!(snapshot.exchanges, vec![ExchangeId::Okx]);
        assert_eq!(snapshot.commands_handled, 3);
    }
}
