//! JSON file persistence.
//!
//! Every state file is a small JSON document read whole and written whole.
//! Writes go to a sibling temp file that is then renamed over the target.

pub mod credentials;
pub mod history;
pub mod settings;

use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::error::StorageError;

pub use credentials::{CredentialStore, StoredCredential};
pub use history::{TradeHistory, TradeLeg, TradeRecord, TradeStatus};
pub use settings::{parse_pairs, RiskLimits, Settings, SettingsStore, TradeConfig};

/// File names under the data directory.
pub const SETTINGS_FILE: &str = "settings.json";
/// Encrypted exchange credentials.
pub const API_KEYS_FILE: &str = "api_keys.json";
/// Append-only trade log.
pub const TRADES_FILE: &str = "trades.json";
/// Cached exchange fees.
pub const FEES_CACHE_FILE: &str = "fees_cache.json";
/// Position baseline and current balances.
pub const POSITIONS_FILE: &str = "positions.json";

fn io_error(path: &Path, source: std::io::Error) -> StorageError {
    StorageError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// Read a JSON file, returning `None` when it does not exist.
pub async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StorageError> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(io_error(path, e)),
    };

    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|source| StorageError::Json {
            path: path.display().to_string(),
            source,
        })
}

/// Write a value as pretty JSON, replacing the file atomically.
pub async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StorageError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| io_error(parent, e))?;
    }

    let json = serde_json::to_vec_pretty(value).map_err(|source| StorageError::Json {
        path: path.display().to_string(),
        source,
    })?;

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = std::path::PathBuf::from(tmp);

    tokio::fs::write(&tmp, &json)
        .await
        .map_err(|e| io_error(&tmp, e))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| io_error(path, e))?;

    debug!(path = %path.display(), bytes = json.len(), "Wrote state file");
    Ok(())
}
