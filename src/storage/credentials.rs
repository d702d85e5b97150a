//! Encrypted exchange credentials in `api_keys.json`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{BotError, StorageError};
use crate::exchange::{ApiCredentials, ExchangeId};
use crate::security::CredentialCipher;

use super::{read_json, write_json};

/// One exchange's credentials as stored on disk. Every secret field is a
/// Fernet token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCredential {
    /// Encrypted API key.
    pub api_key: String,
    /// Encrypted API secret.
    pub secret: String,
    /// Encrypted passphrase, for exchanges that use one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passphrase: Option<String>,
    /// Whether the keys belong to the exchange's testnet.
    #[serde(default)]
    pub testnet: bool,
}

/// Credential file plus the cipher that protects it.
#[derive(Debug)]
pub struct CredentialStore {
    path: PathBuf,
    cipher: CredentialCipher,
    entries: BTreeMap<String, StoredCredential>,
}

impl CredentialStore {
    /// Load the credential file; a missing file is an empty store.
    pub async fn load(path: impl AsRef<Path>, cipher: CredentialCipher) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let entries = read_json(&path).await?.unwrap_or_default();
        Ok(Self {
            path,
            cipher,
            entries,
        })
    }

    /// Encrypt and persist credentials for an exchange, replacing any previous entry.
    pub async fn save(
        &mut self,
        exchange: ExchangeId,
        credentials: &ApiCredentials,
        testnet: bool,
    ) -> Result<(), StorageError> {
        let entry = StoredCredential {
            api_key: self.cipher.encrypt(&credentials.api_key),
            secret: self.cipher.encrypt(&credentials.secret),
            passphrase: credentials
                .passphrase
                .as_deref()
                .map(|p| self.cipher.encrypt(p)),
            testnet,
        };

        let mut next = self.entries.clone();
        next.insert(exchange.to_string(), entry);
        write_json(&self.path, &next).await?;
        self.entries = next;

        info!(exchange = %exchange, "Saved encrypted credentials");
        Ok(())
    }

    /// Delete an exchange's credentials. Returns whether an entry existed.
    pub async fn remove(&mut self, exchange: ExchangeId) -> Result<bool, StorageError> {
        if !self.entries.contains_key(exchange.as_str()) {
            return Ok(false);
        }

        let mut next = self.entries.clone();
        next.remove(exchange.as_str());
        write_json(&self.path, &next).await?;
        self.entries = next;

        info!(exchange = %exchange, "Removed stored credentials");
        Ok(true)
    }

    /// Exchanges with stored credentials.
    #[cfg(test)]
    pub(crate) fn exchanges(&self) -> Vec<ExchangeId> {
        self.entries
            .keys()
            .filter_map(|name| name.parse().ok())
            .collect()
    }

    /// Decrypt one exchange's credentials.
    pub fn decrypt(&self, exchange: ExchangeId) -> Result<Option<(ApiCredentials, bool)>, BotError> {
        let Some(entry) = self.entries.get(exchange.as_str()) else {
            return Ok(None);
        };

        let credentials = ApiCredentials {
            api_key: self.cipher.decrypt(&entry.api_key)?,
            secret: self.cipher.decrypt(&entry.secret)?,
            passphrase: entry
                .passphrase
                .as_deref()
                .map(|p| self.cipher.decrypt(p))
                .transpose()?,
        };
        Ok(Some((credentials, entry.testnet)))
    }

    /// Decrypt every stored entry, skipping (and logging) entries that fail.
    pub fn decrypt_all(&self) -> Vec<(ExchangeId, ApiCredentials, bool)> {
        let mut out = Vec::new();
        for name in self.entries.keys() {
            let Ok(exchange) = name.parse::<ExchangeId>() else {
                warn!(exchange = %name, "Ignoring credentials for unsupported exchange");
                continue;
            };
            match self.decrypt(exchange) {
                Ok(Some((credentials, testnet))) => out.push((exchange, credentials, testnet)),
                Ok(None) => {}
                Err(e) => warn!(exchange = %exchange, error = %e, "Cannot decrypt stored credentials"),
            }
        }
        out
    }

    #[cfg(test)]
    pub(crate) fn stored(&self, exchange: ExchangeId) -> Option<&StoredCredential> {
        self.entries.get(exchange.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher() -> (String, CredentialCipher) {
        let key = CredentialCipher::generate_key();
        let cipher = CredentialCipher::new(&key).unwrap();
        (key, cipher)
    }

    fn creds(passphrase: Option<&str>) -> ApiCredentials {
        ApiCredentials {
            api_key: "key-123".to_string(),
            secret: "secret-456".to_string(),
            passphrase: passphrase.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn saved_credentials_are_encrypted_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("api_keys.json");
        let (_, cipher) = cipher();

        let mut store = CredentialStore::load(&path, cipher).await.unwrap();
        store
            .save(ExchangeId::Okx, &creds(Some("pass")), false)
            .await
            .unwrap();

        let raw = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(raw.contains("\"okx\""));
        assert!(!raw.contains("key-123"));
        assert!(!raw.contains("secret-456"));
        assert!(!raw.contains("\"pass\""));
    }

    #[tokio::test]
    async fn reload_with_same_key_decrypts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("api_keys.json");
        let (key, cipher) = cipher();

        let mut store = CredentialStore::load(&path, cipher).await.unwrap();
        store
            .save(ExchangeId::Binance, &creds(None), true)
            .await
            .unwrap();

        let reloaded = CredentialStore::load(&path, CredentialCipher::new(&key).unwrap())
            .await
            .unwrap();
        let (decrypted, testnet) = reloaded.decrypt(ExchangeId::Binance).unwrap().unwrap();
        assert_eq!(decrypted, creds(None));
        assert!(testnet);
        assert_eq!(reloaded.exchanges(), vec![ExchangeId::Binance]);
    }

    #[tokio::test]
    async fn wrong_key_entries_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("api_keys.json");
        let (_, cipher) = cipher();

        let mut store = CredentialStore::load(&path, cipher).await.unwrap();
        store
            .save(ExchangeId::Bybit, &creds(None), false)
            .await
            .unwrap();

        let (_, other) = self::cipher();
        let reloaded = CredentialStore::load(&path, other).await.unwrap();
        assert!(reloaded.decrypt(ExchangeId::Bybit).is_err());
        assert!(reloaded.decrypt_all().is_empty());
    }

    #[tokio::test]
    async fn remove_deletes_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("api_keys.json");
        let (_, cipher) = cipher();

        let mut store = CredentialStore::load(&path, cipher).await.unwrap();
        store
            .save(ExchangeId::Mexc, &creds(None), false)
            .await
            .unwrap();

        assert!(store.remove(ExchangeId::Mexc).await.unwrap());
        assert!(!store.remove(ExchangeId::Mexc).await.unwrap());
        assert!(store.exchanges().is_empty());
        assert!(store.stored(ExchangeId::Mexc).is_none());
    }
}
