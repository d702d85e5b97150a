//! HMAC-SHA256 request signing shared by the REST connectors.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::ExchangeError;

use super::ExchangeResult;

type HmacSha256 = Hmac<Sha256>;

fn mac(secret: &str, payload: &str) -> ExchangeResult<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| ExchangeError::Signing(e.to_string()))?;
    mac.update(payload.as_bytes());
    Ok(mac)
}

/// Lowercase hex HMAC-SHA256 (Binance, MEXC, Bybit).
pub fn hmac_sha256_hex(secret: &str, payload: &str) -> ExchangeResult<String> {
    Ok(hex::encode(mac(secret, payload)?.finalize().into_bytes()))
}

/// Base64 HMAC-SHA256 (OKX).
pub fn hmac_sha256_base64(secret: &str, payload: &str) -> ExchangeResult<String> {
    Ok(STANDARD.encode(mac(secret, payload)?.finalize().into_bytes()))
}

/// Current time in milliseconds since the epoch.
pub fn timestamp_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Current time as `2020-12-08T09:08:57.715Z`.
pub fn timestamp_iso() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}
