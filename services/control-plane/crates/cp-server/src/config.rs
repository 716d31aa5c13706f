//! Server configuration loaded from environment variables via `envy`.
//!
//! Each field maps to `OUTPOST_CP_<FIELD>`:
//!   - `OUTPOST_CP_LISTEN_ADDR`              (default `0.0.0.0:8080`)
//!   - `OUTPOST_CP_PUBLIC_URI`               (default `http://localhost:8080`)
//!   - `OUTPOST_CP_BOOTSTRAP_KEY`            (required, hex, 32 bytes)
//!   - `OUTPOST_CP_SIGNING_KEY_FILE`         (required, PKCS#8 PEM)
//!   - `OUTPOST_CP_PING_INTERVAL_SECS`       (default `15`)
//!   - `OUTPOST_CP_ACTIVATION_VALIDITY_DAYS` (default `365`)
//!   - `OUTPOST_CP_TENANTS`                  (`user:hexkey,...`, user keys accepted
//!     for activation)

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use outpost_common::SealKey;
use serde::Deserialize;

pub const ENV_PREFIX: &str = "OUTPOST_CP_";

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Socket address to bind the HTTP server to.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Base URI written into activation keys; agents ping this address.
    #[serde(default = "default_public_uri")]
    pub public_uri: String,

    /// Fleet bootstrap key, hex encoded.
    pub bootstrap_key: String,

    /// Ed25519 key signing activation keys and ping responses.
    pub signing_key_file: PathBuf,

    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,

    #[serde(default = "default_activation_validity_days")]
    pub activation_validity_days: i64,

    #[serde(default)]
    pub tenants: Option<String>,
}

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_public_uri() -> String {
    "http://localhost:8080".to_string()
}

fn default_ping_interval_secs() -> u64 {
    15
}

fn default_activation_validity_days() -> i64 {
    365
}

impl ServerConfig {
    /// # Errors
    ///
    /// Returns an error if a required variable is missing or a value cannot
    /// be parsed.
    pub fn load() -> Result<Self> {
        envy::prefixed(ENV_PREFIX).from_env().context(
            "failed to load config from OUTPOST_CP_* env vars \
             (OUTPOST_CP_BOOTSTRAP_KEY and OUTPOST_CP_SIGNING_KEY_FILE are required)",
        )
    }

    /// # Errors
    ///
    /// Returns an error if a required variable is missing or a value cannot
    /// be parsed.
    pub fn from_vars<I: IntoIterator<Item = (String, String)>>(vars: I) -> Result<Self> {
        envy::prefixed(ENV_PREFIX)
            .from_iter(vars)
            .context("failed to load config from OUTPOST_CP_* env vars")
    }

    /// Parse `tenants` into `(username, secret)` pairs.
    ///
    /// # Errors
    ///
    /// Returns an error if an entry is not `user:hexkey` or the key is invalid.
    pub fn tenant_keys(&self) -> Result<Vec<(String, SealKey)>> {
        let Some(raw) = self.tenants.as_deref() else {
            return Ok(Vec::new());
        };
        let mut out = Vec::new();
        for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let Some((user, key)) = entry.split_once(':') else {
                bail!("tenant entry '{entry}' is not user:hexkey");
            };
            let key = SealKey::from_hex(key.trim())
                .with_context(|| format!("tenant '{user}' has an invalid key"))?;
            out.push((user.trim().to_owned(), key));
        }
        Ok(out)
    }
}
