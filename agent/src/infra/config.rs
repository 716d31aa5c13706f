//! Agent configuration loaded from `OUTPOST_*` environment variables via `envy`.
//!
//! Each field maps to `OUTPOST_<FIELD>`:
//!   - `OUTPOST_HOME`                 (default `~/.outpost`, `--home` wins)
//!   - `OUTPOST_BOOTSTRAP_KEY`        (hex, 32 bytes; required to launch)
//!   - `OUTPOST_TRUST_KEY_FILE`       (default `<home>/trust.pem`)
//!   - `OUTPOST_RUNNER`               (default `pkgrunner`)
//!   - `OUTPOST_EVENTS_PER_PING`      (default `5`)
//!   - `OUTPOST_WORKER_POLL_SECS`     (default `5`)
//!   - `OUTPOST_JOB_TIMEOUT_SECS`     (default unset, no timeout)
//!   - `OUTPOST_REQUEST_TIMEOUT_SECS` (default `30`)
//!   - `OUTPOST_INSECURE_SKIP_VERIFY` (default `false`)
//!   - `OUTPOST_USE_HARDWARE_ID`      (default `false`)
//!   - `OUTPOST_DEBUG`                (default `false`)

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use outpost_common::SealKey;
use serde::Deserialize;

use crate::application::services::heartbeat::DEFAULT_EVENTS_PER_PING;
use crate::domain::LaunchError;
use crate::infra::keys::TRUST_KEY_FILE;
use crate::infra::package_runner::DEFAULT_RUNNER;

pub const ENV_PREFIX: &str = "OUTPOST_";

#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub home: Option<PathBuf>,

    /// Fleet bootstrap key, hex encoded.
    #[serde(default)]
    pub bootstrap_key: Option<String>,

    #[serde(default)]
    pub trust_key_file: Option<PathBuf>,

    /// Package runner binary, by path or name on `PATH`.
    #[serde(default = "default_runner")]
    pub runner: String,

    #[serde(default = "default_events_per_ping")]
    pub events_per_ping: usize,

    #[serde(default = "default_worker_poll_secs")]
    pub worker_poll_secs: u64,

    #[serde(default)]
    pub job_timeout_secs: Option<u64>,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default)]
    pub insecure_skip_verify: bool,

    /// Bind activation to the DMI product UUID instead of MAC addresses.
    #[serde(default)]
    pub use_hardware_id: bool,

    #[serde(default)]
    pub debug: bool,
}

fn default_runner() -> String {
    DEFAULT_RUNNER.to_string()
}

fn default_events_per_ping() -> usize {
    DEFAULT_EVENTS_PER_PING
}

fn default_worker_poll_secs() -> u64 {
    5
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            home: None,
            bootstrap_key: None,
            trust_key_file: None,
            runner: default_runner(),
            events_per_ping: default_events_per_ping(),
            worker_poll_secs: default_worker_poll_secs(),
            job_timeout_secs: None,
            request_timeout_secs: default_request_timeout_secs(),
            insecure_skip_verify: false,
            use_hardware_id: false,
            debug: false,
        }
    }
}

impl AgentConfig {
    /// Load from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set but cannot be parsed.
    pub fn load() -> Result<Self> {
        envy::prefixed(ENV_PREFIX)
            .from_env()
            .context("failed to load configuration from OUTPOST_* environment variables")
    }

    /// Load from explicit `(name, value)` pairs.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set but cannot be parsed.
    pub fn from_vars<I: IntoIterator<Item = (String, String)>>(vars: I) -> Result<Self> {
        envy::prefixed(ENV_PREFIX)
            .from_iter(vars)
            .context("failed to load configuration from OUTPOST_* environment variables")
    }

    /// Agent home: the CLI override, then `OUTPOST_HOME`, then `~/.outpost`.
    ///
    /// # Errors
    ///
    /// Returns an error if no override is given and the user home directory
    /// cannot be determined.
    pub fn resolve_home(&self, cli_home: Option<&Path>) -> Result<PathBuf> {
        if let Some(home) = cli_home.or(self.home.as_deref()) {
            return Ok(home.to_path_buf());
        }
        let home =
            dirs::home_dir().ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
        Ok(home.join(".outpost"))
    }

    #[must_use]
    pub fn trust_key_path(&self, home: &Path) -> PathBuf {
        self.trust_key_file
            .clone()
            .unwrap_or_else(|| home.join(TRUST_KEY_FILE))
    }

    /// The fleet bootstrap key.
    ///
    /// # Errors
    ///
    /// Returns [`LaunchError::NoBootstrapKey`] when unset, or a parse error.
    pub fn bootstrap(&self) -> Result<SealKey> {
        let hex = self
            .bootstrap_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or(LaunchError::NoBootstrapKey)?;
        SealKey::from_hex(hex).context("OUTPOST_BOOTSTRAP_KEY is not a valid 32-byte hex key")
    }

    #[must_use]
    pub fn worker_poll(&self) -> Duration {
        Duration::from_secs(self.worker_poll_secs.max(1))
    }

    #[must_use]
    pub fn job_timeout(&self) -> Option<Duration> {
        self.job_timeout_secs
            .filter(|s| *s > 0)
            .map(Duration::from_secs)
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}
