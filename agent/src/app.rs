//! Application context: the explicit state shared by every command handler.
//!
//! [`Bootstrap`] is built once in `Cli::run()` from the environment and the
//! global `--home` flag. It knows where things live and how to build the
//! infra adapters, but has not touched the network. [`AgentContext`] is what
//! a successful activation yields: the verified activation key, the host
//! facts it was checked against, and the root span both loops run under.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use crate::application::ports::HostProbe;
use crate::application::services::activation::{Activated, Activation, TrustAnchors};
use crate::application::services::queue::JobQueue;
use crate::domain::{Backoff, HostInfo, LaunchError};
use crate::infra::config::AgentConfig;
use crate::infra::fs::FsStore;
use crate::infra::http::{HttpActivationIssuer, build_client};
use crate::infra::keys::{FsKeyStore, load_trust_key};

/// Install the global `tracing` subscriber.
///
/// `RUST_LOG` wins; otherwise `info`, or `debug` when `debug` is set.
pub fn init_tracing(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

/// Configuration and locations, before activation.
pub struct Bootstrap {
    pub config: AgentConfig,
    pub home: PathBuf,
}

impl Bootstrap {
    /// Load configuration from the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the environment cannot be parsed or no home
    /// directory can be determined.
    pub fn load(cli_home: Option<&Path>) -> Result<Self> {
        let config = AgentConfig::load()?;
        Self::with_config(config, cli_home)
    }

    /// # Errors
    ///
    /// Returns an error if no home directory can be determined.
    pub fn with_config(config: AgentConfig, cli_home: Option<&Path>) -> Result<Self> {
        let home = config.resolve_home(cli_home)?;
        Ok(Self { config, home })
    }

    #[must_use]
    pub fn keys(&self) -> FsKeyStore {
        FsKeyStore::new(&self.home)
    }

    #[must_use]
    pub fn store(&self) -> FsStore {
        FsStore::new(&self.home)
    }

    /// Bootstrap key and fleet trust key.
    ///
    /// # Errors
    ///
    /// Returns an error if the bootstrap key is missing or invalid, or the
    /// trust key cannot be loaded.
    pub fn anchors(&self) -> Result<TrustAnchors> {
        let bootstrap = self.config.bootstrap()?;
        let trust = load_trust_key(&self.config.trust_key_path(&self.home))?;
        Ok(TrustAnchors { bootstrap, trust })
    }

    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn client(&self) -> Result<reqwest::Client> {
        build_client(
            self.config.request_timeout(),
            self.config.insecure_skip_verify,
        )
    }

    /// Activation service for `host`.
    ///
    /// # Errors
    ///
    /// Returns an error if the trust anchors or HTTP client are unavailable.
    pub fn activation(&self, host: HostInfo) -> Result<Activation<FsKeyStore, HttpActivationIssuer>> {
        let backoff = Backoff::for_host(&host.machine_id);
        Ok(Activation::new(
            self.keys(),
            HttpActivationIssuer::new(self.client()?),
            self.anchors()?,
            host,
        )
        .with_backoff(backoff)
        .with_hardware_id(self.config.use_hardware_id))
    }

    /// Open the durable queue, creating its directories and sweeping leftovers.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue directories cannot be created or listed.
    pub fn open_queue(&self) -> Result<JobQueue<FsStore>> {
        let store = self.store();
        store.ensure_layout()?;
        JobQueue::open(store)
    }

    /// Probe the host and run the activation handshake.
    ///
    /// # Errors
    ///
    /// Returns an error for any trust failure; network failures are retried.
    pub async fn establish(self, probe: &impl HostProbe) -> Result<AgentContext> {
        let host = probe.probe().context("probing host facts")?;
        let activated = self.activation(host.clone())?.ensure().await?;
        Ok(AgentContext::new(self, host, activated))
    }
}

/// Everything a running agent needs, passed by reference.
pub struct AgentContext {
    pub config: AgentConfig,
    pub home: PathBuf,
    pub host: HostInfo,
    pub activation: Activated,
    /// `outpost{host_uuid}`; both loops are instrumented with it.
    pub span: tracing::Span,
}

impl AgentContext {
    #[must_use]
    pub fn new(boot: Bootstrap, host: HostInfo, activation: Activated) -> Self {
        let span = tracing::info_span!("outpost", host_uuid = %activation.info.host_uuid);
        Self {
            config: boot.config,
            home: boot.home,
            host,
            activation,
            span,
        }
    }

    #[must_use]
    pub fn host_uuid(&self) -> &str {
        &self.activation.info.host_uuid
    }

    #[must_use]
    pub fn control_plane_uri(&self) -> &str {
        &self.activation.info.control_plane_uri
    }
}

/// Exit code for a top-level failure: launch errors carry their own, trust
/// failures and everything else exit 1.
#[must_use]
pub fn exit_code(err: &anyhow::Error) -> i32 {
    err.downcast_ref::<LaunchError>()
        .map_or(1, LaunchError::exit_code)
}
