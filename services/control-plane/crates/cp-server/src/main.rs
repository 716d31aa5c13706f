//! Outpost control-plane entry point.
//!
//! Initialises tracing, loads configuration from `OUTPOST_CP_*` environment
//! variables, and serves the agent-facing API over an in-memory store.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::TimeDelta;
use outpost_common::SealKey;
use outpost_common::signature::signing_key_from_pem;
use tracing_subscriber::EnvFilter;

use cp_server::activation::Issuer;
use cp_server::config::ServerConfig;
use cp_server::store::MemoryStore;
use cp_server::{AppState, router};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = ServerConfig::load()?;
    let bootstrap =
        SealKey::from_hex(&config.bootstrap_key).context("OUTPOST_CP_BOOTSTRAP_KEY is not a valid key")?;
    let pem = std::fs::read_to_string(&config.signing_key_file).with_context(|| {
        format!("failed to read signing key from {}", config.signing_key_file.display())
    })?;
    let signing = signing_key_from_pem(&pem).context("failed to parse signing key")?;
    let issuer = Issuer::new(
        bootstrap,
        signing,
        config.public_uri.clone(),
        TimeDelta::days(config.activation_validity_days),
    )?;

    tracing::info!(
        listen_addr = %config.listen_addr,
        public_uri = %config.public_uri,
        ping_interval_secs = config.ping_interval_secs,
        "configuration loaded",
    );

    let store = MemoryStore::default();
    for (username, key) in config.tenant_keys()? {
        store.add_tenant(&username, key)?;
        tracing::info!(%username, "tenant enabled");
    }

    let state = AppState {
        store: Arc::new(store),
        issuer: Arc::new(issuer),
        ping_interval_secs: config.ping_interval_secs,
    };

    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .context("failed to bind TCP listener")?;
    tracing::info!("control plane ready on http://{}", config.listen_addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    tracing::info!("control plane shut down");
    Ok(())
}

/// Wait for SIGINT (Ctrl-C) for graceful shutdown.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "cannot listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    tracing::info!("received shutdown signal");
}
