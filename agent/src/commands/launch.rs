//! `outpost launch`: the agent itself.
//!
//! Start-up order is local checks first, then activation, so every fatal
//! failure happens before the first network call that depends on it. The
//! worker starts draining leftovers immediately; the ping loop starts once
//! registration succeeds.

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::watch;
use tracing::Instrument as _;

use crate::app::Bootstrap;
use crate::application::ports::PackageRunner;
use crate::application::services::heartbeat::Heartbeat;
use crate::application::services::worker::Worker;
use crate::domain::{Backoff, LaunchError};
use crate::infra::host::SystemProbe;
use crate::infra::http::HttpControlPlane;
use crate::infra::package_runner::ProcessRunner;
use crate::infra::syslog::Syslog;

/// # Errors
///
/// Returns [`LaunchError::RunnerMissing`] if the package runner cannot be
/// found, or any activation failure.
pub async fn run(boot: Bootstrap) -> Result<()> {
    let runner = ProcessRunner::new(boot.config.runner.clone())
        .with_timeout(boot.config.job_timeout());
    if !runner.is_available() {
        return Err(LaunchError::RunnerMissing(boot.config.runner.clone()).into());
    }
    let queue = Arc::new(boot.open_queue()?);
    let client = boot.client()?;
    let ctx = boot.establish(&SystemProbe::default()).await?;

    let plane = HttpControlPlane::new(client, ctx.control_plane_uri(), ctx.host_uuid());
    let mut heartbeat = Heartbeat::new(
        plane,
        Arc::clone(&queue),
        ctx.activation.verify_key,
        Syslog::default(),
    )
    .with_backoff(Backoff::for_host(ctx.host_uuid()))
    .with_events_per_ping(ctx.config.events_per_ping);
    let worker = Worker::new(runner, queue, Syslog::default(), ctx.config.worker_poll())
        .with_debug(ctx.config.debug);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let registration = ctx.host.registration();
    let worker_rx = shutdown_rx.clone();

    async {
        tracing::info!(control_plane = %ctx.control_plane_uri(), "agent starting");
        tokio::join!(
            worker.run(worker_rx),
            async {
                let mut rx = shutdown_rx;
                let registered = tokio::select! {
                    _ = heartbeat.register(&registration) => true,
                    _ = rx.changed() => false,
                };
                if registered {
                    heartbeat.run(rx).await;
                }
            },
            wait_for_shutdown(shutdown_tx),
        );
        tracing::info!("agent stopped");
    }
    .instrument(ctx.span.clone())
    .await;
    Ok(())
}

/// Flip the shutdown channel on Ctrl-C or SIGTERM.
async fn wait_for_shutdown(tx: watch::Sender<bool>) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "cannot listen for SIGTERM, Ctrl-C only");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    tracing::info!("shutdown requested, finishing current work");
    let _ = tx.send(true);
}
