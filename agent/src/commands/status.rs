//! `outpost status`: activation and queue state, without touching the network.

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::Args;
use serde::Serialize;

use crate::app::Bootstrap;
use crate::application::ports::HostProbe;
use crate::application::services::queue::{JobQueue, QueueStats};
use crate::infra::host::SystemProbe;

#[derive(Args)]
pub struct StatusArgs {
    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Machine-readable status.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct StatusReport {
    pub home: String,
    pub activated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_uuid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub control_plane: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiry: Option<DateTime<Utc>>,
    /// Why the agent is not activated, when it is not.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub problem: Option<String>,
    pub queue: QueueStats,
}

/// Gather the report. Activation problems are reported, not raised.
///
/// # Errors
///
/// Returns an error if the queue directories exist but cannot be listed.
pub fn collect(boot: &Bootstrap, probe: &impl HostProbe) -> Result<StatusReport> {
    let queue = JobQueue::new(boot.store()).stats()?;
    let mut report = StatusReport {
        home: boot.home.display().to_string(),
        activated: false,
        host_uuid: None,
        control_plane: None,
        expiry: None,
        problem: None,
        queue,
    };
    let loaded = probe
        .probe()
        .and_then(|host| boot.activation(host))
        .and_then(|activation| activation.load(Utc::now()).map_err(anyhow::Error::from));
    match loaded {
        Ok(Some(activated)) => {
            report.activated = true;
            report.host_uuid = Some(activated.info.host_uuid);
            report.control_plane = Some(activated.info.control_plane_uri);
            report.expiry = Some(activated.info.expiry);
        }
        Ok(None) => report.problem = Some("no activation key".to_owned()),
        Err(e) => report.problem = Some(format!("{e:#}")),
    }
    Ok(report)
}

/// # Errors
///
/// Returns an error if the report cannot be gathered or serialized.
pub fn run(boot: &Bootstrap, args: &StatusArgs) -> Result<()> {
    let report = collect(boot, &SystemProbe::default())?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }
    println!("home:       {}", report.home);
    if report.activated {
        println!("activation: active");
        println!("host uuid:  {}", report.host_uuid.as_deref().unwrap_or("-"));
        println!("control:    {}", report.control_plane.as_deref().unwrap_or("-"));
        if let Some(expiry) = report.expiry {
            println!("expires:    {}", expiry.format("%Y-%m-%d %H:%M UTC"));
        }
    } else {
        println!(
            "activation: inactive ({})",
            report.problem.as_deref().unwrap_or("unknown")
        );
    }
    println!(
        "queue:      {} job(s), {} result(s), {} event(s) pending",
        report.queue.jobs, report.queue.results, report.queue.events
    );
    Ok(())
}
