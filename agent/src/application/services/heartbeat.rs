//! Application service: registration and the steady-state ping loop.
//!
//! Each ping carries at most one outbound item: the oldest pending result, or
//! else a batch of events. The response envelope is only acted on once its
//! signature verifies against the activation key's verification key; an
//! unverified envelope neither enqueues a job nor changes the interval.
//!
//! Outbound items are deleted as soon as the control plane answers 2xx, before
//! the envelope is checked. A transport failure deletes nothing. An item the
//! control plane refuses outright (a permanent 4xx) is recorded on the last
//! resort channel and dropped, so it cannot block everything queued behind it.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use outpost_common::signature::{self, VerifyingKey};
use outpost_common::{PingRequest, RegistrationRequest, RegistrationResponse};
use tokio::sync::watch;

use crate::application::ports::{ControlPlane, LastResort, QueueStore};
use crate::application::services::queue::JobQueue;
use crate::domain::error::QueueError;
use crate::domain::{Backoff, PlaneError};

/// Ping interval until the control plane sends a verified one.
pub const FALLBACK_INTERVAL: Duration = Duration::from_secs(15);

/// Events carried by one ping unless configured otherwise.
pub const DEFAULT_EVENTS_PER_PING: usize = 5;

/// What a ping carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outbound {
    Nothing,
    Result(i64),
    Events(usize),
}

/// Outcome of one successful ping exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PingReport {
    pub sent: Outbound,
    /// Job id added to the local queue by this ping.
    pub enqueued: Option<i64>,
    /// Whether the response envelope carried a valid signature.
    pub trusted: bool,
    /// Interval in force after this ping.
    pub interval: Duration,
}

pub struct Heartbeat<C, S, L> {
    plane: C,
    queue: Arc<JobQueue<S>>,
    verify_key: VerifyingKey,
    last_resort: L,
    backoff: Backoff,
    events_per_ping: usize,
    interval: Duration,
}

impl<C: ControlPlane, S: QueueStore, L: LastResort> Heartbeat<C, S, L> {
    #[must_use]
    pub fn new(
        plane: C,
        queue: Arc<JobQueue<S>>,
        verify_key: VerifyingKey,
        last_resort: L,
    ) -> Self {
        Self {
            plane,
            queue,
            verify_key,
            last_resort,
            backoff: Backoff::unjittered(),
            events_per_ping: DEFAULT_EVENTS_PER_PING,
            interval: FALLBACK_INTERVAL,
        }
    }

    #[must_use]
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    #[must_use]
    pub fn with_events_per_ping(mut self, events_per_ping: usize) -> Self {
        self.events_per_ping = events_per_ping.max(1);
        self
    }

    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Register host facts, retrying until the control plane accepts them.
    pub async fn register(&self, request: &RegistrationRequest) -> RegistrationResponse {
        let mut failures: u32 = 0;
        loop {
            match self.plane.register(request).await {
                Ok(response) => {
                    tracing::info!(operation = %response.operation, "registration complete");
                    return response;
                }
                Err(e) => {
                    let wait = self.backoff.delay(failures);
                    tracing::warn!(
                        error = %format!("{e:#}"),
                        attempt = failures + 1,
                        "registration failed, retrying in {:.1} minutes",
                        wait.as_secs_f64() / 60.0
                    );
                    tokio::time::sleep(wait).await;
                    failures = failures.saturating_add(1);
                }
            }
        }
    }

    /// Build the next ping body. A pending result always wins over events.
    pub fn next_request(&self) -> (PingRequest, Outbound) {
        match self.queue.peek_result() {
            Ok(Some(result)) => {
                let id = result.job_id;
                return (PingRequest::with_result(result), Outbound::Result(id));
            }
            Ok(None) => {}
            Err(e) => match e.downcast_ref::<QueueError>() {
                Some(QueueError::CorruptResult { .. }) => self.last_resort.record(&format!("{e:#}")),
                _ => tracing::error!(error = %format!("{e:#}"), "cannot read pending results"),
            },
        }
        match self.queue.take_events(self.events_per_ping) {
            Ok(events) if !events.is_empty() => {
                let n = events.len();
                (PingRequest::with_events(events), Outbound::Events(n))
            }
            Ok(_) => (PingRequest::default(), Outbound::Nothing),
            Err(e) => {
                tracing::error!(error = %format!("{e:#}"), "cannot read pending events");
                (PingRequest::default(), Outbound::Nothing)
            }
        }
    }

    /// One ping exchange.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or a non-2xx answer. The
    /// interval is unchanged, and nothing is deleted locally unless the
    /// answer was a permanent rejection.
    pub async fn ping_once(&mut self) -> Result<PingReport> {
        let (request, sent) = self.next_request();
        let response = match self.plane.ping(&request).await {
            Ok(response) => response,
            Err(e) => {
                if e.downcast_ref::<PlaneError>()
                    .is_some_and(PlaneError::is_permanent)
                {
                    self.drop_rejected(&request, sent, &e);
                }
                return Err(e);
            }
        };
        self.acknowledge(sent);

        let trusted = match signature::verify(
            &response.envelope,
            &response.signature,
            &self.verify_key,
        ) {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(
                    error = %e,
                    job_id = response.envelope.value.job_id,
                    "ping response failed signature verification, ignoring it"
                );
                false
            }
        };

        let mut enqueued = None;
        if trusted {
            let envelope = response.envelope;
            if envelope.interval > 0 {
                let interval = Duration::from_secs(envelope.interval);
                if interval != self.interval {
                    tracing::info!(interval_secs = envelope.interval, "ping interval changed");
                }
                self.interval = interval;
            }
            let job = envelope.value;
            if job.is_assigned() {
                match self.queue.enqueue(&job) {
                    Ok(true) => {
                        tracing::info!(job_id = job.job_id, "job received");
                        enqueued = Some(job.job_id);
                    }
                    Ok(false) => {}
                    Err(e) => self.last_resort.record(&format!(
                        "job {}: received but could not be queued: {e:#}",
                        job.job_id
                    )),
                }
            }
        }

        Ok(PingReport {
            sent,
            enqueued,
            trusted,
            interval: self.interval,
        })
    }

    fn drop_rejected(&self, request: &PingRequest, sent: Outbound, err: &anyhow::Error) {
        let what = match (sent, &request.result) {
            (Outbound::Nothing, _) => return,
            (Outbound::Result(job_id), Some(result)) => format!(
                "job {job_id}: result (success={}) rejected by control plane, dropped",
                result.success
            ),
            (Outbound::Result(job_id), None) => {
                format!("job {job_id}: result rejected by control plane, dropped")
            }
            (Outbound::Events(count), _) => {
                format!("{count} event(s) rejected by control plane, dropped")
            }
        };
        self.last_resort.record(&format!("{what}: {err:#}"));
        self.acknowledge(sent);
    }

    fn acknowledge(&self, sent: Outbound) {
        let outcome = match sent {
            Outbound::Nothing => Ok(()),
            Outbound::Result(job_id) => self.queue.remove_result(job_id),
            Outbound::Events(_) => self.queue.remove_events(),
        };
        if let Err(e) = outcome {
            tracing::warn!(error = %format!("{e:#}"), ?sent, "cannot delete sent items, they will be sent again");
        }
    }

    /// Ping every `interval` until `shutdown` flips to `true`.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(interval_secs = self.interval.as_secs(), "ping loop operational");
        loop {
            if *shutdown.borrow() {
                break;
            }
            match self.ping_once().await {
                Ok(report) => tracing::debug!(?report, "ping complete"),
                Err(e) => tracing::warn!(error = %format!("{e:#}"), "ping failed"),
            }
            tokio::select! {
                () = tokio::time::sleep(self.interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        tracing::info!("ping loop stopped");
    }
}
