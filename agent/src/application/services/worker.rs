//! Application service: the single-flight job worker.
//!
//! Imports only from `crate::domain` and `crate::application::ports`.
//! The worker drains the durable queue one job at a time: peek, execute,
//! submit, remove. It never peeks again while a job is running.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use anyhow::{Result, bail};
use chrono::Utc;
use outpost_common::{Job, JobResult};
use tokio::sync::watch;

use crate::application::ports::{LastResort, PackageRunner, QueueStore};
use crate::application::services::queue::{JobQueue, Peeked};
use crate::domain::job::{RUNNER_DEBUG_VAR, Redactor, WorkerStatus};

/// Error reported for a job that was running when the agent stopped.
pub const INTERRUPTED: &str =
    "job was interrupted before its result was recorded and has not been re-run";

/// Default wait between queue polls when nothing wakes the worker.
pub const DEFAULT_POLL: Duration = Duration::from_secs(5);

pub struct Worker<R, S, L> {
    runner: R,
    queue: Arc<JobQueue<S>>,
    last_resort: L,
    poll: Duration,
    status: AtomicU8,
    debug: bool,
}

impl<R: PackageRunner, S: QueueStore, L: LastResort> Worker<R, S, L> {
    #[must_use]
    pub fn new(runner: R, queue: Arc<JobQueue<S>>, last_resort: L, poll: Duration) -> Self {
        Self {
            runner,
            queue,
            last_resort,
            poll,
            status: AtomicU8::new(WorkerStatus::Stopped as u8),
            debug: false,
        }
    }

    /// Log each job's environment, secrets masked.
    #[must_use]
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    #[must_use]
    pub fn status(&self) -> WorkerStatus {
        WorkerStatus::from_u8(self.status.load(Ordering::SeqCst))
    }

    /// `STOPPED -> READY`. Starting a running worker is a no-op.
    pub fn start(&self) {
        let _ = self.status.compare_exchange(
            WorkerStatus::Stopped as u8,
            WorkerStatus::Ready as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }

    pub fn stop(&self) {
        self.status
            .store(WorkerStatus::Stopped as u8, Ordering::SeqCst);
    }

    /// Handle at most one queue entry. Returns `true` if something was handled.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker is not `READY` or the queue cannot be
    /// read. Job failures are not errors; they become failed results.
    pub async fn run_once(&self) -> Result<bool> {
        if self
            .status
            .compare_exchange(
                WorkerStatus::Ready as u8,
                WorkerStatus::Busy as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            bail!("worker is {}, not READY", self.status());
        }
        let outcome = self.step().await;
        let _ = self.status.compare_exchange(
            WorkerStatus::Busy as u8,
            WorkerStatus::Ready as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
        outcome
    }

    async fn step(&self) -> Result<bool> {
        let Some(peeked) = self.queue.peek()? else {
            return Ok(false);
        };
        match peeked {
            Peeked::Ready(job) => {
                let result = self.execute(&job).await;
                self.settle(&result);
            }
            Peeked::Interrupted(job) => {
                tracing::warn!(job_id = job.job_id, "reporting interrupted job as failed");
                self.settle(&JobResult::failed(job.job_id, INTERRUPTED, Utc::now()));
            }
            Peeked::Corrupt {
                file,
                job_id: Some(job_id),
                reason,
            } => {
                tracing::error!(job_id, %file, %reason, "job file is corrupt");
                let result = JobResult::failed(job_id, format!("job file is corrupt: {reason}"), Utc::now());
                if let Err(e) = self.queue.report_corrupt(&file, &result) {
                    self.last_resort.record(&format!(
                        "job {job_id}: cannot record failure for corrupt job file {file}: {e:#}"
                    ));
                    self.queue.discard(&file)?;
                }
            }
            Peeked::Corrupt {
                file,
                job_id: None,
                reason,
            } => {
                self.last_resort.record(&format!(
                    "removing unreadable job file {file} with no recoverable job id: {reason}"
                ));
                self.queue.discard(&file)?;
            }
        }
        Ok(true)
    }

    /// Run `job` through the package runner and build its redacted result.
    async fn execute(&self, job: &Job) -> JobResult {
        let redactor = Redactor::for_job(job);
        tracing::info!(job_id = job.job_id, package = %job.package, function = %job.function, "running job");
        if self.debug {
            let mut env: Vec<String> = job
                .env()
                .into_iter()
                .map(|(k, v)| format!("{k}={}", redactor.redact(&v)))
                .collect();
            if job.verbose {
                env.push(format!("{RUNNER_DEBUG_VAR}=true"));
            }
            tracing::debug!(job_id = job.job_id, env = ?env, "job environment");
        }
        let result = match self.runner.execute(job).await {
            Ok(run) => JobResult::new(
                job.job_id,
                redactor.redact(&run.output),
                run.error.map(|e| redactor.redact(&e)),
                Utc::now(),
            ),
            Err(e) => JobResult::failed(job.job_id, redactor.redact(&format!("{e:#}")), Utc::now()),
        };
        if result.success {
            tracing::info!(job_id = job.job_id, "job succeeded");
        } else {
            tracing::warn!(job_id = job.job_id, err = %result.err, "job failed");
        }
        result
    }

    /// Hand `result` to the outbound path and drop the job from the queue.
    fn settle(&self, result: &JobResult) {
        let job_id = result.job_id;
        if let Err(e) = self.queue.submit(result) {
            self.last_resort.record(&format!(
                "job {job_id}: result could not be saved and is lost (success={}): {e:#}",
                result.success
            ));
            if let Err(e) = self.queue.abandon(job_id) {
                tracing::error!(job_id, error = %format!("{e:#}"), "cannot abandon job");
            }
            return;
        }
        if let Err(e) = self.queue.remove(job_id) {
            // The submitted-marker stops a re-run; the next peek retries the removal.
            tracing::warn!(job_id, error = %format!("{e:#}"), "cannot remove submitted job");
        }
    }

    /// Drain the queue until `shutdown` flips to `true`.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        self.start();
        tracing::info!(poll_secs = self.poll.as_secs(), "worker started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            match self.run_once().await {
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) => tracing::error!(error = %format!("{e:#}"), "worker iteration failed"),
            }
            tokio::select! {
                () = self.queue.notified() => {}
                () = tokio::time::sleep(self.poll) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        self.stop();
        tracing::info!("worker stopped");
    }
}
