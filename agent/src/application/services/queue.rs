//! Application service: the durable job queue and its outbound spools.
//!
//! Job lifecycle is an explicit state machine over marker files:
//!
//! ```text
//! REMOVED ──enqueue──▶ QUEUED ──peek──▶ STARTED ──submit──▶ SUBMITTED ──remove──▶ REMOVED
//! ```
//!
//! Every edge goes through [`JobQueue::transition`], which checks the prior
//! state and holds the queue lock while it touches the store. The ordering of
//! file effects inside each edge is what makes a kill between any two of them
//! recoverable without running a job twice:
//!
//! - submit writes the result, then the submitted-marker, then drops the
//!   started-marker, so "submitted" never exists without a result
//! - remove deletes the job file first and the submitted-marker last, so a
//!   crash in between leaves an orphan marker rather than a runnable job
//! - a started job with no submitted-marker is never re-run: peek finishes it
//!   if its result survived, otherwise hands it back as interrupted

use std::sync::Mutex;

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use outpost_common::{Event, Job, JobResult};
use tokio::sync::Notify;

use crate::application::ports::{Key, QueueStore, Slot};
use crate::domain::error::QueueError;
use crate::domain::job::{
    EVENT_EXT, JOB_EXT, JobState, RESULT_EXT, job_file, marker_job_id, salvage_job_id,
};

/// What `peek` found at the head of the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Peeked {
    /// A job ready to run; its started-marker is now written.
    Ready(Job),
    /// A job that started before a crash and has no result. It must not run
    /// again; report it as failed instead.
    Interrupted(Job),
    /// A job file that could not be read or parsed.
    Corrupt {
        file: String,
        job_id: Option<i64>,
        reason: String,
    },
}

/// Counts of pending work, for status reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct QueueStats {
    pub jobs: usize,
    pub results: usize,
    pub events: usize,
}

/// Durable, single-consumer job queue.
pub struct JobQueue<S> {
    store: S,
    lock: Mutex<()>,
    wake: Notify,
}

impl<S: QueueStore> JobQueue<S> {
    #[must_use]
    pub fn new(store: S) -> Self {
        Self {
            store,
            lock: Mutex::new(()),
            wake: Notify::new(),
        }
    }

    /// Open a queue over existing state, sweeping markers whose job is gone.
    ///
    /// # Errors
    ///
    /// Returns an error if the marker directory cannot be listed.
    pub fn open(store: S) -> Result<Self> {
        let queue = Self::new(store);
        queue.sweep_orphans()?;
        Ok(queue)
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Current state of `job_id`, derived from which files exist.
    #[must_use]
    pub fn state(&self, job_id: i64) -> JobState {
        JobState::from_markers(
            self.store.exists(&Key::job(job_id)),
            self.store.exists(&Key::started(job_id)),
            self.store.exists(&Key::submitted(job_id)),
        )
    }

    /// Move `job_id` from `from` to `to`.
    ///
    /// `STARTED -> SUBMITTED` through this entry point requires the result file
    /// to exist already; [`JobQueue::submit`] writes it as part of the edge.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::IllegalTransition`] if the job is not in `from`
    /// or the edge does not exist, or any store error.
    pub fn transition(&self, job_id: i64, from: JobState, to: JobState) -> Result<()> {
        self.apply(job_id, from, to, None)
    }

    fn apply(&self, job_id: i64, from: JobState, to: JobState, body: Option<&[u8]>) -> Result<()> {
        let _guard = self.lock.lock().map_err(|_| anyhow!("queue lock poisoned"))?;
        let actual = self.state(job_id);
        let illegal = || QueueError::IllegalTransition {
            job_id,
            expected: from,
            actual,
            to,
        };
        if actual != from {
            return Err(illegal().into());
        }
        match (from, to) {
            (JobState::Removed, JobState::Queued) => {
                let body = body.ok_or_else(illegal)?;
                self.store.remove(&Key::started(job_id))?;
                self.store.write(&Key::job(job_id), body)?;
            }
            (JobState::Queued, JobState::Started) => {
                self.store.write(&Key::started(job_id), &[])?;
            }
            (JobState::Started, JobState::Submitted) => {
                match body {
                    Some(result) => self.store.write(&Key::result(job_id), result)?,
                    None if self.store.exists(&Key::result(job_id)) => {}
                    None => return Err(QueueError::MissingResult(job_id).into()),
                }
                self.store.write(&Key::submitted(job_id), &[])?;
                self.store.remove(&Key::started(job_id))?;
            }
            (JobState::Submitted, JobState::Removed) => {
                self.store.remove(&Key::job(job_id))?;
                self.store.remove(&Key::started(job_id))?;
                self.store.remove(&Key::submitted(job_id))?;
            }
            (JobState::Queued | JobState::Started, JobState::Removed) => {
                self.store.remove(&Key::job(job_id))?;
                self.store.remove(&Key::started(job_id))?;
            }
            _ => return Err(illegal().into()),
        }
        tracing::debug!(job_id, %from, %to, "job transition");
        Ok(())
    }

    // ── Jobs ──────────────────────────────────────────────────────────────────

    /// Add `job` to the queue. Returns `false` if the job id is already known.
    ///
    /// # Errors
    ///
    /// Returns an error if the job file cannot be written.
    pub fn enqueue(&self, job: &Job) -> Result<bool> {
        let state = self.state(job.job_id);
        if state != JobState::Removed {
            tracing::warn!(job_id = job.job_id, %state, "job already in local queue, ignoring");
            return Ok(false);
        }
        let body = serde_json::to_vec(job).context("serializing job")?;
        self.apply(job.job_id, JobState::Removed, JobState::Queued, Some(&body))?;
        self.wake.notify_one();
        Ok(true)
    }

    /// Return the oldest runnable job, resolving crash leftovers on the way.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue cannot be listed or a marker cannot be
    /// written. Unreadable job files are not errors; they are returned as
    /// [`Peeked::Corrupt`].
    pub fn peek(&self) -> Result<Option<Peeked>> {
        for name in self.store.list(Slot::Process, JOB_EXT)? {
            let job = match self.read_job(&name) {
                Ok(job) => job,
                Err(reason) => {
                    return Ok(Some(Peeked::Corrupt {
                        job_id: salvage_job_id(&name),
                        file: name,
                        reason,
                    }));
                }
            };
            let id = job.job_id;
            match self.state(id) {
                JobState::Submitted => {
                    tracing::info!(job_id = id, "job was submitted before a restart, removing it");
                    self.transition(id, JobState::Submitted, JobState::Removed)?;
                }
                JobState::Started if self.store.exists(&Key::result(id)) => {
                    tracing::info!(job_id = id, "completing interrupted submit");
                    self.transition(id, JobState::Started, JobState::Submitted)?;
                    self.transition(id, JobState::Submitted, JobState::Removed)?;
                }
                JobState::Started => return Ok(Some(Peeked::Interrupted(job))),
                JobState::Queued => {
                    self.transition(id, JobState::Queued, JobState::Started)?;
                    return Ok(Some(Peeked::Ready(job)));
                }
                JobState::Removed => {}
            }
        }
        Ok(None)
    }

    fn read_job(&self, name: &str) -> std::result::Result<Job, String> {
        let bytes = self
            .store
            .read(&Key::new(Slot::Process, name))
            .map_err(|e| format!("cannot read: {e:#}"))?;
        if bytes.is_empty() {
            return Err("file is empty".to_owned());
        }
        let job: Job = serde_json::from_slice(&bytes).map_err(|e| {
            format!(
                "cannot parse, possibly corrupted: {e}; content was '{}'",
                String::from_utf8_lossy(&bytes)
            )
        })?;
        if job_file(job.job_id) != name {
            return Err(format!("file holds job id {}", job.job_id));
        }
        Ok(job)
    }

    /// Persist `result` and mark its job submitted.
    ///
    /// # Errors
    ///
    /// Returns an error if the job is not `STARTED` or a write fails.
    pub fn submit(&self, result: &JobResult) -> Result<()> {
        let body = serde_json::to_vec(result).context("serializing job result")?;
        self.apply(
            result.job_id,
            JobState::Started,
            JobState::Submitted,
            Some(&body),
        )
    }

    /// Drop a submitted job from the queue.
    ///
    /// # Errors
    ///
    /// Returns an error if the job is not `SUBMITTED` or a delete fails.
    pub fn remove(&self, job_id: i64) -> Result<()> {
        self.transition(job_id, JobState::Submitted, JobState::Removed)
    }

    /// Remove every trace of a job whose result could not be persisted.
    ///
    /// # Errors
    ///
    /// Returns an error if a delete fails.
    pub fn abandon(&self, job_id: i64) -> Result<()> {
        match self.state(job_id) {
            JobState::Removed => Ok(()),
            state => self.transition(job_id, state, JobState::Removed),
        }
    }

    /// Report an unreadable job file under its salvaged id and drop the file.
    ///
    /// # Errors
    ///
    /// Returns an error if the result cannot be written or the file removed.
    pub fn report_corrupt(&self, file: &str, result: &JobResult) -> Result<()> {
        let _guard = self.lock.lock().map_err(|_| anyhow!("queue lock poisoned"))?;
        let body = serde_json::to_vec(result).context("serializing job result")?;
        self.store.write(&Key::result(result.job_id), &body)?;
        self.store.remove(&Key::new(Slot::Process, file))?;
        self.store.remove(&Key::started(result.job_id))?;
        Ok(())
    }

    /// Force-remove a job file that cannot be attributed to any job.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be removed.
    pub fn discard(&self, file: &str) -> Result<()> {
        let _guard = self.lock.lock().map_err(|_| anyhow!("queue lock poisoned"))?;
        self.store.remove(&Key::new(Slot::Process, file))
    }

    /// Wait until a job is enqueued.
    pub async fn notified(&self) {
        self.wake.notified().await;
    }

    fn sweep_orphans(&self) -> Result<()> {
        for ext in ["started", "submitted"] {
            for name in self.store.list(Slot::Data, ext)? {
                let Some(id) = marker_job_id(&name) else {
                    continue;
                };
                if !self.store.exists(&Key::job(id)) {
                    tracing::debug!(job_id = id, marker = %name, "removing orphan marker");
                    self.store.remove(&Key::new(Slot::Data, name))?;
                }
            }
        }
        Ok(())
    }

    // ── Results ───────────────────────────────────────────────────────────────

    /// Oldest result waiting to be sent.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::CorruptResult`] after deleting a result file that
    /// cannot be parsed, or any store error.
    pub fn peek_result(&self) -> Result<Option<JobResult>> {
        let Some(name) = self.store.list(Slot::Submit, RESULT_EXT)?.into_iter().next() else {
            return Ok(None);
        };
        let key = Key::new(Slot::Submit, name.clone());
        let bytes = self.store.read(&key)?;
        match serde_json::from_slice(&bytes) {
            Ok(result) => Ok(Some(result)),
            Err(e) => {
                self.store.remove(&key)?;
                Err(QueueError::CorruptResult {
                    file: name,
                    reason: e.to_string(),
                }
                .into())
            }
        }
    }

    /// Delete a result once the control plane has taken it.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be removed.
    pub fn remove_result(&self, job_id: i64) -> Result<()> {
        self.store.remove(&Key::result(job_id))
    }

    // ── Events ────────────────────────────────────────────────────────────────

    /// Spool an event for the next pings. Returns its file name.
    ///
    /// # Errors
    ///
    /// Returns an error if the event cannot be written.
    pub fn save_event(&self, event: &Event) -> Result<String> {
        let _guard = self.lock.lock().map_err(|_| anyhow!("queue lock poisoned"))?;
        let stamp = Utc::now().format("%Y%m%d%H%M%S%9f").to_string();
        let mut name = format!("{stamp}.{EVENT_EXT}");
        let mut n = 1;
        while self.store.exists(&Key::new(Slot::Submit, name.as_str())) {
            name = format!("{stamp}-{n}.{EVENT_EXT}");
            n += 1;
        }
        let body = serde_json::to_vec(event).context("serializing event")?;
        self.store.write(&Key::new(Slot::Submit, name.as_str()), &body)?;
        Ok(name)
    }

    /// Up to `max` events for the next ping.
    ///
    /// The batch is recorded as in flight, and the same batch is handed out
    /// again until [`JobQueue::remove_events`] acknowledges it.
    ///
    /// # Errors
    ///
    /// Returns an error if the spool cannot be listed or the in-flight list
    /// cannot be written.
    pub fn take_events(&self, max: usize) -> Result<Vec<Event>> {
        let _guard = self.lock.lock().map_err(|_| anyhow!("queue lock poisoned"))?;
        if let Some(names) = self.in_flight()? {
            let events = self.load_events(&names);
            if !events.is_empty() {
                return Ok(events);
            }
            self.store.remove(&Key::in_flight_events())?;
        }
        let names: Vec<String> = self
            .store
            .list(Slot::Submit, EVENT_EXT)?
            .into_iter()
            .take(max)
            .collect();
        if names.is_empty() {
            return Ok(Vec::new());
        }
        let list = serde_json::to_vec(&names).context("serializing in-flight events")?;
        self.store.write(&Key::in_flight_events(), &list)?;
        Ok(self.load_events(&names))
    }

    /// Delete the in-flight event batch.
    ///
    /// # Errors
    ///
    /// Returns an error if a file cannot be removed.
    pub fn remove_events(&self) -> Result<()> {
        let _guard = self.lock.lock().map_err(|_| anyhow!("queue lock poisoned"))?;
        for name in self.in_flight()?.unwrap_or_default() {
            self.store.remove(&Key::new(Slot::Submit, name))?;
        }
        self.store.remove(&Key::in_flight_events())
    }

    fn in_flight(&self) -> Result<Option<Vec<String>>> {
        let key = Key::in_flight_events();
        if !self.store.exists(&key) {
            return Ok(None);
        }
        let bytes = self.store.read(&key)?;
        match serde_json::from_slice(&bytes) {
            Ok(names) => Ok(Some(names)),
            Err(e) => {
                tracing::warn!(error = %e, "in-flight event list unreadable, starting a new batch");
                self.store.remove(&key)?;
                Ok(None)
            }
        }
    }

    fn load_events(&self, names: &[String]) -> Vec<Event> {
        names
            .iter()
            .filter_map(|name| {
                let bytes = self.store.read(&Key::new(Slot::Submit, name.as_str())).ok()?;
                match serde_json::from_slice(&bytes) {
                    Ok(event) => Some(event),
                    Err(e) => {
                        tracing::warn!(file = %name, error = %e, "skipping unreadable event");
                        None
                    }
                }
            })
            .collect()
    }

    // ── Stats ─────────────────────────────────────────────────────────────────

    /// Pending jobs, results and events.
    ///
    /// # Errors
    ///
    /// Returns an error if a spool cannot be listed.
    pub fn stats(&self) -> Result<QueueStats> {
        Ok(QueueStats {
            jobs: self.store.list(Slot::Process, JOB_EXT)?.len(),
            results: self.store.list(Slot::Submit, RESULT_EXT)?.len(),
            events: self.store.list(Slot::Submit, EVENT_EXT)?.len(),
        })
    }
}
