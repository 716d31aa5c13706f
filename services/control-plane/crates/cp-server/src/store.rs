//! Job assignment storage behind the control plane.
//!
//! The production store is relational and lives outside this workspace; the
//! server only depends on [`JobAssignmentStore`]. [`MemoryStore`] backs tests
//! and single-node demos.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use outpost_common::{Event, Job, JobResult, Operation, RegistrationRequest, SealKey};

/// Appended to a job log when the agent reported a failure.
pub const FAILURE_MARKER: &str = " !!! ERROR: ";

#[async_trait]
pub trait JobAssignmentStore: Send + Sync {
    /// Symmetric secret of the user key issued to `username`.
    async fn tenant_key(&self, username: &str) -> Result<Option<SealKey>>;

    /// Let `host_uuid` call host-authenticated endpoints.
    async fn admit(&self, host_uuid: &str, device_id: &str) -> Result<()>;

    async fn is_admitted(&self, host_uuid: &str) -> Result<bool>;

    /// Record host facts, keyed by machine id.
    async fn register_host(&self, host_uuid: &str, facts: &RegistrationRequest)
    -> Result<Operation>;

    /// Atomically hand the host's oldest unclaimed job to this caller.
    async fn claim_next_job(&self, host_uuid: &str) -> Result<Option<Job>>;

    /// Close a claimed job. Returns `false` if the job is unknown to this host.
    async fn complete_job(&self, host_uuid: &str, result: &JobResult) -> Result<bool>;

    async fn append_events(&self, host_uuid: &str, events: Vec<Event>) -> Result<()>;
}

// ── In-memory store ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Claimed,
    Done { failed: bool, log: String },
}

#[derive(Debug, Clone)]
pub struct JobRecord {
    pub host_uuid: String,
    pub job: Job,
    pub status: JobStatus,
}

#[derive(Default)]
struct Inner {
    tenants: HashMap<String, SealKey>,
    /// host UUID -> device id it was activated with
    admitted: HashMap<String, String>,
    /// machine id -> (host UUID, facts)
    hosts: HashMap<String, (String, RegistrationRequest)>,
    jobs: Vec<JobRecord>,
    events: Vec<Event>,
}

/// Mutex-guarded store; every method is one critical section.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>> {
        self.inner.lock().map_err(|_| anyhow!("store lock poisoned"))
    }

    /// Accept activation requests signed with `key` for `username`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store lock is poisoned.
    pub fn add_tenant(&self, username: &str, key: SealKey) -> Result<()> {
        self.lock()?.tenants.insert(username.to_owned(), key);
        Ok(())
    }

    /// Queue `job` for `host_uuid`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store lock is poisoned.
    pub fn assign(&self, host_uuid: &str, job: Job) -> Result<()> {
        self.lock()?.jobs.push(JobRecord {
            host_uuid: host_uuid.to_owned(),
            job,
            status: JobStatus::Pending,
        });
        Ok(())
    }

    /// # Errors
    ///
    /// Returns an error if the store lock is poisoned.
    pub fn job(&self, job_id: i64) -> Result<Option<JobRecord>> {
        Ok(self
            .lock()?
            .jobs
            .iter()
            .find(|r| r.job.job_id == job_id)
            .cloned())
    }

    /// # Errors
    ///
    /// Returns an error if the store lock is poisoned.
    pub fn events(&self) -> Result<Vec<Event>> {
        Ok(self.lock()?.events.clone())
    }

    /// Device id a host was admitted with.
    ///
    /// # Errors
    ///
    /// Returns an error if the store lock is poisoned.
    pub fn device_of(&self, host_uuid: &str) -> Result<Option<String>> {
        Ok(self.lock()?.admitted.get(host_uuid).cloned())
    }
}

#[async_trait]
impl JobAssignmentStore for MemoryStore {
    async fn tenant_key(&self, username: &str) -> Result<Option<SealKey>> {
        Ok(self.lock()?.tenants.get(username).cloned())
    }

    async fn admit(&self, host_uuid: &str, device_id: &str) -> Result<()> {
        self.lock()?
            .admitted
            .insert(host_uuid.to_owned(), device_id.to_owned());
        Ok(())
    }

    async fn is_admitted(&self, host_uuid: &str) -> Result<bool> {
        Ok(self.lock()?.admitted.contains_key(host_uuid))
    }

    async fn register_host(
        &self,
        host_uuid: &str,
        facts: &RegistrationRequest,
    ) -> Result<Operation> {
        let mut inner = self.lock()?;
        let entry = (host_uuid.to_owned(), facts.clone());
        let op = match inner.hosts.get(&facts.machine_id) {
            None => Operation::Inserted,
            Some(existing) if *existing == entry => Operation::Unchanged,
            Some(_) => Operation::Updated,
        };
        if op != Operation::Unchanged {
            inner.hosts.insert(facts.machine_id.clone(), entry);
        }
        Ok(op)
    }

    async fn claim_next_job(&self, host_uuid: &str) -> Result<Option<Job>> {
        let mut inner = self.lock()?;
        let next = inner
            .jobs
            .iter_mut()
            .find(|r| r.host_uuid == host_uuid && r.status == JobStatus::Pending);
        Ok(next.map(|record| {
            record.status = JobStatus::Claimed;
            record.job.clone()
        }))
    }

    async fn complete_job(&self, host_uuid: &str, result: &JobResult) -> Result<bool> {
        let mut inner = self.lock()?;
        let Some(record) = inner
            .jobs
            .iter_mut()
            .find(|r| r.host_uuid == host_uuid && r.job.job_id == result.job_id)
        else {
            return Ok(false);
        };
        let mut log = result.log.clone();
        if !result.success && !result.err.is_empty() {
            log = format!("{log}{FAILURE_MARKER}{}", result.err);
        }
        record.status = JobStatus::Done {
            failed: !result.success,
            log,
        };
        Ok(true)
    }

    async fn append_events(&self, _host_uuid: &str, events: Vec<Event>) -> Result<()> {
        self.lock()?.events.extend(events);
        Ok(())
    }
}
