//! Port trait definitions for the Application layer.
//!
//! Ports are the interfaces (contracts) that infrastructure must fulfill.
//! This file imports only from `crate::domain` and `outpost_common`, never
//! from `crate::infra` or `crate::commands`.

use anyhow::Result;
use outpost_common::{Job, PingRequest, PingResponse, RegistrationRequest, RegistrationResponse};

use crate::domain::HostInfo;
use crate::domain::job::{
    IN_FLIGHT_EVENTS, job_file, result_file, started_marker, submitted_marker,
};

// ── Queue storage ─────────────────────────────────────────────────────────────

/// Directory a queue key lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Slot {
    /// Queued job bodies.
    Process,
    /// Markers and the in-flight event list.
    Data,
    /// Outbound results and events.
    Submit,
}

/// Location of one queue artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key {
    pub slot: Slot,
    pub name: String,
}

impl Key {
    #[must_use]
    pub fn new(slot: Slot, name: impl Into<String>) -> Self {
        Self {
            slot,
            name: name.into(),
        }
    }

    #[must_use]
    pub fn job(job_id: i64) -> Self {
        Self::new(Slot::Process, job_file(job_id))
    }

    #[must_use]
    pub fn started(job_id: i64) -> Self {
        Self::new(Slot::Data, started_marker(job_id))
    }

    #[must_use]
    pub fn submitted(job_id: i64) -> Self {
        Self::new(Slot::Data, submitted_marker(job_id))
    }

    #[must_use]
    pub fn result(job_id: i64) -> Self {
        Self::new(Slot::Submit, result_file(job_id))
    }

    #[must_use]
    pub fn in_flight_events() -> Self {
        Self::new(Slot::Data, IN_FLIGHT_EVENTS)
    }
}

/// Key-existence storage backing the durable queue.
///
/// Writes must be atomic: a reader sees either the whole payload or no key.
pub trait QueueStore {
    fn exists(&self, key: &Key) -> bool;
    /// Create or replace `key`.
    fn write(&self, key: &Key, bytes: &[u8]) -> Result<()>;
    fn read(&self, key: &Key) -> Result<Vec<u8>>;
    /// Delete `key`; deleting a missing key succeeds.
    fn remove(&self, key: &Key) -> Result<()>;
    /// Names in `slot` with extension `ext`, oldest first.
    fn list(&self, slot: Slot, ext: &str) -> Result<Vec<String>>;
}

// ── Package runner ────────────────────────────────────────────────────────────

/// Captured outcome of one runner invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Execution {
    /// Combined stdout and stderr.
    pub output: String,
    /// Set when the runner did not exit cleanly.
    pub error: Option<String>,
}

/// Runs a job's package function as a subprocess.
#[allow(async_fn_in_trait)]
pub trait PackageRunner {
    /// Run `job` to completion.
    ///
    /// # Errors
    ///
    /// Returns an error if the process cannot be spawned or is killed on
    /// timeout. A non-zero exit is not an error; it is reported in
    /// [`Execution::error`].
    async fn execute(&self, job: &Job) -> Result<Execution>;

    /// Whether the runner binary can be found.
    fn is_available(&self) -> bool;
}

// ── Control plane ─────────────────────────────────────────────────────────────

/// Host-authenticated control-plane calls.
#[allow(async_fn_in_trait)]
pub trait ControlPlane {
    /// Register host facts. Non-2xx answers are errors.
    async fn register(&self, request: &RegistrationRequest) -> Result<RegistrationResponse>;
    /// Exchange one ping. Non-2xx answers are errors.
    async fn ping(&self, request: &PingRequest) -> Result<PingResponse>;
}

/// Exchanges an activation bearer token for a sealed activation key.
#[allow(async_fn_in_trait)]
pub trait ActivationIssuer {
    /// POST to `<uri>/activation-key`; returns the response body on `201`.
    async fn request_activation_key(&self, uri: &str, bearer: &str) -> Result<Vec<u8>>;
}

// ── Local keys ────────────────────────────────────────────────────────────────

/// Access to the sealed activation and user keys on disk.
pub trait KeyStore {
    fn load_activation(&self) -> Result<Option<String>>;
    /// Persist the activation blob exactly as received, owner-only.
    fn save_activation(&self, blob: &[u8]) -> Result<()>;
    fn load_user_key(&self) -> Result<Option<String>>;
    /// Human-readable location, for error messages.
    fn location(&self) -> String;
}

// ── Host ──────────────────────────────────────────────────────────────────────

pub trait HostProbe {
    fn probe(&self) -> Result<HostInfo>;
}

// ── Last resort ───────────────────────────────────────────────────────────────

/// Channel for errors that cannot travel through the queue itself.
pub trait LastResort {
    fn record(&self, message: &str);
}
