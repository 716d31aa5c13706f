//! Typed domain error enums.
//!
//! All error types implement `thiserror::Error` and convert to `anyhow::Error`
//! via the `?` operator.

use chrono::{DateTime, Utc};
use outpost_common::SignatureError;
use thiserror::Error;

use crate::domain::job::JobState;

// ── Activation errors ─────────────────────────────────────────────────────────

/// Trust failures. Every variant is fatal: the agent exits instead of
/// running unauthenticated.
#[derive(Debug, Error)]
pub enum ActivationError {
    #[error("missing activation key: no activation key or user key found in {0}")]
    Missing(String),

    #[error("cannot load user key: {0}")]
    UserKey(String),

    #[error("user key expired on {0}")]
    UserKeyExpired(DateTime<Utc>),

    #[error("cannot read activation key: {0}")]
    Unreadable(String),

    #[error("activation key cannot be trusted: {0}")]
    Untrusted(#[source] SignatureError),

    #[error("activation key expired on {0}")]
    Expired(DateTime<Utc>),

    #[error("activation key is bound to device '{bound}', host has [{found}]")]
    ForeignHost { bound: String, found: String },

    #[error("host has no {0} to bind an activation key to")]
    NoDeviceId(&'static str),
}

// ── Queue errors ──────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("job {job_id}: cannot move from {expected} to {to}, job is {actual}")]
    IllegalTransition {
        job_id: i64,
        expected: JobState,
        actual: JobState,
        to: JobState,
    },

    #[error("job {0}: no result file to submit")]
    MissingResult(i64),

    #[error("unreadable result file '{file}' removed: {reason}")]
    CorruptResult { file: String, reason: String },
}

// ── Control plane errors ──────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum PlaneError {
    #[error("POST {url} returned {status}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },
}

impl PlaneError {
    /// Whether the control plane refused the request itself, so sending it
    /// again cannot succeed. Authentication, timeout and rate-limit answers
    /// are not permanent.
    #[must_use]
    pub fn is_permanent(&self) -> bool {
        match self {
            Self::Status { status, .. } => {
                (400..500).contains(status) && !matches!(status, 401 | 403 | 408 | 429)
            }
        }
    }
}

// ── Launch errors ─────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("cannot find package runner '{0}', ensure it is installed before launching")]
    RunnerMissing(String),

    #[error("bootstrap key is not configured (set OUTPOST_BOOTSTRAP_KEY)")]
    NoBootstrapKey,
}

impl LaunchError {
    /// Process exit code for this failure.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::RunnerMissing(_) => 127,
            Self::NoBootstrapKey => 1,
        }
    }
}
