use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Jobs ──────────────────────────────────────────────────────────────────────

/// A unit of work assigned by the control plane.
///
/// `job_id == 0` is the "no job" sentinel carried by every ping envelope
/// when the host has nothing to run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Job {
    pub job_id: i64,
    #[serde(default)]
    pub package: String,
    #[serde(default)]
    pub function: String,
    /// Registry credentials handed to the package runner.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<Credentials>,
    #[serde(default)]
    pub verbose: bool,
    #[serde(default)]
    pub containerised: bool,
    #[serde(default)]
    pub input: Input,
}

impl Job {
    /// Returns `true` when the envelope carries real work.
    #[must_use]
    pub fn is_assigned(&self) -> bool {
        self.job_id > 0
    }

    /// Environment variables to inject into the runner: plain vars first,
    /// then secrets.
    #[must_use]
    pub fn env(&self) -> Vec<(String, String)> {
        self.input
            .vars
            .iter()
            .chain(&self.input.secrets)
            .map(|v| (v.name.clone(), v.value.clone()))
            .collect()
    }

    /// Values that must never appear in persisted or transmitted text.
    #[must_use]
    pub fn secret_values(&self) -> Vec<&str> {
        self.input.secrets.iter().map(|v| v.value.as_str()).collect()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub pwd: String,
}

/// Job input, split so secrets can be masked separately.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Input {
    #[serde(rename = "var", default)]
    pub vars: Vec<Var>,
    #[serde(rename = "secret", default)]
    pub secrets: Vec<Var>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Var {
    pub name: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

/// Outcome of a job, owned by the outbound path until the control plane
/// answers the ping that carried it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobResult {
    pub job_id: i64,
    pub success: bool,
    #[serde(default)]
    pub log: String,
    #[serde(default)]
    pub err: String,
    pub time: DateTime<Utc>,
}

impl JobResult {
    /// Build a result; `success` is derived from the absence of an error.
    #[must_use]
    pub fn new(job_id: i64, log: String, err: Option<String>, time: DateTime<Utc>) -> Self {
        Self {
            job_id,
            success: err.is_none(),
            log,
            err: err.unwrap_or_default(),
            time,
        }
    }

    /// Failure result carrying only an error message.
    #[must_use]
    pub fn failed(job_id: i64, err: impl Into<String>, time: DateTime<Utc>) -> Self {
        Self::new(job_id, String::new(), Some(err.into()), time)
    }
}

// ── Events ────────────────────────────────────────────────────────────────────

/// Opaque telemetry record with host and time metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Event {
    pub event_id: String,
    #[serde(default)]
    pub host_uuid: String,
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub machine_id: String,
    pub time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(default)]
    pub content: String,
}

// ── Ping ──────────────────────────────────────────────────────────────────────

/// Ping request body. At most one of `result` / `events` is set.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PingRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub events: Option<Vec<Event>>,
}

impl PingRequest {
    #[must_use]
    pub fn with_result(result: JobResult) -> Self {
        Self {
            result: Some(result),
            events: None,
        }
    }

    #[must_use]
    pub fn with_events(events: Vec<Event>) -> Self {
        Self {
            result: None,
            events: Some(events),
        }
    }
}

/// The signed part of a ping response.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PingEnvelope {
    pub value: Job,
    /// Requested ping interval in seconds; `0` leaves the agent's interval alone.
    #[serde(default)]
    pub interval: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PingResponse {
    /// Base64 signature over the canonical checksum of `envelope`.
    pub signature: String,
    pub envelope: PingEnvelope,
}

// ── Registration ──────────────────────────────────────────────────────────────

/// Host facts posted to `/register`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegistrationRequest {
    pub hostname: String,
    pub machine_id: String,
    pub os: String,
    pub platform: String,
    #[serde(rename = "virtual")]
    pub is_virtual: bool,
    /// Total memory in bytes.
    pub total_memory: u64,
    pub cpus: usize,
    pub host_ip: String,
    pub mac_address: Vec<String>,
}

/// What the control plane did with a registration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Operation {
    #[serde(rename = "I")]
    Inserted,
    #[serde(rename = "U")]
    Updated,
    #[serde(rename = "N")]
    Unchanged,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Inserted => write!(f, "new host registration created"),
            Self::Updated => write!(f, "host registration updated"),
            Self::Unchanged => write!(f, "host already registered"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegistrationResponse {
    pub operation: Operation,
}
