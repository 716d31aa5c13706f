//! Job lifecycle states, queue file naming, runner arguments and redaction.

use std::fmt;
use std::sync::LazyLock;

use outpost_common::Job;
use regex::Regex;

// ── Job state ─────────────────────────────────────────────────────────────────

/// Lifecycle of a queued job, encoded on disk by which files exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobState {
    /// Job file only.
    Queued,
    /// Job file and started-marker.
    Started,
    /// Submitted-marker present; the result has been handed to the outbound path.
    Submitted,
    /// Nothing left on disk.
    Removed,
}

impl JobState {
    /// Derive the state from marker presence.
    ///
    /// The submitted-marker wins over everything else: once it exists the job
    /// must never run again, whatever else survived a crash.
    #[must_use]
    pub fn from_markers(job_file: bool, started: bool, submitted: bool) -> Self {
        match (job_file, started, submitted) {
            (_, _, true) => Self::Submitted,
            (true, true, false) => Self::Started,
            (true, false, false) => Self::Queued,
            (false, _, false) => Self::Removed,
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Queued => "QUEUED",
            Self::Started => "STARTED",
            Self::Submitted => "SUBMITTED",
            Self::Removed => "REMOVED",
        };
        f.write_str(s)
    }
}

// ── File naming ───────────────────────────────────────────────────────────────

pub const JOB_EXT: &str = "job";
pub const RESULT_EXT: &str = "result";
pub const EVENT_EXT: &str = "ev";
pub const IN_FLIGHT_EVENTS: &str = "events.json";

#[must_use]
pub fn job_file(job_id: i64) -> String {
    format!("job_{job_id}.{JOB_EXT}")
}

#[must_use]
pub fn started_marker(job_id: i64) -> String {
    format!("job_{job_id}.started")
}

#[must_use]
pub fn submitted_marker(job_id: i64) -> String {
    format!("job_{job_id}.submitted")
}

#[must_use]
pub fn result_file(job_id: i64) -> String {
    format!("job_{job_id}.{RESULT_EXT}")
}

static DIGITS: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"\d+").ok());

/// Best-effort job id recovery from a queue file name such as `job_17.job`.
#[must_use]
pub fn salvage_job_id(file_name: &str) -> Option<i64> {
    let re = DIGITS.as_ref()?;
    re.find(file_name)
        .and_then(|m| m.as_str().parse::<i64>().ok())
        .filter(|id| *id > 0)
}

/// Job id of a marker file name (`job_<id>.started` / `job_<id>.submitted`).
#[must_use]
pub fn marker_job_id(file_name: &str) -> Option<i64> {
    let stem = file_name
        .strip_suffix(".started")
        .or_else(|| file_name.strip_suffix(".submitted"))?;
    stem.strip_prefix("job_")?.parse().ok()
}

// ── Worker status ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkerStatus {
    Stopped = 0,
    Ready = 1,
    Busy = 2,
}

impl WorkerStatus {
    #[must_use]
    pub fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Ready,
            2 => Self::Busy,
            _ => Self::Stopped,
        }
    }
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Stopped => "STOPPED",
            Self::Ready => "READY",
            Self::Busy => "BUSY",
        };
        f.write_str(s)
    }
}

// ── Runner invocation ─────────────────────────────────────────────────────────

/// Environment variable switched on for verbose jobs.
pub const RUNNER_DEBUG_VAR: &str = "RUNNER_DEBUG";

/// Arguments for `<runner> exe|exec [-u user:pwd] <package> <function>`.
#[must_use]
pub fn runner_args(job: &Job) -> Vec<String> {
    let mode = if job.containerised { "exec" } else { "exe" };
    let mut args = vec![mode.to_owned()];
    if let Some(creds) = job.credentials.as_ref().filter(|c| !c.user.is_empty()) {
        args.push("-u".to_owned());
        args.push(format!("{}:{}", creds.user, creds.pwd));
    }
    args.push(job.package.clone());
    args.push(job.function.clone());
    args
}

// ── Redaction ─────────────────────────────────────────────────────────────────

const USER_MASK: &str = "****";
const SECRET_MASK: &str = "xxxx";

/// Masks a job's credentials and secret inputs in free text.
#[derive(Debug, Clone, Default)]
pub struct Redactor {
    user: Option<String>,
    secrets: Vec<String>,
}

impl Redactor {
    #[must_use]
    pub fn for_job(job: &Job) -> Self {
        let mut secrets: Vec<String> = job
            .secret_values()
            .into_iter()
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
            .collect();
        let mut user = None;
        if let Some(creds) = &job.credentials {
            if !creds.pwd.is_empty() {
                secrets.push(creds.pwd.clone());
            }
            if !creds.user.is_empty() {
                user = Some(creds.user.clone());
            }
        }
        // Longest first so a secret containing another is masked whole.
        secrets.sort_by_key(|s| std::cmp::Reverse(s.len()));
        Self { user, secrets }
    }

    #[must_use]
    pub fn redact(&self, text: &str) -> String {
        let mut out = text.to_owned();
        for secret in &self.secrets {
            out = out.replace(secret.as_str(), SECRET_MASK);
        }
        if let Some(user) = &self.user {
            out = out.replace(user.as_str(), USER_MASK);
        }
        out
    }
}
