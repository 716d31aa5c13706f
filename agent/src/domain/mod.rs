//! Domain layer. Pure agent logic: job states, backoff, host identity and
//! activation checks.
//!
//! This module has zero imports from `crate::infra`, `crate::commands`,
//! `crate::application`, `tokio`, `std::fs`, `std::process`, or `std::net`.
//! All functions are synchronous and take data in, returning data out.

pub mod activation;
pub mod backoff;
pub mod error;
pub mod host;
pub mod job;

pub use backoff::{Backoff, next_interval};
pub use error::{ActivationError, LaunchError, PlaneError, QueueError};
pub use host::HostInfo;
pub use job::{JobState, Redactor, WorkerStatus};
