//! Application services: use-case orchestration.
//!
//! Each service module implements one long-running concern of the agent by
//! composing domain logic with port trait calls. Services import only from
//! `crate::domain` and `crate::application::ports`, never from `crate::infra`
//! or `crate::commands`.

pub mod activation;
pub mod heartbeat;
pub mod queue;
pub mod worker;
