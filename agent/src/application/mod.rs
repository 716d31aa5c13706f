//! Application layer: port trait definitions and use-case orchestration.
//!
//! This module depends only on `crate::domain` and `outpost_common`, never on
//! `crate::infra` or `crate::commands`.

pub mod ports;
pub mod services;

pub use ports::{
    ActivationIssuer, ControlPlane, Execution, HostProbe, Key, KeyStore, LastResort,
    PackageRunner, QueueStore, Slot,
};
