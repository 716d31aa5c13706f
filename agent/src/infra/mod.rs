//! Infrastructure layer: concrete implementations of application port traits.
//!
//! This module contains all I/O-performing code: queue files, key files,
//! the package runner subprocess, HTTP to the control plane, host probing,
//! syslog, and environment configuration.
//!
//! Imports from `crate::domain` and `crate::application::ports` are allowed.
//! Imports from `crate::commands` are forbidden.

pub mod config;
pub mod fs;
pub mod host;
pub mod http;
pub mod keys;
pub mod package_runner;
pub mod syslog;
