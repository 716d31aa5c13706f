//! Unit tests for the outpost agent
//!
//! These tests use in-memory and mocked ports and run without network access.

mod activation_service;
mod heartbeat_service;
mod property_tests;
mod worker_service;
