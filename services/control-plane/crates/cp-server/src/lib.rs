//! Outpost reference control plane.
//!
//! Implements the agent-facing contract: host registration, the signed ping
//! exchange and activation key issuance, over a pluggable
//! [`store::JobAssignmentStore`].

pub mod activation;
pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod store;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

use crate::activation::Issuer;
use crate::store::JobAssignmentStore;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn JobAssignmentStore>,
    pub issuer: Arc<Issuer>,
    /// Interval sent with every ping response.
    pub ping_interval_secs: u64,
}

/// Compose the HTTP router:
///   - `GET /`                → health probe
///   - `POST /register`       → host facts (host token)
///   - `POST /ping`           → result/events in, signed job out (host token)
///   - `POST /activation-key` → sealed activation key (user-key claims)
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::health))
        .route("/register", post(handlers::register))
        .route("/ping", post(handlers::ping))
        .route("/activation-key", post(handlers::activation_key))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
