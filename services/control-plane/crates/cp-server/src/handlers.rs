//! Agent-facing HTTP handlers.

use axum::Json;
use axum::extract::State;
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, StatusCode};
use chrono::Utc;
use outpost_common::{
    ActivationClaims, PingEnvelope, PingRequest, PingResponse, RegistrationRequest,
    RegistrationResponse, split_activation_header,
};

use crate::AppState;
use crate::activation::{check_claims, new_host_uuid};
use crate::auth::HostIdentity;
use crate::error::ApiError;

/// `GET /`: liveness probe.
pub async fn health() -> StatusCode {
    StatusCode::OK
}

/// `POST /register`
pub async fn register(
    HostIdentity(host_uuid): HostIdentity,
    State(state): State<AppState>,
    Json(facts): Json<RegistrationRequest>,
) -> Result<(StatusCode, Json<RegistrationResponse>), ApiError> {
    let operation = state.store.register_host(&host_uuid, &facts).await?;
    tracing::info!(%host_uuid, hostname = %facts.hostname, machine_id = %facts.machine_id, %operation, "host registered");
    Ok((StatusCode::CREATED, Json(RegistrationResponse { operation })))
}

/// `POST /ping`
///
/// A carried result is stored before the next job is claimed, so a job is
/// never reported complete after the agent has been told about a new one.
/// A result for a job this host does not hold is logged and dropped; the
/// agent would otherwise resend it forever.
pub async fn ping(
    HostIdentity(host_uuid): HostIdentity,
    State(state): State<AppState>,
    Json(request): Json<PingRequest>,
) -> Result<(StatusCode, Json<PingResponse>), ApiError> {
    if let Some(result) = &request.result {
        if state.store.complete_job(&host_uuid, result).await? {
            tracing::info!(%host_uuid, job_id = result.job_id, success = result.success, "job completed");
        } else {
            tracing::warn!(%host_uuid, job_id = result.job_id, "result for a job not held by this host, dropped");
        }
    }
    if let Some(events) = request.events.filter(|e| !e.is_empty()) {
        tracing::debug!(%host_uuid, count = events.len(), "events received");
        state.store.append_events(&host_uuid, events).await?;
    }

    let job = state
        .store
        .claim_next_job(&host_uuid)
        .await?
        .unwrap_or_default();
    if job.is_assigned() {
        tracing::info!(%host_uuid, job_id = job.job_id, "job dispatched");
    }
    let response = state.issuer.sign(PingEnvelope {
        value: job,
        interval: state.ping_interval_secs,
    })?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// `POST /activation-key`: exchange user-key claims for an activation key.
pub async fn activation_key(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<(StatusCode, String), ApiError> {
    let header = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::Unauthorized("missing authorization header".into()))?;
    let (username, blob) = split_activation_header(header)
        .ok_or_else(|| ApiError::Unauthorized("malformed activation header".into()))?;
    let secret = state
        .store
        .tenant_key(username)
        .await?
        .ok_or_else(|| ApiError::Unauthorized(format!("unknown user '{username}'")))?;
    let claims = ActivationClaims::open(blob, &secret)
        .map_err(|e| ApiError::Unauthorized(format!("cannot open activation claims: {e}")))?;
    let now = Utc::now();
    check_claims(&claims, username, now)?;

    let host_uuid = new_host_uuid();
    state.store.admit(&host_uuid, &claims.device_id).await?;
    let ak = state.issuer.issue(&host_uuid, &claims, now)?;
    tracing::info!(
        %host_uuid,
        %username,
        device_id = %claims.device_id,
        hostname = %claims.hostname,
        ip = %claims.ip_address,
        "host activated"
    );
    Ok((StatusCode::CREATED, ak))
}
