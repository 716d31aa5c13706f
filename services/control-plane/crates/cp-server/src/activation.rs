//! Activation key issuance and response signing.
//!
//! One Ed25519 key signs both activation keys and ping envelopes here, so the
//! agent's trust key and the activation key's `verify_key` are the same
//! public key. Agents treat them as independent.

use anyhow::{Context, Result};
use chrono::{DateTime, TimeDelta, Utc};
use outpost_common::signature::{self, SigningKey};
use outpost_common::token::MAX_TOKEN_AGE_SECS;
use outpost_common::{ActivationClaims, ActivationKey, AkInfo, PingEnvelope, PingResponse, SealKey};
use uuid::Uuid;

use crate::error::ApiError;

pub struct Issuer {
    bootstrap: SealKey,
    signing: SigningKey,
    verify_pem: String,
    public_uri: String,
    validity: TimeDelta,
}

impl Issuer {
    /// # Errors
    ///
    /// Returns an error if the public half of `signing` cannot be encoded.
    pub fn new(
        bootstrap: SealKey,
        signing: SigningKey,
        public_uri: impl Into<String>,
        validity: TimeDelta,
    ) -> Result<Self> {
        let verify_pem = signature::verifying_key_to_pem(&signing.verifying_key())
            .context("encoding verification key")?;
        Ok(Self {
            bootstrap,
            signing,
            verify_pem,
            public_uri: public_uri.into(),
            validity,
        })
    }

    /// Sealed, signed activation key binding `host_uuid` to the claimed device.
    ///
    /// # Errors
    ///
    /// Returns an error if signing or sealing fails.
    pub fn issue(&self, host_uuid: &str, claims: &ActivationClaims, now: DateTime<Utc>) -> Result<String> {
        let info = AkInfo {
            host_uuid: host_uuid.to_owned(),
            mac_address: claims.device_id.clone(),
            control_plane_uri: self.public_uri.clone(),
            expiry: now + self.validity,
            verify_key: self.verify_pem.clone(),
        };
        let ak = ActivationKey::issue(info, &self.signing).context("signing activation key")?;
        ak.seal(&self.bootstrap).context("sealing activation key")
    }

    /// Sign a ping envelope.
    ///
    /// # Errors
    ///
    /// Returns an error if the envelope cannot be canonicalised.
    pub fn sign(&self, envelope: PingEnvelope) -> Result<PingResponse> {
        let signature = signature::sign(&envelope, &self.signing).context("signing ping response")?;
        Ok(PingResponse {
            signature,
            envelope,
        })
    }
}

/// Reject claims for another user, without a device id, or outside the token
/// age window.
///
/// # Errors
///
/// Returns [`ApiError::Unauthorized`] on a mismatch or stale claims.
pub fn check_claims(claims: &ActivationClaims, username: &str, now: DateTime<Utc>) -> Result<(), ApiError> {
    if claims.username != username {
        return Err(ApiError::Unauthorized(format!(
            "activation claims are for '{}', not '{username}'",
            claims.username
        )));
    }
    if claims.device_id.trim().is_empty() {
        return Err(ApiError::Unauthorized(
            "activation claims carry no device id".into(),
        ));
    }
    let age = (now - claims.time).num_seconds();
    if age.abs() > MAX_TOKEN_AGE_SECS {
        return Err(ApiError::Unauthorized(format!(
            "activation request is {age}s old"
        )));
    }
    Ok(())
}

/// Random (version 4) UUID for a newly admitted host.
#[must_use]
pub fn new_host_uuid() -> String {
    Uuid::new_v4().to_string()
}
