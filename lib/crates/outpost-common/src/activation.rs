//! Activation artifacts shared by the agent and the control plane.
//!
//! - [`UserKey`]: the one-time, out-of-band credential a human hands to a
//!   host. Sealed with the fleet bootstrap key.
//! - [`ActivationClaims`]: the host identity the agent presents when it
//!   exchanges a user key for an activation key. Sealed with the user key's
//!   own secret and carried in the `Authorization` header.
//! - [`ActivationKey`]: the signed [`AkInfo`] the control plane returns.
//!   Sealed with the bootstrap key and stored verbatim by the agent.

use chrono::{DateTime, Utc};
use ed25519_dalek::{SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::sealed::{self, SealError, SealKey};
use crate::signature::{self, SignatureError};

#[derive(Debug, Error)]
pub enum ActivationKeyError {
    #[error(transparent)]
    Seal(#[from] SealError),

    #[error(transparent)]
    Signature(#[from] SignatureError),
}

// ── Activation key ────────────────────────────────────────────────────────────

/// The trust anchor bound to one host.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AkInfo {
    pub host_uuid: String,
    /// Device identifier the key is bound to: a MAC address, or the hardware
    /// id for hosts activated with hardware binding.
    pub mac_address: String,
    /// Control plane base URI.
    pub control_plane_uri: String,
    pub expiry: DateTime<Utc>,
    /// PEM public key that signs ping responses.
    pub verify_key: String,
}

impl AkInfo {
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiry <= now
    }

    /// Whether any of the host's current device identifiers matches the binding.
    /// An empty binding matches nothing.
    #[must_use]
    pub fn is_bound_to<S: AsRef<str>>(&self, device_ids: &[S]) -> bool {
        let bound = self.mac_address.trim();
        !bound.is_empty()
            && device_ids
                .iter()
                .any(|id| id.as_ref().trim().eq_ignore_ascii_case(bound))
    }
}

/// Signed activation key as issued by the control plane.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActivationKey {
    pub info: AkInfo,
    pub signature: String,
}

impl ActivationKey {
    pub fn issue(info: AkInfo, key: &SigningKey) -> Result<Self, SignatureError> {
        let signature = signature::sign(&info, key)?;
        Ok(Self { info, signature })
    }

    /// Seal into the text blob the agent persists.
    pub fn seal(&self, bootstrap: &SealKey) -> Result<String, ActivationKeyError> {
        let body = serde_json::to_vec(self).map_err(SealError::from)?;
        Ok(sealed::seal_b64(bootstrap, &body)?)
    }

    /// Open a persisted blob. This does not check the signature.
    pub fn open(blob: &str, bootstrap: &SealKey) -> Result<Self, ActivationKeyError> {
        let body = sealed::open_b64(bootstrap, blob)?;
        Ok(serde_json::from_slice(&body).map_err(SealError::from)?)
    }

    /// Check the signature against the fleet trust key and hand out the info.
    pub fn verify(&self, trust: &VerifyingKey) -> Result<&AkInfo, SignatureError> {
        signature::verify(&self.info, &self.signature, trust)?;
        Ok(&self.info)
    }
}

// ── User key ──────────────────────────────────────────────────────────────────

/// The tenant credential used once to obtain an activation key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserKey {
    pub username: String,
    /// Control plane base URI for the activation request.
    pub uri: String,
    /// Hex-encoded 256-bit secret shared with the control plane.
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<DateTime<Utc>>,
}

impl UserKey {
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiry.is_some_and(|e| e <= now)
    }

    pub fn secret(&self) -> Result<SealKey, SealError> {
        SealKey::from_hex(&self.key)
    }

    pub fn seal(&self, bootstrap: &SealKey) -> Result<String, SealError> {
        sealed::seal_b64(bootstrap, &serde_json::to_vec(self)?)
    }

    pub fn open(blob: &str, bootstrap: &SealKey) -> Result<Self, SealError> {
        let body = sealed::open_b64(bootstrap, blob)?;
        Ok(serde_json::from_slice(&body)?)
    }
}

// ── Activation request ────────────────────────────────────────────────────────

/// Host identity presented with an activation request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActivationClaims {
    pub username: String,
    /// Primary MAC address, or hardware id when hardware binding is on.
    pub device_id: String,
    pub ip_address: String,
    pub hostname: String,
    pub time: DateTime<Utc>,
}

impl ActivationClaims {
    /// `Authorization` header value: `Bearer <username> <sealed hex(json)>`.
    pub fn bearer(&self, secret: &SealKey) -> Result<String, SealError> {
        let json = serde_json::to_vec(self)?;
        let blob = sealed::seal_b64(secret, hex::encode(json).as_bytes())?;
        Ok(format!("Bearer {} {blob}", self.username))
    }

    /// Open the sealed part of an activation header.
    pub fn open(blob: &str, secret: &SealKey) -> Result<Self, SealError> {
        let hexed = sealed::open_b64(secret, blob)?;
        let json = hex::decode(&hexed).map_err(|_| SealError::Encoding)?;
        Ok(serde_json::from_slice(&json)?)
    }
}

/// Split `Bearer <username> <blob>` into its parts.
#[must_use]
pub fn split_activation_header(header: &str) -> Option<(&str, &str)> {
    let rest = header.trim().strip_prefix("Bearer ")?;
    let (user, blob) = rest.trim().split_once(' ')?;
    let blob = blob.trim();
    if user.is_empty() || blob.is_empty() {
        return None;
    }
    Some((user, blob))
}
