//! Application service: activation handshake.
//!
//! Imports only from `crate::domain` and `crate::application::ports`.
//!
//! An existing activation key is loaded and fully checked on every start:
//! unsealed with the bootstrap key, signature-checked against the fleet trust
//! key, then checked for expiry and device binding. Any failure is fatal.
//!
//! Without one, the user key is exchanged for an activation key. Transport
//! failures are retried forever with the shared backoff; a missing or expired
//! user key is fatal.

use anyhow::Result;
use chrono::{DateTime, Utc};
use outpost_common::signature::{self, VerifyingKey};
use outpost_common::{ActivationKey, AkInfo, SealKey, UserKey};

use crate::application::ports::{ActivationIssuer, KeyStore};
use crate::domain::activation::{check_binding, claims};
use crate::domain::{ActivationError, Backoff, HostInfo};

/// Keys the agent trusts before it has an activation key.
#[derive(Debug, Clone)]
pub struct TrustAnchors {
    /// Fleet key sealing the user key and the activation key at rest.
    pub bootstrap: SealKey,
    /// Control-plane key signing activation keys.
    pub trust: VerifyingKey,
}

/// A loaded, verified activation key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Activated {
    pub info: AkInfo,
    /// Parsed `info.verify_key`, used on every ping response.
    pub verify_key: VerifyingKey,
}

pub struct Activation<K, I> {
    keys: K,
    issuer: I,
    anchors: TrustAnchors,
    host: HostInfo,
    backoff: Backoff,
    use_hardware_id: bool,
}

impl<K: KeyStore, I: ActivationIssuer> Activation<K, I> {
    #[must_use]
    pub fn new(keys: K, issuer: I, anchors: TrustAnchors, host: HostInfo) -> Self {
        Self {
            keys,
            issuer,
            anchors,
            host,
            backoff: Backoff::unjittered(),
            use_hardware_id: false,
        }
    }

    #[must_use]
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Bind to the hardware id instead of the MAC addresses.
    #[must_use]
    pub fn with_hardware_id(mut self, use_hardware_id: bool) -> Self {
        self.use_hardware_id = use_hardware_id;
        self
    }

    /// Load and verify the stored activation key, if there is one.
    ///
    /// # Errors
    ///
    /// Returns an [`ActivationError`] if a stored key exists but cannot be
    /// opened, fails its signature check, has expired, or belongs to another
    /// host.
    pub fn load(&self, now: DateTime<Utc>) -> Result<Option<Activated>, ActivationError> {
        let blob = self
            .keys
            .load_activation()
            .map_err(|e| ActivationError::Unreadable(format!("{e:#}")))?;
        let Some(blob) = blob else {
            return Ok(None);
        };
        let ak = ActivationKey::open(blob.trim(), &self.anchors.bootstrap)
            .map_err(|e| ActivationError::Unreadable(e.to_string()))?;
        let info = ak
            .verify(&self.anchors.trust)
            .map_err(ActivationError::Untrusted)?;
        let verify_key = signature::verifying_key_from_pem(&info.verify_key)
            .map_err(ActivationError::Untrusted)?;
        check_binding(info, &self.host, self.use_hardware_id, now)?;
        Ok(Some(Activated {
            info: info.clone(),
            verify_key,
        }))
    }

    /// Open the user key and check it has not expired.
    ///
    /// # Errors
    ///
    /// Returns [`ActivationError::Missing`] if there is no user key, or
    /// [`ActivationError::UserKey`] / [`ActivationError::UserKeyExpired`] if
    /// it cannot be used.
    pub fn user_key(&self, now: DateTime<Utc>) -> Result<UserKey, ActivationError> {
        let blob = self
            .keys
            .load_user_key()
            .map_err(|e| ActivationError::UserKey(format!("{e:#}")))?
            .ok_or_else(|| ActivationError::Missing(self.keys.location()))?;
        let user = UserKey::open(blob.trim(), &self.anchors.bootstrap)
            .map_err(|e| ActivationError::UserKey(e.to_string()))?;
        if let Some(expiry) = user.expiry.filter(|_| user.is_expired(now)) {
            return Err(ActivationError::UserKeyExpired(expiry));
        }
        Ok(user)
    }

    /// Return the verified activation key, obtaining one first if needed.
    ///
    /// # Errors
    ///
    /// Returns an [`ActivationError`] for every trust failure. Network
    /// failures are retried and never returned.
    pub async fn ensure(&self) -> Result<Activated, ActivationError> {
        if let Some(activated) = self.load(Utc::now())? {
            return Ok(activated);
        }
        let user = self.user_key(Utc::now())?;
        self.host.device_id(self.use_hardware_id)?;
        let secret = user
            .secret()
            .map_err(|e| ActivationError::UserKey(e.to_string()))?;
        tracing::info!(username = %user.username, uri = %user.uri, "requesting activation key");

        let mut failures: u32 = 0;
        while let Err(e) = self.request(&user, &secret).await {
            let wait = self.backoff.delay(failures);
            tracing::warn!(
                error = %format!("{e:#}"),
                attempt = failures + 1,
                "activation failed, retrying in {:.1} minutes",
                wait.as_secs_f64() / 60.0
            );
            tokio::time::sleep(wait).await;
            failures = failures.saturating_add(1);
        }

        let activated = self
            .load(Utc::now())?
            .ok_or_else(|| ActivationError::Missing(self.keys.location()))?;
        tracing::info!(host_uuid = %activated.info.host_uuid, "host activated");
        Ok(activated)
    }

    async fn request(&self, user: &UserKey, secret: &SealKey) -> Result<()> {
        let bearer = claims(user, &self.host, self.use_hardware_id, Utc::now())?.bearer(secret)?;
        let blob = self
            .issuer
            .request_activation_key(&user.uri, &bearer)
            .await?;
        self.keys.save_activation(&blob)?;
        Ok(())
    }
}
