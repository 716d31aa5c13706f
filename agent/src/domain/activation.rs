//! Activation key acceptance rules.

use chrono::{DateTime, Utc};
use outpost_common::{ActivationClaims, AkInfo, UserKey};

use crate::domain::error::ActivationError;
use crate::domain::host::HostInfo;

/// Check that a signature-verified activation key is still valid on this host.
///
/// # Errors
///
/// Returns [`ActivationError::Expired`] past the key's expiry and
/// [`ActivationError::ForeignHost`] when none of the host's device
/// identifiers match the binding. A host with no identifier for the selected
/// mode gets [`ActivationError::NoDeviceId`].
pub fn check_binding(
    info: &AkInfo,
    host: &HostInfo,
    use_hardware_id: bool,
    now: DateTime<Utc>,
) -> Result<(), ActivationError> {
    if info.is_expired(now) {
        return Err(ActivationError::Expired(info.expiry));
    }
    let ids = host.device_ids(use_hardware_id);
    if ids.is_empty() {
        host.device_id(use_hardware_id)?;
    }
    if !info.is_bound_to(&ids) {
        return Err(ActivationError::ForeignHost {
            bound: info.mac_address.clone(),
            found: ids.join(", "),
        });
    }
    Ok(())
}

/// Host identity presented in an activation request.
///
/// # Errors
///
/// Returns [`ActivationError::NoDeviceId`] when the host has nothing to bind
/// the key to.
pub fn claims(
    user: &UserKey,
    host: &HostInfo,
    use_hardware_id: bool,
    now: DateTime<Utc>,
) -> Result<ActivationClaims, ActivationError> {
    Ok(ActivationClaims {
        username: user.username.clone(),
        device_id: host.device_id(use_hardware_id)?.to_owned(),
        ip_address: host.host_ip.clone(),
        hostname: host.hostname.clone(),
        time: now,
    })
}
