//! Host facts gathered at start and the identifiers derived from them.

use outpost_common::RegistrationRequest;

use crate::domain::error::ActivationError;

/// What the agent knows about the machine it runs on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostInfo {
    pub hostname: String,
    pub machine_id: String,
    /// Firmware/board UUID when readable, otherwise empty.
    pub hardware_id: String,
    pub os: String,
    pub platform: String,
    pub is_virtual: bool,
    /// Bytes.
    pub total_memory: u64,
    pub cpus: usize,
    pub host_ip: String,
    pub mac_addresses: Vec<String>,
    pub primary_mac: String,
}

impl HostInfo {
    /// Identifier presented during activation.
    ///
    /// # Errors
    ///
    /// Returns [`ActivationError::NoDeviceId`] when the identifier for the
    /// selected mode could not be read.
    pub fn device_id(&self, use_hardware_id: bool) -> Result<&str, ActivationError> {
        let (id, what) = if use_hardware_id {
            (self.hardware_id.trim(), "hardware id")
        } else {
            (self.primary_mac.trim(), "MAC address")
        };
        if id.is_empty() {
            return Err(ActivationError::NoDeviceId(what));
        }
        Ok(id)
    }

    /// Identifiers an activation key may be bound to on this host. Never
    /// contains an empty string.
    #[must_use]
    pub fn device_ids(&self, use_hardware_id: bool) -> Vec<String> {
        let ids: &[String] = if use_hardware_id {
            std::slice::from_ref(&self.hardware_id)
        } else {
            &self.mac_addresses
        };
        ids.iter()
            .map(|id| id.trim())
            .filter(|id| !id.is_empty())
            .map(str::to_owned)
            .collect()
    }

    #[must_use]
    pub fn registration(&self) -> RegistrationRequest {
        RegistrationRequest {
            hostname: self.hostname.clone(),
            machine_id: self.machine_id.clone(),
            os: self.os.clone(),
            platform: self.platform.clone(),
            is_virtual: self.is_virtual,
            total_memory: self.total_memory,
            cpus: self.cpus,
            host_ip: self.host_ip.clone(),
            mac_address: self.mac_addresses.clone(),
        }
    }
}
