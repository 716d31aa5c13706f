//! Infrastructure implementation of the `HostProbe` port.
//!
//! Facts are read from the usual Linux locations. Anything unreadable is left
//! empty rather than failing the probe, except the hostname and at least one
//! device identifier, without which the host cannot be activated.

use std::net::UdpSocket;
use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use sha2::{Digest, Sha256};

use crate::application::ports::HostProbe;
use crate::domain::HostInfo;

/// Reads host facts from a filesystem root (`/` in production).
#[derive(Debug, Clone)]
pub struct SystemProbe {
    root: PathBuf,
}

impl Default for SystemProbe {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/"),
        }
    }
}

impl SystemProbe {
    /// Probe under an alternative root (used in tests).
    #[must_use]
    pub fn with_root(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    fn read(&self, path: &str) -> Option<String> {
        std::fs::read_to_string(self.root.join(path))
            .ok()
            .map(|s| s.trim().to_owned())
            .filter(|s| !s.is_empty())
    }

    fn hostname(&self) -> Option<String> {
        self.read("proc/sys/kernel/hostname")
            .or_else(|| self.read("etc/hostname"))
    }

    fn os(&self) -> String {
        self.read("etc/os-release")
            .and_then(|text| {
                text.lines()
                    .find_map(|l| l.strip_prefix("PRETTY_NAME="))
                    .map(|v| v.trim_matches('"').to_owned())
            })
            .unwrap_or_else(|| std::env::consts::OS.to_owned())
    }

    fn total_memory(&self) -> u64 {
        self.read("proc/meminfo")
            .and_then(|text| {
                text.lines()
                    .find_map(|l| l.strip_prefix("MemTotal:"))
                    .and_then(|v| v.trim().trim_end_matches("kB").trim().parse::<u64>().ok())
            })
            .map_or(0, |kib| kib * 1024)
    }

    fn is_virtual(&self) -> bool {
        self.read("proc/cpuinfo").is_some_and(|text| {
            text.lines()
                .filter(|l| l.starts_with("flags"))
                .any(|l| l.split_whitespace().any(|f| f == "hypervisor"))
        })
    }

    /// MAC addresses of non-loopback interfaces, sorted by interface name.
    fn mac_addresses(&self) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(self.root.join("sys/class/net")) else {
            return Vec::new();
        };
        let mut found: Vec<(String, String)> = entries
            .filter_map(Result::ok)
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().into_owned();
                let mac = std::fs::read_to_string(entry.path().join("address")).ok()?;
                let mac = mac.trim().to_ascii_lowercase();
                (name != "lo" && !mac.is_empty() && mac != "00:00:00:00:00:00")
                    .then_some((name, mac))
            })
            .collect();
        found.sort();
        found.into_iter().map(|(_, mac)| mac).collect()
    }
}

/// Local address used for outbound traffic. No packet is sent.
fn outbound_ip() -> String {
    UdpSocket::bind("0.0.0.0:0")
        .and_then(|s| {
            s.connect("192.0.2.1:80")?;
            s.local_addr()
        })
        .map(|a| a.ip().to_string())
        .unwrap_or_default()
}

impl HostProbe for SystemProbe {
    fn probe(&self) -> Result<HostInfo> {
        let Some(hostname) = self.hostname() else {
            bail!("cannot determine hostname");
        };
        let machine_id = self
            .read("etc/machine-id")
            .or_else(|| self.read("var/lib/dbus/machine-id"))
            .unwrap_or_else(|| hex_digest(&hostname));
        let hardware_id = self
            .read("sys/class/dmi/id/product_uuid")
            .map(|s| s.to_ascii_lowercase())
            .unwrap_or_default();
        let mac_addresses = self.mac_addresses();
        if mac_addresses.is_empty() && hardware_id.is_empty() {
            bail!("no network interface or hardware id found to identify this host");
        }
        let primary_mac = mac_addresses.first().cloned().unwrap_or_default();
        Ok(HostInfo {
            hostname,
            machine_id,
            hardware_id,
            os: self.os(),
            platform: format!("{}/{}", std::env::consts::OS, std::env::consts::ARCH),
            is_virtual: self.is_virtual(),
            total_memory: self.total_memory(),
            cpus: std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get),
            host_ip: outbound_ip(),
            mac_addresses,
            primary_mac,
        })
    }
}

fn hex_digest(text: &str) -> String {
    Sha256::digest(text.as_bytes())
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}
