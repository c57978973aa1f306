//! Machine fingerprint and local address discovery.

use std::net::{IpAddr, UdpSocket};

use sha2::{Digest, Sha256};

/// Host facts that go into the hardware id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostFacts {
    /// Hardware addresses, upper-case hex without separators.
    pub macs: Vec<String>,
    pub os_name: String,
    pub os_arch: String,
    pub user: String,
}

impl HostFacts {
    pub fn collect() -> Self {
        Self {
            macs: mac_addresses(),
            os_name: std::env::consts::OS.to_string(),
            os_arch: std::env::consts::ARCH.to_string(),
            user: std::env::var("USER")
                .or_else(|_| std::env::var("USERNAME"))
                .unwrap_or_default(),
        }
    }

    /// Lower-case hex SHA-256 of the concatenated facts.
    pub fn hardware_id(&self) -> String {
        let mut hasher = Sha256::new();
        for mac in &self.macs {
            hasher.update(mac.as_bytes());
        }
        hasher.update(self.os_name.as_bytes());
        hasher.update(self.os_arch.as_bytes());
        hasher.update(self.user.as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Hardware id of this machine.
pub fn hardware_id() -> String {
    HostFacts::collect().hardware_id()
}

#[cfg(target_os = "linux")]
fn mac_addresses() -> Vec<String> {
    let Ok(entries) = std::fs::read_dir("/sys/class/net") else {
        return Vec::new();
    };
    let mut macs: Vec<String> = entries
        .filter_map(|e| e.ok())
        .filter_map(|e| std::fs::read_to_string(e.path().join("address")).ok())
        .map(|s| s.trim().replace(':', "").to_ascii_uppercase())
        .filter(|m| !m.is_empty() && m.chars().any(|c| c != '0'))
        .collect();
    macs.sort();
    macs
}

#[cfg(not(target_os = "linux"))]
fn mac_addresses() -> Vec<String> {
    Vec::new()
}

/// Address of the interface that would carry outbound traffic. No packet
/// is sent: connecting a UDP socket only selects a route.
pub fn local_ip() -> String {
    UdpSocket::bind("0.0.0.0:0")
        .and_then(|s| {
            s.connect("192.0.2.1:80")?;
            s.local_addr()
        })
        .map(|a| a.ip())
        .ok()
        .filter(|ip| !ip.is_unspecified())
        .unwrap_or(IpAddr::from([127, 0, 0, 1]))
        .to_string()
}
