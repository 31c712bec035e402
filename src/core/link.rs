//! Device-control capability
//!
//! Looks up a live link (hardware address and promiscuous flag) and switches
//! promiscuous mode on. The host implementation reads link attributes with
//! `getifaddrs(3)` and flips the flag through `ip link`.

use crate::core::error::LinkError;
use nix::net::if_::InterfaceFlags;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use tokio::process::Command;
use tracing::{debug, info};

/// 6-byte Ethernet hardware address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HardwareAddress([u8; 6]);

impl HardwareAddress {
    pub const fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    pub const fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl From<[u8; 6]> for HardwareAddress {
    fn from(octets: [u8; 6]) -> Self {
        Self(octets)
    }
}

// Lowercase, zero-padded: the form `ebtables --Lmac2` prints.
impl fmt::Display for HardwareAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

impl FromStr for HardwareAddress {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut octets = [0u8; 6];
        let mut parts = s.split([':', '-']);

        for octet in &mut octets {
            let part = parts
                .next()
                .ok_or_else(|| format!("Hardware address {s:?} has fewer than 6 octets"))?;
            if part.is_empty() || part.len() > 2 {
                return Err(format!("Invalid octet {part:?} in hardware address {s:?}"));
            }
            *octet = u8::from_str_radix(part, 16)
                .map_err(|_| format!("Invalid octet {part:?} in hardware address {s:?}"))?;
        }

        if parts.next().is_some() {
            return Err(format!("Hardware address {s:?} has more than 6 octets"));
        }

        Ok(Self(octets))
    }
}

/// Snapshot of a live link's attributes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub name: String,
    pub hardware_addr: HardwareAddress,
    pub promiscuous: bool,
}

/// Query and mutate link state
#[allow(async_fn_in_trait)]
pub trait LinkControl {
    /// Looks up a link by name.
    async fn link_by_name(&self, name: &str) -> Result<Link, LinkError>;

    /// Turns promiscuous mode on for the named link.
    async fn set_promisc_on(&self, name: &str) -> Result<(), LinkError>;
}

impl<T: LinkControl> LinkControl for &T {
    async fn link_by_name(&self, name: &str) -> Result<Link, LinkError> {
        (**self).link_by_name(name).await
    }

    async fn set_promisc_on(&self, name: &str) -> Result<(), LinkError> {
        (**self).set_promisc_on(name).await
    }
}

/// Link control backed by the host's interfaces
#[derive(Debug, Clone)]
pub struct HostLinks {
    ip_program: PathBuf,
}

impl Default for HostLinks {
    fn default() -> Self {
        Self::new()
    }
}

impl HostLinks {
    pub fn new() -> Self {
        Self::with_ip_program("ip")
    }

    /// Uses a specific `ip` binary (iproute2) for link mutation.
    pub fn with_ip_program(program: impl Into<PathBuf>) -> Self {
        Self {
            ip_program: program.into(),
        }
    }
}

impl LinkControl for HostLinks {
    async fn link_by_name(&self, name: &str) -> Result<Link, LinkError> {
        let mut flags = None;
        let mut hardware_addr = None;

        // One entry per address family; the AF_PACKET entry carries the MAC.
        for ifaddr in nix::ifaddrs::getifaddrs()?.filter(|a| a.interface_name == name) {
            flags = Some(ifaddr.flags);
            if let Some(mac) = ifaddr
                .address
                .as_ref()
                .and_then(|addr| addr.as_link_addr())
                .and_then(nix::sys::socket::LinkAddr::addr)
            {
                hardware_addr = Some(HardwareAddress::new(mac));
            }
        }

        let flags = flags.ok_or(LinkError::NotFound)?;
        let hardware_addr = hardware_addr.ok_or(LinkError::NoHardwareAddress)?;

        debug!(device = name, mac = %hardware_addr, ?flags, "Resolved link");

        Ok(Link {
            name: name.to_string(),
            hardware_addr,
            promiscuous: flags.contains(InterfaceFlags::IFF_PROMISC),
        })
    }

    async fn set_promisc_on(&self, name: &str) -> Result<(), LinkError> {
        let program = self.ip_program.display().to_string();
        info!(device = name, "Enabling promiscuous mode");

        let output = Command::new(&self.ip_program)
            .args(["link", "set", "dev", name, "promisc", "on"])
            .stdin(std::process::Stdio::null())
            .output()
            .await
            .map_err(|source| LinkError::Spawn {
                program: program.clone(),
                source,
            })?;

        if output.status.success() {
            Ok(())
        } else {
            Err(LinkError::Command {
                program,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
                exit_code: output.status.code(),
            })
        }
    }
}
