//! Address Resolver
//!
//! Finds the first usable IPv4 network bound to a device, skipping loopback and
//! non-IPv4 entries. Order among several IPv4 addresses follows the host's
//! enumeration order and is not guaranteed to be stable.

use crate::core::error::ResolveError;
use ipnetwork::{IpNetwork, Ipv4Network};
use network_interface::{Addr, NetworkInterface, NetworkInterfaceConfig};
use std::net::IpAddr;
use tracing::debug;

/// Lists the addresses bound to a device
pub trait AddressSource {
    /// Returns every address (with its prefix) in enumeration order.
    ///
    /// # Errors
    ///
    /// - [`ResolveError::InterfaceNotFound`] if the device does not exist
    /// - [`ResolveError::AddressEnumerationFailed`] if the list cannot be read
    fn addresses(&self, device: &str) -> Result<Vec<IpNetwork>, ResolveError>;
}

impl<T: AddressSource> AddressSource for &T {
    fn addresses(&self, device: &str) -> Result<Vec<IpNetwork>, ResolveError> {
        (**self).addresses(device)
    }
}

/// Address source backed by the host's interface table
#[derive(Debug, Clone, Copy, Default)]
pub struct HostAddresses;

impl AddressSource for HostAddresses {
    fn addresses(&self, device: &str) -> Result<Vec<IpNetwork>, ResolveError> {
        let interfaces =
            NetworkInterface::show().map_err(|e| ResolveError::AddressEnumerationFailed {
                device: device.to_string(),
                reason: e.to_string(),
            })?;

        let mut found = false;
        let mut networks = Vec::new();

        for interface in interfaces.into_iter().filter(|i| i.name == device) {
            found = true;
            networks.extend(interface.addr.into_iter().filter_map(to_network));
        }

        if !found {
            return Err(ResolveError::InterfaceNotFound(device.to_string()));
        }

        Ok(networks)
    }
}

fn to_network(addr: Addr) -> Option<IpNetwork> {
    let (ip, netmask): (IpAddr, Option<IpAddr>) = match addr {
        Addr::V4(v4) => (v4.ip.into(), v4.netmask.map(IpAddr::from)),
        Addr::V6(v6) => (v6.ip.into(), v6.netmask.map(IpAddr::from)),
    };

    let network = match netmask {
        Some(mask) => IpNetwork::with_netmask(ip, mask),
        None => IpNetwork::new(ip, if ip.is_ipv4() { 32 } else { 128 }),
    };

    network
        .inspect_err(|e| debug!("Skipping address {ip}: {e}"))
        .ok()
}

/// Resolves the device's IPv4 network through `source`.
///
/// # Errors
///
/// Propagates the source's errors, and returns
/// [`ResolveError::NoAddressFound`] when no IPv4, non-loopback address exists.
pub fn resolve(source: &impl AddressSource, device: &str) -> Result<Ipv4Network, ResolveError> {
    let addresses = source.addresses(device)?;
    select_ipv4_network(device, &addresses)
}

/// Picks the first IPv4, non-loopback entry.
///
/// # Errors
///
/// Returns [`ResolveError::NoAddressFound`] if there is none.
pub fn select_ipv4_network(
    device: &str,
    addresses: &[IpNetwork],
) -> Result<Ipv4Network, ResolveError> {
    addresses
        .iter()
        .find_map(|addr| match addr {
            IpNetwork::V4(net) if !net.ip().is_loopback() => Some(*net),
            _ => None,
        })
        .ok_or_else(|| ResolveError::NoAddressFound(device.to_string()))
}
