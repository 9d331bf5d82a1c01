//! Network interface discovery.

use std::collections::BTreeMap;
use std::net::IpAddr;

use super::{guess_interface_type, NetworkInterface};

/// Get all network interfaces with their addresses.
#[cfg(unix)]
pub fn get_network_interfaces() -> std::io::Result<Vec<NetworkInterface>> {
    get_interfaces_via_getifaddrs()
}

#[cfg(not(unix))]
pub fn get_network_interfaces() -> std::io::Result<Vec<NetworkInterface>> {
    Ok(vec![])
}

/// Collapse per-address entries into one entry per interface name.
///
/// Keeps only interfaces that are up, not loopback and carry a routable
/// address. IPv4 wins over IPv6. Output is sorted by name so the result is
/// deterministic regardless of enumeration order.
pub fn usable_interfaces(interfaces: Vec<NetworkInterface>) -> Vec<NetworkInterface> {
    let mut by_name: BTreeMap<String, NetworkInterface> = BTreeMap::new();

    for iface in interfaces {
        if !iface.is_up || iface.is_loopback || !iface.has_routable_address() {
            continue;
        }

        match by_name.get(&iface.name) {
            Some(existing) if existing.address.is_ipv4() || iface.address.is_ipv6() => {}
            _ => {
                by_name.insert(iface.name.clone(), iface);
            }
        }
    }

    by_name.into_values().collect()
}

/// Primary address of `name` within an enumeration, preferring IPv4.
pub fn primary_address(interfaces: &[NetworkInterface], name: &str) -> Option<IpAddr> {
    let mut candidates = interfaces
        .iter()
        .filter(|i| i.name == name && i.has_routable_address());

    let first = candidates.next()?;
    if first.address.is_ipv4() {
        return Some(first.address);
    }
    candidates
        .find(|i| i.address.is_ipv4())
        .map_or(Some(first.address), |i| Some(i.address))
}

#[cfg(unix)]
fn get_interfaces_via_getifaddrs() -> std::io::Result<Vec<NetworkInterface>> {
    use std::ffi::CStr;
    use std::net::{Ipv4Addr, Ipv6Addr};

    let mut interfaces = Vec::new();

    unsafe {
        let mut ifaddrs: *mut libc::ifaddrs = std::ptr::null_mut();
        if libc::getifaddrs(std::ptr::addr_of_mut!(ifaddrs)) != 0 {
            return Err(std::io::Error::last_os_error());
        }

        let mut current = ifaddrs;
        while !current.is_null() {
            let ifa = &*current;
            current = ifa.ifa_next;

            if ifa.ifa_name.is_null() || ifa.ifa_addr.is_null() {
                continue;
            }

            let name = CStr::from_ptr(ifa.ifa_name).to_string_lossy().into_owned();
            let family = i32::from((*ifa.ifa_addr).sa_family);

            #[allow(clippy::cast_ptr_alignment)]
            let (address, netmask) = match family {
                libc::AF_INET => {
                    let sin = ifa.ifa_addr.cast::<libc::sockaddr_in>();
                    let ip = Ipv4Addr::from(u32::from_be((*sin).sin_addr.s_addr));
                    let mask = (!ifa.ifa_netmask.is_null()).then(|| {
                        let m = ifa.ifa_netmask.cast::<libc::sockaddr_in>();
                        IpAddr::V4(Ipv4Addr::from(u32::from_be((*m).sin_addr.s_addr)))
                    });
                    (IpAddr::V4(ip), mask)
                }
                libc::AF_INET6 => {
                    let sin6 = ifa.ifa_addr.cast::<libc::sockaddr_in6>();
                    let ip = Ipv6Addr::from((*sin6).sin6_addr.s6_addr);
                    let mask = (!ifa.ifa_netmask.is_null()).then(|| {
                        let m = ifa.ifa_netmask.cast::<libc::sockaddr_in6>();
                        IpAddr::V6(Ipv6Addr::from((*m).sin6_addr.s6_addr))
                    });
                    (IpAddr::V6(ip), mask)
                }
                _ => continue,
            };

            let flags = ifa.ifa_flags as i32;
            interfaces.push(NetworkInterface {
                index: super::if_nametoindex(&name).unwrap_or(0),
                interface_type: guess_interface_type(&name),
                name,
                address,
                netmask,
                is_up: flags & libc::IFF_UP != 0,
                is_running: flags & libc::IFF_RUNNING != 0,
                is_loopback: flags & libc::IFF_LOOPBACK != 0,
            });
        }

        libc::freeifaddrs(ifaddrs);
    }

    Ok(interfaces)
}
