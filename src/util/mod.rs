//! Utility functions and helpers.
//!
//! Everything here talks to the host: interface enumeration, wireless
//! scans, routing table reads and child process plumbing. The probe and
//! tunnel implementations build on these.

use std::net::IpAddr;
use std::process::Output;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::process::Command;

use crate::error::{Error, Result};
use crate::types::InterfaceType;

mod gateway;
mod interface;
mod wireless;

pub use gateway::*;
pub use interface::*;
pub use wireless::*;

/// Network interface information (one entry per address).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInterface {
    pub name: String,
    pub index: u32,
    pub address: IpAddr,
    pub netmask: Option<IpAddr>,
    pub is_up: bool,
    pub is_running: bool,
    pub is_loopback: bool,
    pub interface_type: InterfaceType,
}

impl NetworkInterface {
    /// Whether the address is worth probing through (not loopback, not link-local).
    pub fn has_routable_address(&self) -> bool {
        match self.address {
            IpAddr::V4(v4) => !v4.is_loopback() && !v4.is_link_local() && !v4.is_unspecified(),
            IpAddr::V6(v6) => {
                !v6.is_loopback() && !v6.is_unspecified() && (v6.segments()[0] & 0xffc0) != 0xfe80
            }
        }
    }
}

/// Guess interface type from name.
pub fn guess_interface_type(name: &str) -> InterfaceType {
    let name = name.to_lowercase();

    if name.starts_with("lo") {
        InterfaceType::Loopback
    } else if name.starts_with("eth") || name.starts_with("enp") || name.starts_with("eno") {
        InterfaceType::Ethernet
    } else if name.starts_with("wl") || name.starts_with("en") {
        // macOS en0 is Wi-Fi on most laptops
        InterfaceType::Wifi
    } else if ["wwan", "rmnet", "pdp", "cell"]
        .iter()
        .any(|p| name.starts_with(p))
    {
        InterfaceType::Cellular
    } else if ["tun", "tap", "utun", "wg", "veth", "vnet"]
        .iter()
        .any(|p| name.starts_with(p))
    {
        InterfaceType::Tunnel
    } else if ["br", "bond", "team", "docker", "virbr"]
        .iter()
        .any(|p| name.starts_with(p))
    {
        InterfaceType::Ethernet
    } else {
        InterfaceType::Unknown
    }
}

/// Format duration as human-readable.
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let ms = duration.subsec_millis();

    if secs >= 3600 {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    } else if secs >= 60 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else if secs > 0 {
        format!("{secs}.{ms:03}s")
    } else {
        format!("{ms}ms")
    }
}

/// Run an external program and capture its output.
///
/// A non-zero exit status is not an error here; callers decide what a
/// failing exit means. Spawn failures and the timeout are errors.
pub async fn run_command(program: &str, args: &[&str], timeout: Duration) -> Result<Output> {
    tracing::trace!(program, ?args, "Running command");

    let child = Command::new(program)
        .args(args)
        .kill_on_drop(true)
        .output();

    match tokio::time::timeout(timeout, child).await {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(e)) => Err(Error::Io(std::io::Error::new(
            e.kind(),
            format!("failed to run {program}: {e}"),
        ))),
        Err(_) => Err(Error::Other(anyhow::anyhow!(
            "{program} timed out after {}",
            format_duration(timeout)
        ))),
    }
}

/// Check if running with elevated privileges.
#[cfg(unix)]
pub fn is_root() -> bool {
    unsafe { libc::geteuid() == 0 }
}

#[cfg(not(unix))]
pub fn is_root() -> bool {
    false
}

/// Get interface index by name.
#[cfg(unix)]
pub fn if_nametoindex(name: &str) -> Option<u32> {
    use std::ffi::CString;
    let cname = CString::new(name).ok()?;
    let idx = unsafe { libc::if_nametoindex(cname.as_ptr()) };
    if idx == 0 {
        None
    } else {
        Some(idx)
    }
}

#[cfg(not(unix))]
pub fn if_nametoindex(_name: &str) -> Option<u32> {
    None
}
