//! Wireless network scanning.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A visible wireless network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WirelessNetwork {
    pub ssid: String,
    /// Signal strength (0-100).
    pub signal: Option<u8>,
    /// Wireless device that sees the network.
    pub device: Option<String>,
    /// Whether the device is currently associated with this network.
    pub active: bool,
}

/// Scan for wireless networks.
#[cfg(target_os = "linux")]
pub async fn scan_wireless_networks(timeout: Duration) -> Result<Vec<WirelessNetwork>> {
    let output = super::run_command(
        "nmcli",
        &["-t", "-f", "ACTIVE,SSID,SIGNAL,DEVICE", "device", "wifi", "list"],
        timeout,
    )
    .await?;

    if !output.status.success() {
        return Err(Error::DiscoveryFailure(format!(
            "nmcli exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    Ok(parse_nmcli_wifi(&String::from_utf8_lossy(&output.stdout)))
}

#[cfg(not(target_os = "linux"))]
pub async fn scan_wireless_networks(_timeout: Duration) -> Result<Vec<WirelessNetwork>> {
    Err(Error::DiscoveryFailure(
        "wireless scanning is not supported on this platform".into(),
    ))
}

/// Parse `nmcli -t -f ACTIVE,SSID,SIGNAL,DEVICE device wifi list` output.
pub fn parse_nmcli_wifi(output: &str) -> Vec<WirelessNetwork> {
    output
        .lines()
        .filter_map(|line| {
            let fields = split_terse(line);
            if fields.len() < 4 {
                return None;
            }
            let ssid = fields[1].trim().to_string();
            Some(WirelessNetwork {
                ssid,
                active: fields[0] == "yes",
                signal: fields[2].trim().parse().ok(),
                device: Some(fields[3].trim().to_string()).filter(|d| !d.is_empty()),
            })
        })
        .collect()
}

/// Keep one entry per non-empty SSID: the associated one, else the strongest.
///
/// Several access points commonly broadcast the same SSID; folding them
/// keeps `wifi:<ssid>` identifiers unique.
pub fn dedupe_networks(networks: Vec<WirelessNetwork>) -> Vec<WirelessNetwork> {
    let mut by_ssid: BTreeMap<String, WirelessNetwork> = BTreeMap::new();

    for network in networks {
        if network.ssid.is_empty() {
            continue;
        }
        let replace = match by_ssid.get(&network.ssid) {
            None => true,
            Some(existing) => {
                (network.active && !existing.active)
                    || (network.active == existing.active && network.signal > existing.signal)
            }
        };
        if replace {
            by_ssid.insert(network.ssid.clone(), network);
        }
    }

    by_ssid.into_values().collect()
}

/// Split an nmcli terse line on unescaped colons.
fn split_terse(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(escaped) = chars.next() {
                    current.push(escaped);
                }
            }
            ':' => fields.push(std::mem::take(&mut current)),
            other => current.push(other),
        }
    }
    fields.push(current);
    fields
}
