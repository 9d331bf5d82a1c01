//! Default gateway discovery.

use std::net::IpAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A configured route through a gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayRoute {
    /// Destination network ("default" for the default route).
    pub destination: String,
    pub gateway: IpAddr,
    pub device: Option<String>,
    pub metric: Option<u32>,
}

/// Read the default routes from the system routing table.
#[cfg(target_os = "linux")]
pub async fn read_default_routes(timeout: Duration) -> Result<Vec<GatewayRoute>> {
    let mut routes = Vec::new();
    let mut last_error = None;

    for family in ["-4", "-6"] {
        match super::run_command("ip", &[family, "route", "show", "default"], timeout).await {
            Ok(output) if output.status.success() => {
                routes.extend(parse_ip_route(&String::from_utf8_lossy(&output.stdout)));
            }
            Ok(output) => {
                last_error = Some(Error::DiscoveryFailure(format!(
                    "ip {family} route exited with {}",
                    output.status
                )));
            }
            Err(e) => last_error = Some(e),
        }
    }

    match last_error {
        Some(e) if routes.is_empty() => Err(e),
        _ => Ok(routes),
    }
}

#[cfg(target_os = "macos")]
pub async fn read_default_routes(timeout: Duration) -> Result<Vec<GatewayRoute>> {
    let output = super::run_command("netstat", &["-rn"], timeout).await?;
    if !output.status.success() {
        return Err(Error::DiscoveryFailure(format!(
            "netstat exited with {}",
            output.status
        )));
    }
    Ok(parse_netstat_routes(&String::from_utf8_lossy(&output.stdout)))
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
pub async fn read_default_routes(_timeout: Duration) -> Result<Vec<GatewayRoute>> {
    Err(Error::DiscoveryFailure(
        "default route discovery is not supported on this platform".into(),
    ))
}

/// Parse `ip route show default` output.
///
/// ```text
/// default via 192.168.1.1 dev wlp2s0 proto dhcp src 192.168.1.40 metric 600
/// ```
pub fn parse_ip_route(output: &str) -> Vec<GatewayRoute> {
    output
        .lines()
        .filter_map(|line| {
            let parts: Vec<&str> = line.split_whitespace().collect();
            let destination = (*parts.first()?).to_string();

            let value_of = |key: &str| {
                parts
                    .iter()
                    .position(|p| *p == key)
                    .and_then(|i| parts.get(i + 1))
                    .copied()
            };

            let gateway = value_of("via")?.parse().ok()?;
            Some(GatewayRoute {
                destination,
                gateway,
                device: value_of("dev").map(str::to_string),
                metric: value_of("metric").and_then(|m| m.parse().ok()),
            })
        })
        .collect()
}

/// Parse the default entries of `netstat -rn` output.
///
/// ```text
/// Destination        Gateway            Flags           Netif Expire
/// default            192.168.1.1        UGScg             en0
/// ```
pub fn parse_netstat_routes(output: &str) -> Vec<GatewayRoute> {
    output
        .lines()
        .filter_map(|line| {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 4 || parts[0] != "default" {
                return None;
            }
            // Link-scoped IPv6 gateways look like fe80::1%en0.
            let gateway = parts[1].split('%').next()?.parse().ok()?;
            Some(GatewayRoute {
                destination: "default".to_string(),
                gateway,
                device: Some(parts[3].to_string()),
                metric: None,
            })
        })
        .collect()
}
