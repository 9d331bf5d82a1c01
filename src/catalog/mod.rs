//! Route catalog builder.
//!
//! Merges three independent sources into one list of candidate routes:
//! usable network interfaces, visible wireless networks and configured
//! default-gateway routes. Discovery is best effort. A failing source is
//! logged and skipped, and the build itself never fails.
//!
//! The same physical path may show up twice (as an interface and as a
//! gateway route). Both entries are kept and ranked on their own.

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::probe::ProbePort;
use crate::types::{Route, RouteId, RouteKind};
use crate::util::{
    dedupe_networks, primary_address, usable_interfaces, GatewayRoute, NetworkInterface,
    WirelessNetwork,
};

/// Which candidates discovery should leave out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryFilter {
    /// Interface name prefixes to skip (containers, bridges, the tunnel).
    pub ignore_prefixes: Vec<String>,
    /// Whether to scan for wireless networks at all.
    pub scan_wifi: bool,
}

impl Default for DiscoveryFilter {
    fn default() -> Self {
        Self {
            ignore_prefixes: default_ignore_prefixes(),
            scan_wifi: true,
        }
    }
}

/// Virtual interfaces that never lead anywhere new.
pub fn default_ignore_prefixes() -> Vec<String> {
    ["docker", "veth", "virbr", "br-"]
        .into_iter()
        .map(String::from)
        .collect()
}

impl DiscoveryFilter {
    /// Add one more ignored prefix.
    pub fn ignoring(mut self, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        if !prefix.is_empty() && !self.ignore_prefixes.contains(&prefix) {
            self.ignore_prefixes.push(prefix);
        }
        self
    }

    /// Check if an interface should be ignored.
    pub fn is_ignored(&self, name: &str) -> bool {
        self.ignore_prefixes.iter().any(|p| name.starts_with(p.as_str()))
    }
}

/// Build a fresh catalog. Every route comes back unmeasured.
pub async fn discover_routes(port: &dyn ProbePort, filter: &DiscoveryFilter) -> Vec<Route> {
    let wifi = async {
        if filter.scan_wifi {
            Some(port.list_wireless_networks().await)
        } else {
            None
        }
    };
    let (interfaces, wireless, gateways) =
        tokio::join!(port.list_interfaces(), wifi, port.list_default_routes());

    let mut attempted = 2;
    let mut failed = 0;

    let interfaces = source("interfaces", interfaces, &mut failed);
    let gateways = source("default routes", gateways, &mut failed);
    let wireless = wireless.map(|result| {
        attempted += 1;
        source("wireless networks", result, &mut failed)
    });

    if failed == attempted {
        error!("Every route source failed, catalog is empty");
        return Vec::new();
    }

    let raw_interfaces = interfaces.unwrap_or_default();
    let gateways: Vec<GatewayRoute> = gateways
        .unwrap_or_default()
        .into_iter()
        .filter(|g| !g.device.as_deref().is_some_and(|d| filter.is_ignored(d)))
        .collect();

    let mut routes = interface_routes(&raw_interfaces, &gateways, filter);
    if let Some(Some(networks)) = wireless {
        routes.extend(wifi_routes(networks, &raw_interfaces, &gateways, filter));
    }
    routes.extend(gateway_routes(&gateways));

    let mut seen = HashSet::new();
    routes.retain(|route| {
        let fresh = seen.insert(route.id.clone());
        if !fresh {
            debug!(route = %route.id, "Dropping duplicate route id");
        }
        fresh
    });

    info!(count = routes.len(), "Route catalog built");
    routes
}

fn source<T>(label: &str, result: Result<Vec<T>>, failed: &mut usize) -> Option<Vec<T>> {
    match result {
        Ok(items) => {
            debug!(source = label, count = items.len(), "Route source listed");
            Some(items)
        }
        Err(e) => {
            warn!(source = label, error = %e, "Route source failed, skipping");
            *failed += 1;
            None
        }
    }
}

fn interface_routes(
    raw: &[NetworkInterface],
    gateways: &[GatewayRoute],
    filter: &DiscoveryFilter,
) -> Vec<Route> {
    let usable: Vec<NetworkInterface> = raw
        .iter()
        .filter(|i| !filter.is_ignored(&i.name))
        .cloned()
        .collect();

    usable_interfaces(usable)
        .into_iter()
        .map(|iface| {
            let hint = gateway_for(gateways, &iface.name, iface.address).unwrap_or(iface.address);
            Route::new(
                RouteId::interface(&iface.name),
                format!("{} ({})", iface.name, iface.interface_type),
                RouteKind::PhysicalInterface,
                hint,
                Some(iface.name.clone()),
            )
        })
        .collect()
}

/// Best gateway reachable through `device`, same address family first.
fn gateway_for(gateways: &[GatewayRoute], device: &str, address: IpAddr) -> Option<IpAddr> {
    gateways
        .iter()
        .filter(|g| g.device.as_deref() == Some(device))
        .min_by_key(|g| {
            (
                g.gateway.is_ipv4() != address.is_ipv4(),
                g.metric.unwrap_or(u32::MAX),
            )
        })
        .map(|g| g.gateway)
}

fn wifi_routes(
    networks: Vec<WirelessNetwork>,
    raw: &[NetworkInterface],
    gateways: &[GatewayRoute],
    filter: &DiscoveryFilter,
) -> Vec<Route> {
    dedupe_networks(networks)
        .into_iter()
        .filter(|n| !n.device.as_deref().is_some_and(|d| filter.is_ignored(d)))
        .map(|network| {
            // Only the associated network is reachable through the device.
            let device = network.device.filter(|_| network.active);
            let hint = device
                .as_deref()
                .and_then(|d| {
                    let address = primary_address(raw, d)?;
                    Some(gateway_for(gateways, d, address).unwrap_or(address))
                })
                .unwrap_or_else(Route::loopback_hint);

            Route::new(
                RouteId::wifi(&network.ssid),
                network.ssid,
                RouteKind::Wifi,
                hint,
                device,
            )
        })
        .collect()
}

fn gateway_routes(gateways: &[GatewayRoute]) -> Vec<Route> {
    let mut pair_count: HashMap<(&str, IpAddr), usize> = HashMap::new();
    for g in gateways {
        *pair_count.entry((g.destination.as_str(), g.gateway)).or_default() += 1;
    }

    gateways
        .iter()
        .map(|g| {
            let base = RouteId::gateway(&g.destination, g.gateway);
            let shared = pair_count[&(g.destination.as_str(), g.gateway)] > 1;
            let id = match (&g.device, shared) {
                (Some(device), true) => RouteId::new(format!("{base}%{device}")),
                _ => base,
            };
            let name = match &g.device {
                Some(device) => format!("{} via {} dev {device}", g.destination, g.gateway),
                None => format!("{} via {}", g.destination, g.gateway),
            };

            Route::new(id, name, RouteKind::GatewayRoute, g.gateway, g.device.clone())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::MockProbe;
    use crate::util::guess_interface_type;

    fn iface(name: &str, addr: &str) -> NetworkInterface {
        NetworkInterface {
            name: name.into(),
            index: 0,
            address: addr.parse().unwrap(),
            netmask: None,
            is_up: true,
            is_running: true,
            is_loopback: name == "lo",
            interface_type: guess_interface_type(name),
        }
    }

    fn gw(gateway: &str, device: &str, metric: u32) -> GatewayRoute {
        GatewayRoute {
            destination: "default".into(),
            gateway: gateway.parse().unwrap(),
            device: Some(device.into()),
            metric: Some(metric),
        }
    }

    fn wifi(ssid: &str, active: bool, signal: u8) -> WirelessNetwork {
        WirelessNetwork {
            ssid: ssid.into(),
            signal: Some(signal),
            device: Some("wlan0".into()),
            active,
        }
    }

    fn scripted() -> MockProbe {
        let probe = MockProbe::new();
        probe.set_interfaces(vec![
            iface("lo", "127.0.0.1"),
            iface("eth0", "10.0.0.5"),
            iface("wlan0", "192.168.1.40"),
            iface("docker0", "172.17.0.1"),
            iface("rs0", "10.66.0.2"),
        ]);
        probe.set_wireless_networks(vec![
            wifi("HomeNet", true, 70),
            wifi("Cafe", false, 40),
            wifi("", false, 90),
        ]);
        probe.set_default_routes(vec![
            gw("10.0.0.1", "eth0", 100),
            gw("192.168.1.1", "wlan0", 600),
        ]);
        probe
    }

    fn ids(routes: &[Route]) -> Vec<&str> {
        routes.iter().map(|r| r.id.as_str()).collect()
    }

    #[tokio::test]
    async fn test_merges_all_sources() {
        let probe = scripted();
        let filter = DiscoveryFilter::default().ignoring("rs0");
        let routes = discover_routes(&probe, &filter).await;

        assert_eq!(
            ids(&routes),
            vec![
                "iface:eth0",
                "iface:wlan0",
                "wifi:Cafe",
                "wifi:HomeNet",
                "gw:default@10.0.0.1",
                "gw:default@192.168.1.1",
            ]
        );
        assert!(routes.iter().all(|r| r.metrics.is_none()));
    }

    #[tokio::test]
    async fn test_endpoint_hints() {
        let probe = scripted();
        let routes = discover_routes(&probe, &DiscoveryFilter::default()).await;
        let hint = |id: &str| routes.iter().find(|r| r.id.as_str() == id).unwrap().endpoint_hint;

        // Interfaces carrying a default route probe through their gateway.
        assert_eq!(hint("iface:eth0"), "10.0.0.1".parse::<IpAddr>().unwrap());
        assert_eq!(hint("iface:rs0"), "10.66.0.2".parse::<IpAddr>().unwrap());
        // Associated Wi-Fi probes through the device's gateway; merely visible gets loopback.
        assert_eq!(hint("wifi:HomeNet"), "192.168.1.1".parse::<IpAddr>().unwrap());
        assert_eq!(hint("wifi:HomeNet"), hint("iface:wlan0"));
        assert!(hint("wifi:Cafe").is_loopback());
    }

    #[tokio::test]
    async fn test_wifi_without_default_route_uses_device_address() {
        let probe = scripted();
        probe.set_default_routes(vec![gw("10.0.0.1", "eth0", 100)]);
        let routes = discover_routes(&probe, &DiscoveryFilter::default()).await;
        let wifi = routes.iter().find(|r| r.id.as_str() == "wifi:HomeNet").unwrap();

        assert_eq!(wifi.endpoint_hint, "192.168.1.40".parse::<IpAddr>().unwrap());
        assert_eq!(wifi.interface.as_deref(), Some("wlan0"));
    }

    #[tokio::test]
    async fn test_ignored_interfaces_are_skipped() {
        let probe = scripted();
        let filter = DiscoveryFilter::default().ignoring("wlan");
        let routes = discover_routes(&probe, &filter).await;

        assert!(!ids(&routes).contains(&"iface:docker0"));
        assert!(!ids(&routes).contains(&"iface:wlan0"));
        assert!(!ids(&routes).contains(&"gw:default@192.168.1.1"));
        assert!(!routes.iter().any(|r| r.kind == RouteKind::Wifi));
    }

    #[tokio::test]
    async fn test_one_failed_source_does_not_hide_others() {
        let probe = scripted();
        probe.fail_wireless_networks("nmcli not installed");
        let routes = discover_routes(&probe, &DiscoveryFilter::default()).await;

        assert!(ids(&routes).contains(&"iface:eth0"));
        assert!(ids(&routes).contains(&"gw:default@10.0.0.1"));
        assert!(!routes.iter().any(|r| r.kind == RouteKind::Wifi));
    }

    #[tokio::test]
    async fn test_total_failure_yields_empty_catalog() {
        let probe = MockProbe::new();
        probe.fail_interfaces("getifaddrs failed");
        probe.fail_wireless_networks("nmcli missing");
        probe.fail_default_routes("ip missing");

        assert!(discover_routes(&probe, &DiscoveryFilter::default()).await.is_empty());
    }

    #[tokio::test]
    async fn test_wifi_scan_can_be_disabled() {
        let probe = scripted();
        let filter = DiscoveryFilter {
            scan_wifi: false,
            ..DiscoveryFilter::default()
        };
        let routes = discover_routes(&probe, &filter).await;
        assert!(!routes.iter().any(|r| r.kind == RouteKind::Wifi));
        // enumerations: interfaces + default routes only
        assert_eq!(probe.listing_calls(), 2);
    }

    #[tokio::test]
    async fn test_gateway_collisions_get_device_suffix() {
        let probe = MockProbe::new();
        probe.set_default_routes(vec![
            gw("10.0.0.1", "eth0", 100),
            gw("10.0.0.1", "eth1", 200),
            gw("10.0.0.1", "eth1", 300),
        ]);
        let routes = discover_routes(&probe, &DiscoveryFilter::default()).await;

        assert_eq!(
            ids(&routes),
            vec!["gw:default@10.0.0.1%eth0", "gw:default@10.0.0.1%eth1"]
        );
        let unique: HashSet<_> = routes.iter().map(|r| &r.id).collect();
        assert_eq!(unique.len(), routes.len());
    }
}
