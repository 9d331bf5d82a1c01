//! Core types used throughout routescout.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::metrics::{score, MetricsSample};

/// Stable identifier of a candidate route.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RouteId(pub String);

impl RouteId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Identifier of a route over a network interface.
    pub fn interface(name: &str) -> Self {
        Self(format!("iface:{name}"))
    }

    /// Identifier of a route over a wireless network.
    pub fn wifi(ssid: &str) -> Self {
        Self(format!("wifi:{ssid}"))
    }

    /// Identifier of a gateway route.
    pub fn gateway(destination: &str, gateway: IpAddr) -> Self {
        Self(format!("gw:{destination}@{gateway}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RouteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for RouteId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for RouteId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Where a candidate route was discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RouteKind {
    /// An up, non-loopback network interface.
    PhysicalInterface,
    /// A visible wireless network.
    Wifi,
    /// A configured default-gateway route.
    GatewayRoute,
}

impl fmt::Display for RouteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PhysicalInterface => write!(f, "interface"),
            Self::Wifi => write!(f, "wifi"),
            Self::GatewayRoute => write!(f, "gateway"),
        }
    }
}

/// Network interface type classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum InterfaceType {
    /// Wired Ethernet connection
    Ethernet,
    /// WiFi connection
    Wifi,
    /// Cellular data (4G/5G/LTE)
    Cellular,
    /// VPN or tunnel interface
    Tunnel,
    /// Loopback interface
    Loopback,
    /// Unknown interface type
    #[default]
    Unknown,
}

impl fmt::Display for InterfaceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ethernet => write!(f, "ethernet"),
            Self::Wifi => write!(f, "wifi"),
            Self::Cellular => write!(f, "cellular"),
            Self::Tunnel => write!(f, "tunnel"),
            Self::Loopback => write!(f, "loopback"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// A candidate network path.
///
/// Everything except `metrics` and `last_analyzed_at` is fixed at
/// discovery time; those two are only written by the analysis loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub id: RouteId,
    pub name: String,
    pub kind: RouteKind,
    /// Address to probe and to pin the tunnel through.
    pub endpoint_hint: IpAddr,
    /// Device the route rides on, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interface: Option<String>,
    #[serde(default)]
    pub metrics: Option<MetricsSample>,
    /// Time of the last successful measurement.
    #[serde(default)]
    pub last_analyzed_at: Option<SystemTime>,
}

impl Route {
    /// Create an unmeasured route.
    pub fn new(
        id: RouteId,
        name: impl Into<String>,
        kind: RouteKind,
        endpoint_hint: IpAddr,
        interface: Option<String>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            kind,
            endpoint_hint,
            interface,
            metrics: None,
            last_analyzed_at: None,
        }
    }

    /// Loopback placeholder used when no better endpoint is known.
    pub fn loopback_hint() -> IpAddr {
        IpAddr::V4(Ipv4Addr::LOCALHOST)
    }

    /// Whether the endpoint hint is only the loopback placeholder.
    pub fn has_endpoint(&self) -> bool {
        !self.endpoint_hint.is_loopback()
    }

    /// Current score; 0 when unmeasured or failed.
    pub fn score(&self) -> f64 {
        self.metrics.as_ref().map_or(0.0, score)
    }

    /// Attach a sample. Only valid samples move `last_analyzed_at`.
    pub fn record(&mut self, sample: MetricsSample) {
        if sample.is_valid() {
            self.last_analyzed_at = Some(sample.measured_at);
        }
        self.metrics = Some(sample);
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}, {})", self.name, self.kind, self.endpoint_hint)
    }
}

/// Tunnel connection state.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum ConnectionState {
    /// No tunnel.
    #[default]
    Disconnected,
    /// Tunnel provisioning in progress.
    Connecting,
    /// Tunnel up over `route`.
    Connected { route: Route },
    /// Tunnel teardown in progress.
    Disconnecting,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected { .. })
    }

    /// Whether a transition is underway.
    pub fn is_transitioning(&self) -> bool {
        matches!(self, Self::Connecting | Self::Disconnecting)
    }

    /// Route of the active tunnel.
    pub fn active_route(&self) -> Option<&Route> {
        match self {
            Self::Connected { route } => Some(route),
            _ => None,
        }
    }

    /// Short label.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected { .. } => "connected",
            Self::Disconnecting => "disconnecting",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connected { route } => write!(f, "connected via {}", route.id),
            other => write!(f, "{}", other.label()),
        }
    }
}

/// Snapshot handed to the presentation layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Status {
    pub connected: bool,
    pub state: String,
    pub active_route: Option<Route>,
    pub ranked_routes: Vec<Route>,
    pub analysis_running: bool,
}

impl Status {
    /// Build a snapshot from a connection state and the current ranking.
    pub fn new(state: &ConnectionState, ranked_routes: Vec<Route>, analysis_running: bool) -> Self {
        Self {
            connected: state.is_connected(),
            state: state.label().to_string(),
            active_route: state.active_route().cloned(),
            ranked_routes,
            analysis_running,
        }
    }
}
