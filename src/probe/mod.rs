//! Metrics probe port.
//!
//! The engine never measures anything itself. Every latency, throughput
//! and enumeration request goes through [`ProbePort`], implemented by
//! [`SystemProbe`] in production and [`MockProbe`] in tests.

mod mock;
mod system;

pub use mock::{MockProbe, MockTarget};
pub use system::{parse_ping_output, SystemProbe};

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::metrics::MetricsSample;
use crate::types::Route;
use crate::util::{GatewayRoute, NetworkInterface, WirelessNetwork};

/// Measurement and enumeration primitives consumed by the engine.
#[async_trait]
pub trait ProbePort: Send + Sync {
    /// Round-trip latency to `target` in ms; `None` when it did not answer.
    async fn probe_latency(&self, target: IpAddr) -> Result<Option<f64>>;

    /// Estimated throughput of `interface` in Mbps.
    async fn probe_throughput(&self, interface: &str) -> Result<f64>;

    /// Latency stability towards `target` (0.0 - 1.0).
    async fn probe_stability(&self, target: IpAddr) -> Result<f64>;

    /// Packet loss towards `target` (0.0 - 1.0).
    async fn probe_packet_loss(&self, target: IpAddr) -> Result<f64>;

    /// Jitter towards `target` in ms.
    async fn probe_jitter(&self, target: IpAddr) -> Result<f64>;

    /// Enumerate network interfaces (one entry per address).
    async fn list_interfaces(&self) -> Result<Vec<NetworkInterface>>;

    /// Enumerate visible wireless networks.
    async fn list_wireless_networks(&self) -> Result<Vec<WirelessNetwork>>;

    /// Enumerate configured default-gateway routes.
    async fn list_default_routes(&self) -> Result<Vec<GatewayRoute>>;
}

/// Probe configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Echo requests per latency burst.
    #[serde(default = "default_ping_count")]
    pub ping_count: u32,

    /// Delay between echo requests.
    #[serde(default = "default_ping_interval", with = "humantime_serde")]
    pub ping_interval: Duration,

    /// How long to wait for each reply.
    #[serde(default = "default_ping_timeout", with = "humantime_serde")]
    pub ping_timeout: Duration,

    /// How long one latency burst is reused across the stability, loss
    /// and jitter probes of the same target.
    #[serde(default = "default_series_reuse", with = "humantime_serde")]
    pub series_reuse: Duration,

    /// Interface counter sampling window for throughput.
    #[serde(default = "default_throughput_window", with = "humantime_serde")]
    pub throughput_window: Duration,

    /// Timeout for enumeration commands (nmcli, ip, netstat).
    #[serde(default = "default_command_timeout", with = "humantime_serde")]
    pub command_timeout: Duration,
}

fn default_ping_count() -> u32 {
    4
}
fn default_ping_interval() -> Duration {
    Duration::from_millis(200)
}
fn default_ping_timeout() -> Duration {
    Duration::from_secs(1)
}
fn default_series_reuse() -> Duration {
    Duration::from_secs(2)
}
fn default_throughput_window() -> Duration {
    Duration::from_millis(500)
}
fn default_command_timeout() -> Duration {
    Duration::from_secs(5)
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            ping_count: default_ping_count(),
            ping_interval: default_ping_interval(),
            ping_timeout: default_ping_timeout(),
            series_reuse: default_series_reuse(),
            throughput_window: default_throughput_window(),
            command_timeout: default_command_timeout(),
        }
    }
}

/// Take one complete measurement of `route`.
///
/// Routes without a real endpoint (loopback placeholder) are refused so
/// that a merely visible network never outranks a working one.
pub async fn measure_route(port: &dyn ProbePort, route: &Route) -> Result<MetricsSample> {
    if !route.has_endpoint() {
        return Err(Error::probe(&route.id, "route has no probe endpoint"));
    }

    let target = route.endpoint_hint;
    let latency = port.probe_latency(target).await?;
    let throughput = match route.interface.as_deref() {
        Some(interface) => port.probe_throughput(interface).await?,
        None => 0.0,
    };
    let stability = port.probe_stability(target).await?;
    let packet_loss = port.probe_packet_loss(target).await?;
    let jitter = port.probe_jitter(target).await?;

    Ok(MetricsSample::measured(
        latency,
        throughput,
        stability,
        packet_loss,
        jitter,
    ))
}
