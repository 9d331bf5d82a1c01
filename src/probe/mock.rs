//! Scripted in-memory probe.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::ProbePort;
use crate::error::{Error, Result};
use crate::util::{GatewayRoute, NetworkInterface, WirelessNetwork};

/// Scripted behaviour of one probe target.
#[derive(Debug, Clone, PartialEq)]
pub enum MockTarget {
    /// Answers with fixed readings.
    Reachable {
        latency_ms: f64,
        stability: f64,
        packet_loss: f64,
        jitter_ms: f64,
    },
    /// Never answers.
    Unreachable,
    /// Every probe raises an error.
    Fail(String),
}

impl MockTarget {
    /// Reachable target without loss or jitter.
    pub fn reachable(latency_ms: f64, stability: f64) -> Self {
        Self::Reachable {
            latency_ms,
            stability,
            packet_loss: 0.0,
            jitter_ms: 0.0,
        }
    }

    pub fn with_loss(mut self, loss: f64) -> Self {
        if let Self::Reachable { packet_loss, .. } = &mut self {
            *packet_loss = loss;
        }
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        if let Self::Reachable { jitter_ms, .. } = &mut self {
            *jitter_ms = jitter;
        }
        self
    }
}

type Listing<T> = std::result::Result<Vec<T>, String>;

/// Probe whose every answer is scripted by the test.
///
/// Unknown targets fail, unknown interfaces report 0 Mbps.
#[derive(Debug)]
pub struct MockProbe {
    targets: RwLock<HashMap<IpAddr, MockTarget>>,
    throughput: RwLock<HashMap<String, f64>>,
    interfaces: RwLock<Listing<NetworkInterface>>,
    wireless: RwLock<Listing<WirelessNetwork>>,
    default_routes: RwLock<Listing<GatewayRoute>>,
    delay: RwLock<Duration>,
    latency_calls: AtomicU64,
    listing_calls: AtomicU64,
}

impl MockProbe {
    pub fn new() -> Self {
        Self {
            targets: RwLock::new(HashMap::new()),
            throughput: RwLock::new(HashMap::new()),
            interfaces: RwLock::new(Ok(vec![])),
            wireless: RwLock::new(Ok(vec![])),
            default_routes: RwLock::new(Ok(vec![])),
            delay: RwLock::new(Duration::ZERO),
            latency_calls: AtomicU64::new(0),
            listing_calls: AtomicU64::new(0),
        }
    }

    /// Script the behaviour of `target`.
    pub fn set_target(&self, target: IpAddr, behaviour: MockTarget) {
        self.targets.write().insert(target, behaviour);
    }

    /// Script the throughput of `interface`.
    pub fn set_throughput(&self, interface: &str, mbps: f64) {
        self.throughput.write().insert(interface.to_string(), mbps);
    }

    pub fn set_interfaces(&self, interfaces: Vec<NetworkInterface>) {
        *self.interfaces.write() = Ok(interfaces);
    }

    pub fn set_wireless_networks(&self, networks: Vec<WirelessNetwork>) {
        *self.wireless.write() = Ok(networks);
    }

    pub fn set_default_routes(&self, routes: Vec<GatewayRoute>) {
        *self.default_routes.write() = Ok(routes);
    }

    pub fn fail_interfaces(&self, reason: &str) {
        *self.interfaces.write() = Err(reason.to_string());
    }

    pub fn fail_wireless_networks(&self, reason: &str) {
        *self.wireless.write() = Err(reason.to_string());
    }

    pub fn fail_default_routes(&self, reason: &str) {
        *self.default_routes.write() = Err(reason.to_string());
    }

    /// Make every latency probe take `delay` (tokio time).
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.write() = delay;
    }

    /// Number of latency probes issued so far.
    pub fn latency_calls(&self) -> u64 {
        self.latency_calls.load(Ordering::SeqCst)
    }

    /// Number of enumeration calls issued so far.
    pub fn listing_calls(&self) -> u64 {
        self.listing_calls.load(Ordering::SeqCst)
    }

    fn target(&self, target: IpAddr) -> Result<MockTarget> {
        match self.targets.read().get(&target) {
            Some(MockTarget::Fail(reason)) => Err(Error::probe(target, reason)),
            Some(behaviour) => Ok(behaviour.clone()),
            None => Err(Error::probe(target, "no route to host")),
        }
    }

    fn listing<T: Clone>(&self, listing: &RwLock<Listing<T>>) -> Result<Vec<T>> {
        self.listing_calls.fetch_add(1, Ordering::SeqCst);
        listing.read().clone().map_err(Error::DiscoveryFailure)
    }
}

impl Default for MockProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProbePort for MockProbe {
    async fn probe_latency(&self, target: IpAddr) -> Result<Option<f64>> {
        self.latency_calls.fetch_add(1, Ordering::SeqCst);

        let delay = *self.delay.read();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        Ok(match self.target(target)? {
            MockTarget::Reachable { latency_ms, .. } => Some(latency_ms),
            _ => None,
        })
    }

    async fn probe_throughput(&self, interface: &str) -> Result<f64> {
        Ok(self.throughput.read().get(interface).copied().unwrap_or(0.0))
    }

    async fn probe_stability(&self, target: IpAddr) -> Result<f64> {
        Ok(match self.target(target)? {
            MockTarget::Reachable { stability, .. } => stability,
            _ => 0.0,
        })
    }

    async fn probe_packet_loss(&self, target: IpAddr) -> Result<f64> {
        Ok(match self.target(target)? {
            MockTarget::Reachable { packet_loss, .. } => packet_loss,
            _ => 1.0,
        })
    }

    async fn probe_jitter(&self, target: IpAddr) -> Result<f64> {
        Ok(match self.target(target)? {
            MockTarget::Reachable { jitter_ms, .. } => jitter_ms,
            _ => 0.0,
        })
    }

    async fn list_interfaces(&self) -> Result<Vec<NetworkInterface>> {
        self.listing(&self.interfaces)
    }

    async fn list_wireless_networks(&self) -> Result<Vec<WirelessNetwork>> {
        self.listing(&self.wireless)
    }

    async fn list_default_routes(&self) -> Result<Vec<GatewayRoute>> {
        self.listing(&self.default_routes)
    }
}
