//! Scripted in-memory tunnel.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::TunnelProvisioner;
use crate::error::{Error, Result};
use crate::types::{Route, RouteId};

/// Tunnel double recording every call.
#[derive(Debug, Default)]
pub struct MockTunnel {
    provision_failure: RwLock<Option<String>>,
    teardown_failure: RwLock<Option<String>>,
    delay: RwLock<Duration>,
    teardown_delay: RwLock<Duration>,
    /// Route of the tunnel currently up.
    active: RwLock<Option<RouteId>>,
    provisioned: RwLock<Vec<RouteId>>,
    provision_calls: AtomicU64,
    teardown_calls: AtomicU64,
    teardown_all_calls: AtomicU64,
}

impl MockTunnel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next provisions fail with `reason` (`None` to heal).
    pub fn fail_provision(&self, reason: Option<&str>) {
        *self.provision_failure.write() = reason.map(str::to_string);
    }

    /// Make the next teardowns fail with `reason` (`None` to heal).
    pub fn fail_teardown(&self, reason: Option<&str>) {
        *self.teardown_failure.write() = reason.map(str::to_string);
    }

    /// Make provisioning take `delay` (tokio time).
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.write() = delay;
    }

    /// Make teardown take `delay` (tokio time).
    pub fn set_teardown_delay(&self, delay: Duration) {
        *self.teardown_delay.write() = delay;
    }

    pub fn active_route(&self) -> Option<RouteId> {
        self.active.read().clone()
    }

    /// Routes provisioned successfully, in order.
    pub fn provisioned(&self) -> Vec<RouteId> {
        self.provisioned.read().clone()
    }

    pub fn provision_calls(&self) -> u64 {
        self.provision_calls.load(Ordering::SeqCst)
    }

    pub fn teardown_calls(&self) -> u64 {
        self.teardown_calls.load(Ordering::SeqCst)
    }

    pub fn teardown_all_calls(&self) -> u64 {
        self.teardown_all_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TunnelProvisioner for MockTunnel {
    async fn provision(&self, route: &Route) -> Result<()> {
        self.provision_calls.fetch_add(1, Ordering::SeqCst);

        let delay = *self.delay.read();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if let Some(reason) = self.provision_failure.read().clone() {
            return Err(Error::ProvisioningFailure(reason));
        }

        *self.active.write() = Some(route.id.clone());
        self.provisioned.write().push(route.id.clone());
        Ok(())
    }

    async fn teardown(&self) -> Result<()> {
        self.teardown_calls.fetch_add(1, Ordering::SeqCst);

        let delay = *self.teardown_delay.read();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if let Some(reason) = self.teardown_failure.read().clone() {
            return Err(Error::TeardownFailure(reason));
        }
        *self.active.write() = None;
        Ok(())
    }

    async fn teardown_all(&self) -> Result<()> {
        self.teardown_all_calls.fetch_add(1, Ordering::SeqCst);
        *self.active.write() = None;
        Ok(())
    }
}
