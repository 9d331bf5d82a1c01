//! Tunnel connection lifecycle.
//!
//! ```text
//! Disconnected --connect--> Connecting --ok--> Connected{route}
//!      ^                        |                    |
//!      +-------failure----------+                disconnect
//!      |                                             v
//!      +--------------- teardown done ------- Disconnecting
//! ```
//!
//! The state check and the move into a transitional state happen under
//! one write lock, so concurrent callers cannot both start a transition.

mod store;

pub use store::{ActiveRecord, ActiveRouteStore};

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::analysis::select_best;
use crate::error::{Error, Result};
use crate::tunnel::TunnelProvisioner;
use crate::types::{ConnectionState, Route};
use crate::util::format_duration;

/// Events published by the connection manager.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// The state machine moved.
    StateChanged { state: ConnectionState },
}

/// Owns the connection state and drives the tunnel provisioner.
pub struct ConnectionManager {
    tunnel: Arc<dyn TunnelProvisioner>,
    store: Option<ActiveRouteStore>,
    state: RwLock<ConnectionState>,
    /// Bound for one provision or teardown.
    timeout: Duration,
    event_tx: broadcast::Sender<ConnectionEvent>,
}

impl ConnectionManager {
    pub fn new(tunnel: Arc<dyn TunnelProvisioner>, timeout: Duration) -> Self {
        let (event_tx, _) = broadcast::channel(64);

        Self {
            tunnel,
            store: None,
            state: RwLock::new(ConnectionState::Disconnected),
            timeout,
            event_tx,
        }
    }

    /// Persist the active route to `store`.
    pub fn with_store(mut self, store: ActiveRouteStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Get current state.
    pub fn state(&self) -> ConnectionState {
        self.state.read().clone()
    }

    /// Subscribe to events.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.event_tx.subscribe()
    }

    /// Bring the tunnel up over `route`.
    pub async fn connect(&self, route: Route) -> Result<()> {
        {
            let mut state = self.state.write();
            Self::check_idle(&state)?;
            *state = ConnectionState::Connecting;
        }
        self.emit(ConnectionState::Connecting);
        info!(route = %route.id, endpoint = %route.endpoint_hint, "Connecting");

        let outcome = match tokio::time::timeout(self.timeout, self.tunnel.provision(&route)).await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e @ Error::ProvisioningFailure(_))) => Err(e),
            Ok(Err(e)) => Err(Error::ProvisioningFailure(e.to_string())),
            Err(_) => {
                // A half-configured tunnel may be left behind.
                match tokio::time::timeout(self.timeout, self.tunnel.teardown()).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!(error = %e, "Cleanup after provisioning timeout failed"),
                    Err(_) => warn!("Cleanup after provisioning timeout timed out"),
                }
                Err(Error::ProvisioningFailure(format!(
                    "provisioning timed out after {}",
                    format_duration(self.timeout)
                )))
            }
        };

        match outcome {
            Ok(()) => {
                if let Some(store) = &self.store {
                    if let Err(e) = store.save(&route) {
                        warn!(error = %e, "Failed to record active route");
                    }
                }
                info!(route = %route.id, "Connected");
                self.set_state(ConnectionState::Connected { route });
                Ok(())
            }
            Err(e) => {
                error!(route = %route.id, error = %e, "Provisioning failed");
                self.set_state(ConnectionState::Disconnected);
                Err(e)
            }
        }
    }

    /// Connect over the best of `ranked` (first entry).
    pub async fn connect_best(&self, ranked: &[Route]) -> Result<Route> {
        Self::check_idle(&self.state.read())?;
        let route = select_best(ranked)?;
        self.connect(route.clone()).await?;
        Ok(route)
    }

    /// Tear the tunnel down.
    ///
    /// Disconnected or already disconnecting is a no-op. A teardown failure
    /// still ends in `Disconnected` and is returned.
    pub async fn disconnect(&self) -> Result<()> {
        let route = {
            let mut state = self.state.write();
            match &*state {
                ConnectionState::Disconnected | ConnectionState::Disconnecting => return Ok(()),
                ConnectionState::Connecting => return Err(Error::AlreadyConnecting),
                ConnectionState::Connected { route } => {
                    let route = route.clone();
                    *state = ConnectionState::Disconnecting;
                    route
                }
            }
        };
        self.emit(ConnectionState::Disconnecting);
        info!(route = %route.id, "Disconnecting");

        let outcome = match tokio::time::timeout(self.timeout, self.tunnel.teardown()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e @ Error::TeardownFailure(_))) => Err(e),
            Ok(Err(e)) => Err(Error::TeardownFailure(e.to_string())),
            Err(_) => Err(Error::TeardownFailure(format!(
                "teardown timed out after {}",
                format_duration(self.timeout)
            ))),
        };

        if let Some(store) = &self.store {
            if let Err(e) = store.clear() {
                warn!(error = %e, "Failed to clear active route record");
            }
        }
        self.set_state(ConnectionState::Disconnected);

        match outcome {
            Ok(()) => {
                info!(route = %route.id, "Disconnected");
                Ok(())
            }
            Err(e) => {
                warn!(route = %route.id, error = %e, "Teardown failed");
                Err(e)
            }
        }
    }

    /// Disconnect if connected. Failures are logged, never returned.
    pub async fn shutdown(&self) {
        if !self.state.read().is_connected() {
            return;
        }
        if let Err(e) = self.disconnect().await {
            warn!(error = %e, "Disconnect during shutdown failed");
        }
    }

    /// Clean up after a previous process that never disconnected.
    ///
    /// Returns the leftover record, if there was one.
    pub async fn recover(&self) -> Result<Option<ActiveRecord>> {
        let Some(store) = &self.store else {
            return Ok(None);
        };

        let record = match store.load() {
            Ok(record) => record,
            Err(e) => {
                warn!(error = %e, "Unreadable active route record, discarding");
                store.clear()?;
                return Ok(None);
            }
        };
        let Some(record) = record else {
            return Ok(None);
        };

        warn!(route = %record.route_id, "Found tunnel left behind by a previous run, tearing down");
        if let Err(e) = self.tunnel.teardown_all().await {
            warn!(error = %e, "Leftover tunnel teardown failed");
        }
        store.clear()?;
        Ok(Some(record))
    }

    fn check_idle(state: &ConnectionState) -> Result<()> {
        match state {
            ConnectionState::Disconnected => Ok(()),
            ConnectionState::Connecting => Err(Error::AlreadyConnecting),
            ConnectionState::Connected { route } => Err(Error::AlreadyConnected(route.id.to_string())),
            ConnectionState::Disconnecting => Err(Error::DisconnectInProgress),
        }
    }

    fn set_state(&self, next: ConnectionState) {
        *self.state.write() = next.clone();
        self.emit(next);
    }

    fn emit(&self, state: ConnectionState) {
        let _ = self.event_tx.send(ConnectionEvent::StateChanged { state });
    }
}
