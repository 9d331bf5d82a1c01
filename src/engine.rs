//! Engine facade for the presentation layer.
//!
//! Wires the analysis loop and the connection manager together and keeps
//! observers up to date with a [`Status`] pushed after every probe cycle
//! and every connection transition.

use std::sync::Arc;

use tokio::sync::{broadcast, OnceCell};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::analysis::AnalysisLoop;
use crate::config::Config;
use crate::connection::{ActiveRecord, ActiveRouteStore, ConnectionManager};
use crate::error::{Error, Result};
use crate::probe::{ProbePort, SystemProbe};
use crate::tunnel::{TunnelProvisioner, WgQuickProvisioner};
use crate::types::{Route, RouteId, Status};

/// The route scout engine.
///
/// Construct inside a Tokio runtime; the status relay runs as a task.
pub struct Engine {
    analysis: Arc<AnalysisLoop>,
    connection: Arc<ConnectionManager>,
    status_tx: broadcast::Sender<Status>,
    relay: CancellationToken,
    /// Set once leftovers of a previous run have been cleaned up.
    recovered: OnceCell<()>,
}

impl Engine {
    /// Build an engine from configuration and collaborators.
    pub fn new(
        config: &Config,
        probe: Arc<dyn ProbePort>,
        tunnel: Arc<dyn TunnelProvisioner>,
    ) -> Self {
        // The tunnel must never be ranked as a path for itself.
        let filter = config
            .analysis
            .discovery_filter()
            .ignoring(config.tunnel.interface_name.clone());
        let analysis = AnalysisLoop::new(config.analysis.clone(), probe).with_filter(filter);
        let connection = ConnectionManager::new(tunnel, config.tunnel.provision_timeout)
            .with_store(ActiveRouteStore::new(config.state.path()));

        Self::from_parts(Arc::new(analysis), Arc::new(connection))
    }

    /// Engine backed by the host: `ping`, interface counters and `wg-quick`.
    pub fn system(config: &Config) -> Self {
        let probe = Arc::new(SystemProbe::new(config.probe.clone()));
        let tunnel = Arc::new(WgQuickProvisioner::new(config.tunnel.clone()));
        Self::new(config, probe, tunnel)
    }

    /// Assemble an engine from already built components.
    pub fn from_parts(analysis: Arc<AnalysisLoop>, connection: Arc<ConnectionManager>) -> Self {
        let (status_tx, _) = broadcast::channel(64);
        let relay = CancellationToken::new();

        spawn_relay(
            Arc::clone(&analysis),
            Arc::clone(&connection),
            status_tx.clone(),
            relay.clone(),
        );

        Self {
            analysis,
            connection,
            status_tx,
            relay,
            recovered: OnceCell::new(),
        }
    }

    pub fn analysis(&self) -> &Arc<AnalysisLoop> {
        &self.analysis
    }

    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.connection
    }

    /// Current status snapshot.
    pub fn status(&self) -> Status {
        snapshot(&self.analysis, &self.connection)
    }

    /// Status updates, pushed after every cycle and every transition.
    pub fn subscribe(&self) -> broadcast::Receiver<Status> {
        self.status_tx.subscribe()
    }

    /// Start periodic analysis. Already running is fine.
    pub async fn start_analysis(&self) -> Result<()> {
        match self.analysis.start().await {
            Err(Error::AlreadyRunning) => {
                debug!("Analysis already running");
                Ok(())
            }
            other => other,
        }
    }

    pub fn stop_analysis(&self) {
        self.analysis.stop();
    }

    /// Connect over the best ranked route.
    ///
    /// The first connect of an engine cleans up after a crashed previous run.
    pub async fn connect_best(&self) -> Result<Route> {
        self.ensure_recovered().await;
        let ranked = self.analysis.ranked();
        self.connection.connect_best(&ranked).await
    }

    /// Connect over a specific catalog route.
    pub async fn connect_route(&self, id: &RouteId) -> Result<Route> {
        self.ensure_recovered().await;
        let route = self
            .analysis
            .route(id)
            .ok_or_else(|| Error::RouteNotFound(id.to_string()))?;
        self.connection.connect(route.clone()).await?;
        Ok(route)
    }

    pub async fn disconnect(&self) -> Result<()> {
        self.connection.disconnect().await
    }

    /// Tear down what a crashed previous run left behind.
    ///
    /// Call before the first connect; it tears down whatever the state file
    /// names.
    pub async fn recover(&self) -> Result<Option<ActiveRecord>> {
        let record = self.connection.recover().await?;
        let _ = self.recovered.set(());
        Ok(record)
    }

    async fn ensure_recovered(&self) {
        self.recovered
            .get_or_init(|| async {
                if let Err(e) = self.connection.recover().await {
                    warn!(error = %e, "Cleanup of a previous run failed");
                }
            })
            .await;
    }

    /// Stop analysis, disconnect if connected and stop the status relay.
    pub async fn shutdown(&self) {
        info!("Shutting down");
        self.analysis.stop();
        self.connection.shutdown().await;
        // Let observers see the final state before the relay goes away.
        let _ = self.status_tx.send(self.status());
        self.relay.cancel();
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.analysis.stop();
        if let Some(route) = self.connection.state().active_route() {
            warn!(route = %route.id, "Engine dropped while connected, tunnel stays up until the next recover");
        }
        self.relay.cancel();
    }
}

fn snapshot(analysis: &AnalysisLoop, connection: &ConnectionManager) -> Status {
    Status::new(&connection.state(), analysis.ranked(), analysis.is_running())
}

fn spawn_relay(
    analysis: Arc<AnalysisLoop>,
    connection: Arc<ConnectionManager>,
    status_tx: broadcast::Sender<Status>,
    token: CancellationToken,
) {
    let mut analysis_rx = analysis.subscribe();
    let mut connection_rx = connection.subscribe();

    tokio::spawn(async move {
        loop {
            let publish = tokio::select! {
                biased;
                () = token.cancelled() => break,
                event = analysis_rx.recv() => match event {
                    Ok(_) => true,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "Status relay lagged behind analysis events");
                        true
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                event = connection_rx.recv() => match event {
                    Ok(_) => true,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "Status relay lagged behind connection events");
                        true
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            };

            if publish {
                let _ = status_tx.send(snapshot(&analysis, &connection));
            }
        }
        debug!("Status relay stopped");
    });
}
