//! Periodic route analysis.
//!
//! The [`AnalysisLoop`] owns the route catalog. On every tick it measures
//! each route in turn (or reuses a fresh cached sample), re-ranks the
//! catalog by score and broadcasts the new ranking.

mod selector;

pub use selector::{rank, select_best};

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::catalog::{default_ignore_prefixes, discover_routes, DiscoveryFilter};
use crate::error::{Error, Result};
use crate::metrics::{MetricsCache, MetricsSample};
use crate::probe::{measure_route, ProbePort};
use crate::types::{Route, RouteId};
use crate::util::format_duration;

/// Analysis loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Time between probe cycles.
    #[serde(default = "default_interval", with = "humantime_serde")]
    pub interval: Duration,

    /// How long a sample stays fresh.
    #[serde(default = "default_cache_ttl", with = "humantime_serde")]
    pub cache_ttl: Duration,

    /// Upper bound for measuring a single route.
    #[serde(default = "default_probe_timeout", with = "humantime_serde")]
    pub probe_timeout: Duration,

    /// Re-run discovery every N cycles (0 = never).
    #[serde(default = "default_rediscover_every")]
    pub rediscover_every: u32,

    /// Interface name prefixes excluded from discovery.
    #[serde(default = "default_ignore_prefixes")]
    pub ignore_interfaces: Vec<String>,

    /// Scan for wireless networks.
    #[serde(default = "default_scan_wifi")]
    pub scan_wifi: bool,
}

fn default_interval() -> Duration {
    Duration::from_secs(5)
}
fn default_cache_ttl() -> Duration {
    crate::metrics::DEFAULT_CACHE_TTL
}
fn default_probe_timeout() -> Duration {
    Duration::from_secs(10)
}
fn default_rediscover_every() -> u32 {
    12
}
fn default_scan_wifi() -> bool {
    true
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            interval: default_interval(),
            cache_ttl: default_cache_ttl(),
            probe_timeout: default_probe_timeout(),
            rediscover_every: default_rediscover_every(),
            ignore_interfaces: default_ignore_prefixes(),
            scan_wifi: default_scan_wifi(),
        }
    }
}

impl AnalysisConfig {
    /// Discovery filter described by this configuration.
    pub fn discovery_filter(&self) -> DiscoveryFilter {
        DiscoveryFilter {
            ignore_prefixes: self.ignore_interfaces.clone(),
            scan_wifi: self.scan_wifi,
        }
    }
}

/// Events published by the analysis loop.
#[derive(Debug, Clone)]
pub enum AnalysisEvent {
    /// The catalog was rebuilt from discovery.
    CatalogRefreshed { routes: usize },
    /// A probe cycle finished; `ranked` is sorted best first.
    CycleCompleted { cycle: u64, ranked: Vec<Route> },
}

/// What a call to [`AnalysisLoop::run_cycle`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Completed,
    /// Another cycle was still in flight.
    Skipped,
}

/// Clears the in-flight flag when a cycle ends, however it ends.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Periodic measurement and ranking of the route catalog.
pub struct AnalysisLoop {
    config: AnalysisConfig,
    probe: Arc<dyn ProbePort>,
    filter: DiscoveryFilter,
    cache: MetricsCache,
    /// Ranked catalog, best first once a cycle has run.
    catalog: RwLock<Vec<Route>>,
    /// Cancellation handle of the active ticker.
    ticker: Mutex<Option<CancellationToken>>,
    in_flight: AtomicBool,
    cycles: AtomicU64,
    event_tx: broadcast::Sender<AnalysisEvent>,
}

impl AnalysisLoop {
    /// Create a stopped loop with an empty catalog.
    pub fn new(config: AnalysisConfig, probe: Arc<dyn ProbePort>) -> Self {
        let (event_tx, _) = broadcast::channel(64);

        Self {
            filter: config.discovery_filter(),
            cache: MetricsCache::new(config.cache_ttl),
            config,
            probe,
            catalog: RwLock::new(Vec::new()),
            ticker: Mutex::new(None),
            in_flight: AtomicBool::new(false),
            cycles: AtomicU64::new(0),
            event_tx,
        }
    }

    /// Replace the discovery filter.
    pub fn with_filter(mut self, filter: DiscoveryFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    pub fn cache(&self) -> &MetricsCache {
        &self.cache
    }

    /// Subscribe to analysis events.
    pub fn subscribe(&self) -> broadcast::Receiver<AnalysisEvent> {
        self.event_tx.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.ticker.lock().is_some()
    }

    /// Number of completed cycles.
    pub fn cycles_completed(&self) -> u64 {
        self.cycles.load(Ordering::Acquire)
    }

    /// Snapshot of the catalog in its current ranking.
    pub fn ranked(&self) -> Vec<Route> {
        self.catalog.read().clone()
    }

    /// Look up a catalog route by id.
    pub fn route(&self, id: &RouteId) -> Option<Route> {
        self.catalog.read().iter().find(|r| &r.id == id).cloned()
    }

    /// Replace the catalog with externally built routes.
    pub fn set_catalog(&self, routes: Vec<Route>) {
        let count = routes.len();
        *self.catalog.write() = routes;
        let _ = self
            .event_tx
            .send(AnalysisEvent::CatalogRefreshed { routes: count });
    }

    /// Seed the catalog and start the periodic ticker.
    ///
    /// The first cycle runs right away.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let token = {
            let mut ticker = self.ticker.lock();
            if ticker.is_some() {
                return Err(Error::AlreadyRunning);
            }
            let token = CancellationToken::new();
            *ticker = Some(token.clone());
            token
        };

        info!(interval = %format_duration(self.config.interval), "Starting route analysis");
        self.refresh_catalog().await;

        if token.is_cancelled() {
            debug!("Analysis stopped during discovery");
            return Ok(());
        }

        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(this.config.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;
                    () = token.cancelled() => break,
                    _ = ticker.tick() => {
                        // A cycle already underway finishes even if stop() lands now.
                        this.run_cycle().await;
                    }
                }
            }
            debug!("Analysis ticker stopped");
        });

        Ok(())
    }

    /// Disarm the ticker. Idempotent.
    pub fn stop(&self) {
        if let Some(token) = self.ticker.lock().take() {
            token.cancel();
            info!("Route analysis stopped");
        }
    }

    /// Rebuild the catalog from discovery.
    ///
    /// Routes that survive keep their last measurement so the ranking does
    /// not reset.
    pub async fn refresh_catalog(&self) -> usize {
        let mut fresh = discover_routes(self.probe.as_ref(), &self.filter).await;

        let count = {
            let mut catalog = self.catalog.write();
            let mut previous: HashMap<RouteId, Route> =
                catalog.drain(..).map(|r| (r.id.clone(), r)).collect();
            for route in &mut fresh {
                if let Some(old) = previous.remove(&route.id) {
                    route.metrics = old.metrics;
                    route.last_analyzed_at = old.last_analyzed_at;
                }
            }
            for gone in previous.keys() {
                self.cache.remove(gone);
            }
            rank(&mut fresh);
            *catalog = fresh;
            catalog.len()
        };

        let _ = self
            .event_tx
            .send(AnalysisEvent::CatalogRefreshed { routes: count });
        count
    }

    /// Run one probe cycle now.
    ///
    /// Returns [`CycleOutcome::Skipped`] when another cycle is in flight.
    pub async fn run_cycle(&self) -> CycleOutcome {
        if self.in_flight.swap(true, Ordering::AcqRel) {
            debug!("Previous cycle still running, skipping tick");
            return CycleOutcome::Skipped;
        }
        let _in_flight = InFlight(&self.in_flight);

        let cycle = self.cycles.load(Ordering::Acquire) + 1;
        let every = u64::from(self.config.rediscover_every);
        if every > 0 && cycle > 1 && (cycle - 1) % every == 0 {
            debug!(cycle, "Periodic route re-discovery");
            self.refresh_catalog().await;
        }

        let snapshot = self.ranked();
        let mut measured: HashMap<RouteId, MetricsSample> = HashMap::with_capacity(snapshot.len());
        for route in &snapshot {
            let sample = self.sample_for(route).await;
            measured.insert(route.id.clone(), sample);
        }

        // The catalog may have been refreshed meanwhile; apply by id.
        let ranked = {
            let mut catalog = self.catalog.write();
            for route in catalog.iter_mut() {
                if let Some(sample) = measured.remove(&route.id) {
                    route.record(sample);
                }
            }
            rank(&mut catalog);
            catalog.clone()
        };

        self.cycles.store(cycle, Ordering::Release);
        if let Some(best) = ranked.first() {
            debug!(cycle, best = %best.id, score = best.score(), "Probe cycle completed");
        }
        let _ = self
            .event_tx
            .send(AnalysisEvent::CycleCompleted { cycle, ranked });

        CycleOutcome::Completed
    }

    /// Cached sample, or a fresh measurement bounded by `probe_timeout`.
    async fn sample_for(&self, route: &Route) -> MetricsSample {
        if let Some(sample) = self.cache.get(&route.id) {
            return sample;
        }

        let timeout = self.config.probe_timeout;
        match tokio::time::timeout(timeout, measure_route(self.probe.as_ref(), route)).await {
            Ok(Ok(sample)) => {
                self.cache.put(route.id.clone(), sample.clone());
                sample
            }
            Ok(Err(e)) => {
                warn!(route = %route.id, error = %e, "Route probe failed");
                MetricsSample::failed(e.to_string())
            }
            Err(_) => {
                warn!(route = %route.id, "Route probe timed out");
                MetricsSample::failed(format!(
                    "probe timed out after {}",
                    format_duration(timeout)
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::{MockProbe, MockTarget};
    use crate::types::RouteKind;

    fn route(id: &str, endpoint: &str) -> Route {
        Route::new(
            RouteId::from(id),
            id,
            RouteKind::GatewayRoute,
            endpoint.parse().unwrap(),
            Some(id.to_string()),
        )
    }

    fn analysis(probe: Arc<MockProbe>) -> AnalysisLoop {
        AnalysisLoop::new(AnalysisConfig::default(), probe)
    }

    #[tokio::test]
    async fn test_cycle_ranks_routes() {
        let probe = Arc::new(MockProbe::new());
        probe.set_target("10.0.0.1".parse().unwrap(), MockTarget::reachable(80.0, 0.5));
        probe.set_target("10.0.0.2".parse().unwrap(), MockTarget::reachable(10.0, 0.9));
        let analysis = analysis(probe);
        analysis.set_catalog(vec![route("a", "10.0.0.1"), route("b", "10.0.0.2")]);

        assert_eq!(analysis.run_cycle().await, CycleOutcome::Completed);

        let ranked = analysis.ranked();
        assert_eq!(ranked[0].id.as_str(), "b");
        assert!(ranked.iter().all(|r| r.metrics.is_some()));
        assert_eq!(analysis.cycles_completed(), 1);
    }

    #[tokio::test]
    async fn test_failing_route_only_affects_itself() {
        let probe = Arc::new(MockProbe::new());
        probe.set_target("10.0.0.1".parse().unwrap(), MockTarget::reachable(20.0, 1.0));
        probe.set_target("10.0.0.2".parse().unwrap(), MockTarget::Fail("icmp blocked".into()));
        let analysis = analysis(probe);
        analysis.set_catalog(vec![route("bad", "10.0.0.2"), route("good", "10.0.0.1")]);

        analysis.run_cycle().await;

        let ranked = analysis.ranked();
        assert_eq!(ranked[0].id.as_str(), "good");
        let bad = &ranked[1];
        assert_eq!(bad.score(), 0.0);
        assert!(bad.metrics.as_ref().unwrap().error.is_some());
        assert!(bad.last_analyzed_at.is_none());
        // failures are not cached
        assert_eq!(analysis.cache().len(), 1);
    }

    #[tokio::test]
    async fn test_fresh_samples_come_from_cache() {
        let probe = Arc::new(MockProbe::new());
        probe.set_target("10.0.0.1".parse().unwrap(), MockTarget::reachable(20.0, 1.0));
        let analysis = analysis(Arc::clone(&probe));
        analysis.set_catalog(vec![route("a", "10.0.0.1")]);

        analysis.run_cycle().await;
        analysis.run_cycle().await;
        assert_eq!(probe.latency_calls(), 1);
        assert_eq!(analysis.cycles_completed(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_probe_times_out() {
        let probe = Arc::new(MockProbe::new());
        probe.set_target("10.0.0.1".parse().unwrap(), MockTarget::reachable(20.0, 1.0));
        probe.set_delay(Duration::from_secs(60));
        let analysis = analysis(probe);
        analysis.set_catalog(vec![route("a", "10.0.0.1")]);

        analysis.run_cycle().await;

        let sample = analysis.ranked()[0].metrics.clone().unwrap();
        assert!(sample.error.unwrap().contains("timed out"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_cycle_is_skipped() {
        let probe = Arc::new(MockProbe::new());
        probe.set_target("10.0.0.1".parse().unwrap(), MockTarget::reachable(20.0, 1.0));
        probe.set_delay(Duration::from_secs(2));
        let analysis = Arc::new(analysis(Arc::clone(&probe)));
        analysis.set_catalog(vec![route("a", "10.0.0.1")]);

        let first = tokio::spawn({
            let analysis = Arc::clone(&analysis);
            async move { analysis.run_cycle().await }
        });
        while probe.latency_calls() == 0 {
            tokio::task::yield_now().await;
        }

        assert_eq!(analysis.run_cycle().await, CycleOutcome::Skipped);
        assert_eq!(first.await.unwrap(), CycleOutcome::Completed);
        assert_eq!(analysis.run_cycle().await, CycleOutcome::Completed);
    }

    #[tokio::test]
    async fn test_start_twice_is_rejected() {
        let probe = Arc::new(MockProbe::new());
        let analysis = Arc::new(analysis(probe));

        analysis.start().await.unwrap();
        assert!(analysis.is_running());
        assert!(matches!(analysis.start().await, Err(Error::AlreadyRunning)));

        analysis.stop();
        analysis.stop();
        assert!(!analysis.is_running());
    }

    #[tokio::test]
    async fn test_refresh_keeps_measurements() {
        let probe = Arc::new(MockProbe::new());
        probe.set_default_routes(vec![crate::util::GatewayRoute {
            destination: "default".into(),
            gateway: "10.0.0.1".parse().unwrap(),
            device: Some("eth0".into()),
            metric: None,
        }]);
        probe.set_target("10.0.0.1".parse().unwrap(), MockTarget::reachable(20.0, 1.0));
        let analysis = analysis(probe);

        assert_eq!(analysis.refresh_catalog().await, 1);
        analysis.run_cycle().await;
        assert_eq!(analysis.refresh_catalog().await, 1);

        assert!(analysis.ranked()[0].metrics.is_some());
    }
}
