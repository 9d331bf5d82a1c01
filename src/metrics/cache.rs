//! Time-bounded memoization of route samples.

use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

use super::MetricsSample;
use crate::types::RouteId;

/// Default freshness window for cached samples.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
struct CacheEntry {
    sample: MetricsSample,
    cached_at: Instant,
}

/// Metrics cache keyed by route identity.
///
/// Entries expire lazily: a read at or beyond the TTL is a miss. There is
/// no background sweep; the map is bounded by the number of known routes.
#[derive(Debug)]
pub struct MetricsCache {
    entries: DashMap<RouteId, CacheEntry>,
    ttl: Duration,
}

impl MetricsCache {
    /// Create a cache with the given freshness window.
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Freshness window.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Get a fresh sample for `id`.
    pub fn get(&self, id: &RouteId) -> Option<MetricsSample> {
        self.get_at(id, Instant::now())
    }

    /// Get a sample for `id` as seen at `now`.
    pub fn get_at(&self, id: &RouteId, now: Instant) -> Option<MetricsSample> {
        let entry = self.entries.get(id)?;
        if now.saturating_duration_since(entry.cached_at) >= self.ttl {
            return None;
        }
        Some(entry.sample.clone())
    }

    /// Store a sample, replacing any previous entry for `id`.
    pub fn put(&self, id: RouteId, sample: MetricsSample) {
        self.put_at(id, sample, Instant::now());
    }

    /// Store a sample as cached at `cached_at`.
    pub fn put_at(&self, id: RouteId, sample: MetricsSample, cached_at: Instant) {
        self.entries.insert(id, CacheEntry { sample, cached_at });
    }

    /// Drop the entry for `id`.
    pub fn remove(&self, id: &RouteId) {
        self.entries.remove(id);
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Number of stored entries, fresh or not.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for MetricsCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_TTL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(latency: f64) -> MetricsSample {
        MetricsSample::measured(Some(latency), 100.0, 0.9, 0.0, 1.0)
    }

    #[test]
    fn test_round_trip() {
        let cache = MetricsCache::default();
        let id = RouteId::from("iface:eth0");
        let s = sample(12.0);

        cache.put(id.clone(), s.clone());
        assert_eq!(cache.get(&id), Some(s));
    }

    #[test]
    fn test_miss_when_absent() {
        let cache = MetricsCache::default();
        assert_eq!(cache.get(&RouteId::from("wifi:home")), None);
    }

    #[test]
    fn test_expiry_boundary() {
        let cache = MetricsCache::new(Duration::from_millis(30_000));
        let id = RouteId::from("iface:eth0");
        let start = Instant::now();
        cache.put_at(id.clone(), sample(5.0), start);

        assert!(cache.get_at(&id, start + Duration::from_millis(29_999)).is_some());
        assert!(cache.get_at(&id, start + Duration::from_millis(30_000)).is_none());
        assert!(cache.get_at(&id, start + Duration::from_secs(120)).is_none());
    }

    #[test]
    fn test_last_write_wins() {
        let cache = MetricsCache::default();
        let id = RouteId::from("gw:default@192.168.1.1");
        cache.put(id.clone(), sample(10.0));
        cache.put(id.clone(), sample(20.0));

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&id).map(|s| s.latency_ms), Some(20.0));
    }

    #[test]
    fn test_clear() {
        let cache = MetricsCache::default();
        cache.put(RouteId::from("a"), sample(1.0));
        cache.put(RouteId::from("b"), sample(2.0));
        cache.clear();
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_with_paused_clock() {
        let cache = MetricsCache::default();
        let id = RouteId::from("iface:wlan0");
        cache.put(id.clone(), sample(8.0));

        tokio::time::advance(Duration::from_secs(29)).await;
        assert!(cache.get(&id).is_some());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(cache.get(&id).is_none());
    }
}
