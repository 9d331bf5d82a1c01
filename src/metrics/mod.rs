//! Route metrics: samples, scoring and time-bounded caching.
//!
//! This module provides:
//! - The [`MetricsSample`] value produced by one probe of one route
//! - The pure [`score`] function used to rank routes
//! - Latency series statistics (stability, jitter, loss)
//! - A TTL cache of samples keyed by route identity

mod cache;
mod score;
mod stats;

pub use cache::{MetricsCache, DEFAULT_CACHE_TTL};
pub use score::{grade, score, LATENCY_WEIGHT, STABILITY_WEIGHT, THROUGHPUT_WEIGHT};
pub use stats::LatencySeries;

use std::time::SystemTime;

use serde::{Deserialize, Serialize};

/// Latency reported for a route whose target did not answer.
pub const UNREACHABLE_LATENCY_MS: f64 = 999.0;

/// Result of one measurement of one route.
///
/// Samples are never mutated once built; the next measurement supersedes
/// the previous one instead of being merged into it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSample {
    /// Round-trip latency in milliseconds, or [`UNREACHABLE_LATENCY_MS`].
    pub latency_ms: f64,
    /// Estimated available throughput in Mbps.
    pub throughput_mbps: f64,
    /// Latency stability (0.0 - 1.0).
    pub stability: f64,
    /// Packet loss ratio (0.0 - 1.0).
    pub packet_loss: f64,
    /// Mean absolute deviation between consecutive latency samples.
    pub jitter_ms: f64,
    /// Failure reason. When set, every numeric field is invalid.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// When the sample was taken.
    pub measured_at: SystemTime,
}

impl MetricsSample {
    /// Build a sample from probe readings, normalizing out-of-range values.
    ///
    /// `latency_ms = None` means the target was unreachable.
    pub fn measured(
        latency_ms: Option<f64>,
        throughput_mbps: f64,
        stability: f64,
        packet_loss: f64,
        jitter_ms: f64,
    ) -> Self {
        let latency_ms = match latency_ms {
            Some(ms) if ms.is_finite() => ms.max(0.0),
            _ => UNREACHABLE_LATENCY_MS,
        };

        Self {
            latency_ms,
            throughput_mbps: non_negative(throughput_mbps),
            stability: unit(stability),
            packet_loss: unit(packet_loss),
            jitter_ms: non_negative(jitter_ms),
            error: None,
            measured_at: SystemTime::now(),
        }
    }

    /// Build a failed sample. It always scores 0.
    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            latency_ms: UNREACHABLE_LATENCY_MS,
            throughput_mbps: 0.0,
            stability: 0.0,
            packet_loss: 1.0,
            jitter_ms: 0.0,
            error: Some(reason.into()),
            measured_at: SystemTime::now(),
        }
    }

    /// Whether the numeric fields carry a real measurement.
    pub fn is_valid(&self) -> bool {
        self.error.is_none()
    }

    /// Whether the probe target answered at all.
    pub fn is_reachable(&self) -> bool {
        self.is_valid() && self.latency_ms < UNREACHABLE_LATENCY_MS
    }

    /// Score of this sample (0-100).
    pub fn score(&self) -> f64 {
        score(self)
    }

    /// Get a brief summary.
    pub fn summary(&self) -> String {
        match &self.error {
            Some(reason) => format!("error: {reason}"),
            None => format!(
                "rtt={:.1}ms tput={:.1}Mbps stab={:.2} loss={:.1}% jitter={:.1}ms score={:.1}",
                self.latency_ms,
                self.throughput_mbps,
                self.stability,
                self.packet_loss * 100.0,
                self.jitter_ms,
                self.score()
            ),
        }
    }
}

fn non_negative(value: f64) -> f64 {
    if value.is_finite() {
        value.max(0.0)
    } else {
        0.0
    }
}

fn unit(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_measured_normalizes_inputs() {
        let sample = MetricsSample::measured(Some(-3.0), -1.0, 1.7, f64::NAN, -2.0);
        assert_eq!(sample.latency_ms, 0.0);
        assert_eq!(sample.throughput_mbps, 0.0);
        assert_eq!(sample.stability, 1.0);
        assert_eq!(sample.packet_loss, 0.0);
        assert_eq!(sample.jitter_ms, 0.0);
        assert!(sample.is_valid());
    }

    #[test]
    fn test_unreachable_uses_sentinel() {
        let sample = MetricsSample::measured(None, 50.0, 0.5, 1.0, 0.0);
        assert_eq!(sample.latency_ms, UNREACHABLE_LATENCY_MS);
        assert!(sample.is_valid());
        assert!(!sample.is_reachable());
    }

    #[test]
    fn test_failed_sample() {
        let sample = MetricsSample::failed("ping: unknown host");
        assert!(!sample.is_valid());
        assert_eq!(sample.score(), 0.0);
        assert_eq!(sample.summary(), "error: ping: unknown host");
    }
}
