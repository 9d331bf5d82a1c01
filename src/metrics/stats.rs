//! Statistics over a burst of latency probes.

use serde::{Deserialize, Serialize};

/// Round-trip times collected from one burst of echo requests.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencySeries {
    /// Number of requests sent.
    pub sent: u32,
    /// RTTs of the replies received, in arrival order (ms).
    pub rtts_ms: Vec<f64>,
}

impl LatencySeries {
    /// Create a new series.
    pub fn new(sent: u32, rtts_ms: Vec<f64>) -> Self {
        let rtts_ms = rtts_ms
            .into_iter()
            .filter(|rtt| rtt.is_finite() && *rtt >= 0.0)
            .collect();
        Self { sent, rtts_ms }
    }

    /// Number of replies received.
    pub fn received(&self) -> usize {
        self.rtts_ms.len()
    }

    /// Mean RTT, or `None` when nothing answered.
    pub fn mean_latency(&self) -> Option<f64> {
        if self.rtts_ms.is_empty() {
            return None;
        }
        Some(self.rtts_ms.iter().sum::<f64>() / self.rtts_ms.len() as f64)
    }

    /// Population variance of the RTTs.
    pub fn variance(&self) -> f64 {
        let Some(mean) = self.mean_latency() else {
            return 0.0;
        };
        self.rtts_ms
            .iter()
            .map(|rtt| (rtt - mean).powi(2))
            .sum::<f64>()
            / self.rtts_ms.len() as f64
    }

    /// Fraction of requests without a reply (0.0 - 1.0).
    pub fn packet_loss(&self) -> f64 {
        if self.sent == 0 {
            return 1.0;
        }
        let lost = f64::from(self.sent).max(self.received() as f64) - self.received() as f64;
        (lost / f64::from(self.sent)).clamp(0.0, 1.0)
    }

    /// Stability (0.0 - 1.0): one minus the coefficient of variation.
    ///
    /// No replies yields 0.0.
    pub fn stability(&self) -> f64 {
        let Some(mean) = self.mean_latency() else {
            return 0.0;
        };
        if mean <= f64::EPSILON {
            return 1.0;
        }
        (1.0 - self.variance().sqrt() / mean).clamp(0.0, 1.0)
    }

    /// Mean absolute deviation between consecutive RTTs (ms).
    pub fn jitter(&self) -> f64 {
        if self.rtts_ms.len() < 2 {
            return 0.0;
        }
        let total: f64 = self
            .rtts_ms
            .windows(2)
            .map(|pair| (pair[1] - pair[0]).abs())
            .sum();
        total / (self.rtts_ms.len() - 1) as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_series() {
        let series = LatencySeries::new(4, vec![]);
        assert_eq!(series.mean_latency(), None);
        assert_eq!(series.packet_loss(), 1.0);
        assert_eq!(series.stability(), 0.0);
        assert_eq!(series.jitter(), 0.0);
    }

    #[test]
    fn test_constant_series_is_stable() {
        let series = LatencySeries::new(4, vec![20.0, 20.0, 20.0, 20.0]);
        assert_eq!(series.mean_latency(), Some(20.0));
        assert_eq!(series.packet_loss(), 0.0);
        assert_eq!(series.stability(), 1.0);
        assert_eq!(series.jitter(), 0.0);
    }

    #[test]
    fn test_jitter_and_loss() {
        let series = LatencySeries::new(5, vec![10.0, 14.0, 12.0, 18.0]);
        // |14-10| + |12-14| + |18-12| = 12 over 3 gaps
        assert!((series.jitter() - 4.0).abs() < 1e-9);
        assert!((series.packet_loss() - 0.2).abs() < 1e-9);
        assert!(series.stability() > 0.0 && series.stability() < 1.0);
    }

    #[test]
    fn test_erratic_series_less_stable() {
        let calm = LatencySeries::new(4, vec![30.0, 31.0, 29.0, 30.0]);
        let noisy = LatencySeries::new(4, vec![5.0, 80.0, 10.0, 120.0]);
        assert!(calm.stability() > noisy.stability());
    }

    #[test]
    fn test_invalid_rtts_are_dropped() {
        let series = LatencySeries::new(3, vec![f64::NAN, -1.0, 12.0]);
        assert_eq!(series.received(), 1);
    }
}
