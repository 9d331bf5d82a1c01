//! Route scoring.

use super::MetricsSample;

/// Weight of the latency component.
pub const LATENCY_WEIGHT: f64 = 0.4;
/// Weight of the throughput component.
pub const THROUGHPUT_WEIGHT: f64 = 0.4;
/// Weight of the stability component.
pub const STABILITY_WEIGHT: f64 = 0.2;

/// Calculate the desirability score of a sample (0-100).
///
/// A sample carrying an error scores 0. Otherwise latency saturates at 0
/// points from 100ms upwards and throughput saturates at 100 points from
/// 1000 Mbps upwards.
pub fn score(sample: &MetricsSample) -> f64 {
    if sample.error.is_some() {
        return 0.0;
    }

    let score = latency_score(sample.latency_ms) * LATENCY_WEIGHT
        + throughput_score(sample.throughput_mbps) * THROUGHPUT_WEIGHT
        + stability_score(sample.stability) * STABILITY_WEIGHT;

    score.clamp(0.0, 100.0)
}

/// Latency score (0-100, lower latency = higher score).
fn latency_score(latency_ms: f64) -> f64 {
    if latency_ms.is_nan() {
        return 0.0;
    }
    (100.0 - latency_ms).clamp(0.0, 100.0)
}

/// Throughput score (0-100).
fn throughput_score(throughput_mbps: f64) -> f64 {
    if throughput_mbps.is_nan() {
        return 0.0;
    }
    (throughput_mbps / 10.0).clamp(0.0, 100.0)
}

/// Stability score (0-100).
fn stability_score(stability: f64) -> f64 {
    if stability.is_nan() {
        return 0.0;
    }
    stability.clamp(0.0, 1.0) * 100.0
}

/// Get a human-readable grade for a score.
pub fn grade(score: f64) -> &'static str {
    match score {
        s if s >= 80.0 => "excellent",
        s if s >= 60.0 => "good",
        s if s >= 40.0 => "fair",
        s if s >= 20.0 => "poor",
        _ => "critical",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(latency_ms: f64, throughput_mbps: f64, stability: f64) -> MetricsSample {
        MetricsSample {
            latency_ms,
            throughput_mbps,
            stability,
            packet_loss: 0.0,
            jitter_ms: 0.0,
            error: None,
            measured_at: std::time::SystemTime::UNIX_EPOCH,
        }
    }

    #[test]
    fn test_reference_scores() {
        let a = score(&sample(10.0, 500.0, 0.95));
        assert!((a - 75.0).abs() < 1e-9, "got {a}");

        let b = score(&sample(200.0, 5.0, 0.2));
        assert!((b - 4.2).abs() < 1e-9, "got {b}");
    }

    #[test]
    fn test_error_scores_zero() {
        for reason in ["x", "", "timeout after 10s"] {
            let mut s = sample(1.0, 10_000.0, 1.0);
            s.error = Some(reason.to_string());
            assert_eq!(score(&s), 0.0);
        }
    }

    #[test]
    fn test_score_is_pure() {
        let s = sample(42.0, 120.0, 0.7);
        assert_eq!(score(&s), score(&s.clone()));
    }

    #[test]
    fn test_saturation() {
        // Latency floors at 0 points, never negative.
        assert_eq!(score(&sample(100.0, 0.0, 0.0)), 0.0);
        assert_eq!(score(&sample(5000.0, 0.0, 0.0)), 0.0);

        // Throughput caps at 100 points.
        assert_eq!(score(&sample(100.0, 1000.0, 0.0)), 40.0);
        assert_eq!(score(&sample(100.0, 50_000.0, 0.0)), 40.0);

        // Perfect sample.
        assert_eq!(score(&sample(0.0, 1000.0, 1.0)), 100.0);
    }

    #[test]
    fn test_monotonic_latency() {
        let mut previous = f64::MIN;
        for latency in (0..=300).rev().map(f64::from) {
            let current = score(&sample(latency, 200.0, 0.5));
            assert!(current >= previous, "latency {latency}: {current} < {previous}");
            previous = current;
        }
    }

    #[test]
    fn test_monotonic_throughput() {
        let mut previous = f64::MIN;
        for throughput in (0..=1000).step_by(5).map(f64::from) {
            let current = score(&sample(30.0, throughput, 0.5));
            assert!(current >= previous, "throughput {throughput}: {current} < {previous}");
            previous = current;
        }
    }

    #[test]
    fn test_monotonic_stability() {
        let mut previous = f64::MIN;
        for step in 0..=100 {
            let current = score(&sample(30.0, 100.0, f64::from(step) / 100.0));
            assert!(current >= previous);
            previous = current;
        }
    }

    #[test]
    fn test_non_finite_inputs_stay_in_range() {
        let s = sample(f64::NAN, f64::INFINITY, f64::NAN);
        let value = score(&s);
        assert!((0.0..=100.0).contains(&value));
    }

    #[test]
    fn test_grade() {
        assert_eq!(grade(95.0), "excellent");
        assert_eq!(grade(75.0), "good");
        assert_eq!(grade(45.0), "fair");
        assert_eq!(grade(25.0), "poor");
        assert_eq!(grade(0.0), "critical");
    }
}
