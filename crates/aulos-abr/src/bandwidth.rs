/// One exponentially-decaying throughput average.
///
/// Kept as a pair of accumulators, `numerator = Σ decayed(weight·value)`
/// and `denominator = Σ decayed(weight)`: their ratio is the debiased
/// estimate, so a single early sample already reads at face value instead
/// of being dragged toward zero.
#[derive(Clone, Debug)]
struct DecayingRate {
    /// Per-second retention, `0.5^(1/half_life)`.
    retention: f64,
    numerator: f64,
    denominator: f64,
}

impl DecayingRate {
    fn with_half_life(half_life_secs: f64) -> Self {
        Self {
            retention: 0.5_f64.powf(1.0 / half_life_secs.max(0.001)),
            numerator: 0.0,
            denominator: 0.0,
        }
    }

    fn absorb(&mut self, weight_secs: f64, bps: f64) {
        let keep = self.retention.powf(weight_secs.max(0.0));
        self.numerator = self.numerator * keep + bps * (1.0 - keep);
        self.denominator = self.denominator * keep + (1.0 - keep);
    }

    fn bps(&self) -> Option<f64> {
        (self.denominator > 0.0).then(|| self.numerator / self.denominator)
    }
}

/// Throughput estimator combining a fast and a slow exponential average;
/// the reported estimate is the pessimist of the two, so a sudden drop
/// registers quickly while a lucky burst does not.
#[derive(Clone, Debug)]
pub struct BandwidthEstimator {
    fast: DecayingRate,
    slow: DecayingRate,
    bytes_sampled: u64,
}

impl BandwidthEstimator {
    const FAST_HALF_LIFE_SECS: f64 = 2.0;
    const SLOW_HALF_LIFE_SECS: f64 = 10.0;
    /// Samples smaller than this carry more protocol overhead than
    /// signal.
    const MIN_SAMPLE_BYTES: u64 = 16_000;
    const MIN_DURATION_MS: f64 = 0.5;

    #[must_use]
    pub fn new() -> Self {
        Self {
            fast: DecayingRate::with_half_life(Self::FAST_HALF_LIFE_SECS),
            slow: DecayingRate::with_half_life(Self::SLOW_HALF_LIFE_SECS),
            bytes_sampled: 0,
        }
    }

    /// Feed one completed download.
    pub fn add_sample(&mut self, duration_ms: f64, bytes: u64) {
        if bytes < Self::MIN_SAMPLE_BYTES {
            return;
        }
        let duration_ms = duration_ms.max(Self::MIN_DURATION_MS);
        let bps = bytes as f64 * 8_000.0 / duration_ms;
        let weight_secs = duration_ms / 1_000.0;
        self.fast.absorb(weight_secs, bps);
        self.slow.absorb(weight_secs, bps);
        self.bytes_sampled = self.bytes_sampled.saturating_add(bytes);
    }

    /// Current estimate, bits per second.
    #[must_use]
    pub fn get_estimate(&self) -> Option<f64> {
        if self.bytes_sampled == 0 {
            return None;
        }
        let fast = self.fast.bps()?;
        let slow = self.slow.bps()?;
        let estimate = fast.min(slow);
        (estimate > 0.0).then_some(estimate)
    }

    /// Forget everything (e.g. after a network change).
    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

impl Default for BandwidthEstimator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_estimate_without_samples() {
        assert_eq!(BandwidthEstimator::new().get_estimate(), None);
    }

    #[test]
    fn tiny_samples_are_ignored() {
        let mut estimator = BandwidthEstimator::new();
        estimator.add_sample(100.0, 4_000);
        assert_eq!(estimator.get_estimate(), None);
    }

    #[test]
    fn first_sample_reads_at_face_value() {
        let mut estimator = BandwidthEstimator::new();
        // 125 kB in 1 s = 1 Mb/s; the debiased ratio must not be dragged
        // toward zero by the empty history
        estimator.add_sample(1_000.0, 125_000);
        let bps = estimator.get_estimate().unwrap();
        assert!((bps - 1_000_000.0).abs() < 10_000.0, "estimate {bps}");
    }

    #[test]
    fn stable_rate_converges_to_the_rate() {
        let mut estimator = BandwidthEstimator::new();
        for _ in 0..20 {
            estimator.add_sample(1_000.0, 500_000);
        }
        let bps = estimator.get_estimate().unwrap();
        assert!((bps - 4_000_000.0).abs() < 50_000.0, "estimate {bps}");
    }

    #[test]
    fn drop_registers_quickly() {
        let mut estimator = BandwidthEstimator::new();
        for _ in 0..10 {
            estimator.add_sample(1_000.0, 1_000_000);
        }
        for _ in 0..3 {
            estimator.add_sample(1_000.0, 60_000);
        }
        let bps = estimator.get_estimate().unwrap();
        assert!(bps < 3_000_000.0, "estimate should fall, got {bps}");
    }

    #[test]
    fn reset_clears_state() {
        let mut estimator = BandwidthEstimator::new();
        estimator.add_sample(1_000.0, 125_000);
        estimator.reset();
        assert_eq!(estimator.get_estimate(), None);
    }
}
