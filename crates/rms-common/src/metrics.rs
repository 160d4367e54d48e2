//! Timing statistics over cycle-count samples.
//!
//! Used by the analysis stage to summarize execution windows, detection
//! latencies and suspension gaps. Storage is allocated once up front; the
//! record path never allocates.

use serde::Serialize;

/// Statistics over a stream of cycle-count samples with a bounded sample buffer.
#[derive(Debug)]
pub struct CycleStats {
    /// Ring buffer of recorded samples.
    samples: Box<[u64]>,
    /// Next write position in the ring buffer.
    write_pos: usize,
    /// Samples held in the buffer (saturates at buffer size).
    sample_count: usize,
    /// Total samples recorded.
    total: u64,
    min: u64,
    max: u64,
    /// Sum of all samples for mean calculation.
    sum: u128,
    /// Samples that exceeded the budget.
    over_budget: u64,
    /// Budget in cycles; samples above this are counted as over budget.
    budget: u64,
}

impl CycleStats {
    /// Create a collector retaining up to `capacity` samples.
    ///
    /// # Arguments
    ///
    /// * `capacity` - Number of samples kept for percentile queries.
    /// * `budget` - Cycle budget; larger samples count as over budget.
    #[must_use]
    pub fn new(capacity: usize, budget: u64) -> Self {
        let size = capacity.max(1);
        Self {
            samples: vec![0u64; size].into_boxed_slice(),
            write_pos: 0,
            sample_count: 0,
            total: 0,
            min: u64::MAX,
            max: 0,
            sum: 0,
            over_budget: 0,
            budget,
        }
    }

    /// Collector without a meaningful budget.
    #[must_use]
    pub fn unbounded(capacity: usize) -> Self {
        Self::new(capacity, u64::MAX)
    }

    /// Record one sample in cycles.
    pub fn record(&mut self, cycles: u64) {
        self.samples[self.write_pos] = cycles;
        self.write_pos = (self.write_pos + 1) % self.samples.len();
        self.sample_count = self.sample_count.saturating_add(1).min(self.samples.len());

        self.total += 1;
        self.min = self.min.min(cycles);
        self.max = self.max.max(cycles);
        self.sum += u128::from(cycles);

        if cycles > self.budget {
            self.over_budget += 1;
        }
    }

    /// Total samples recorded.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.total
    }

    /// Smallest sample.
    #[must_use]
    pub fn min(&self) -> Option<u64> {
        (self.total > 0).then_some(self.min)
    }

    /// Largest sample.
    #[must_use]
    pub fn max(&self) -> Option<u64> {
        (self.total > 0).then_some(self.max)
    }

    /// Mean sample, rounded down.
    #[must_use]
    pub fn mean(&self) -> Option<u64> {
        if self.total == 0 {
            return None;
        }
        u64::try_from(self.sum / u128::from(self.total)).ok()
    }

    /// Samples that exceeded the budget.
    #[must_use]
    pub fn over_budget(&self) -> u64 {
        self.over_budget
    }

    /// Compute a percentile over the retained samples.
    ///
    /// Returns `None` with no samples or a percentile outside 0.0..=100.0.
    #[must_use]
    pub fn percentile(&self, percentile: f64) -> Option<u64> {
        if self.sample_count == 0 || !(0.0..=100.0).contains(&percentile) {
            return None;
        }

        let mut sorted: Vec<u64> = self.samples[..self.sample_count].to_vec();
        sorted.sort_unstable();
        Some(sorted[Self::rank(percentile, sorted.len())])
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    fn rank(percentile: f64, len: usize) -> usize {
        let idx = ((percentile / 100.0) * (len - 1) as f64).round() as usize;
        idx.min(len - 1)
    }

    /// Immutable summary for reporting.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            count: self.total,
            min: self.min(),
            max: self.max(),
            mean: self.mean(),
            p99: self.percentile(99.0),
            over_budget: self.over_budget,
        }
    }
}

/// Serializable summary of a [`CycleStats`] collector, in cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Number of samples.
    pub count: u64,
    /// Minimum sample.
    pub min: Option<u64>,
    /// Maximum sample.
    pub max: Option<u64>,
    /// Mean sample.
    pub mean: Option<u64>,
    /// 99th percentile.
    pub p99: Option<u64>,
    /// Samples over budget.
    pub over_budget: u64,
}

impl StatsSnapshot {
    /// Jitter (max - min) in cycles.
    #[must_use]
    pub fn jitter(&self) -> Option<u64> {
        match (self.min, self.max) {
            (Some(min), Some(max)) => Some(max - min),
            _ => None,
        }
    }
}
