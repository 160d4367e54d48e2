//! Host cycle counter.
//!
//! Reads the monotonic clock and scales it to cycles of the configured core
//! frequency, so host and simulated timestamps share one unit.

use rms_common::time::{CycleRate, Timestamp};
use std::time::Instant;

/// Monotonic cycle counter backed by the host's monotonic clock.
#[derive(Debug, Clone, Copy)]
pub struct HostClock {
    origin: Instant,
    rate: CycleRate,
}

impl HostClock {
    /// Start a counter at the current instant.
    #[must_use]
    pub fn new(rate: CycleRate) -> Self {
        Self {
            origin: Instant::now(),
            rate,
        }
    }

    /// Cycles since the counter started, offset by one so no reading is zero.
    #[inline]
    #[must_use]
    pub fn now(&self) -> Timestamp {
        Timestamp(self.rate.cycles_in(self.origin.elapsed()) + 1)
    }

    /// Conversion rate of this counter.
    #[must_use]
    pub fn rate(&self) -> CycleRate {
        self.rate
    }
}
