//! Cycle-count timestamps.
//!
//! Timestamps are raw cycle counter readings. They only ever increase within
//! a measurement session; wraparound is not handled.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// A reading of the monotonic cycle counter.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(pub u64);

impl Timestamp {
    /// The zero timestamp, also used for sample slots that were never written.
    pub const ZERO: Self = Self(0);

    /// Raw cycle count.
    #[must_use]
    pub const fn cycles(self) -> u64 {
        self.0
    }

    /// Cycles elapsed since `earlier`, or zero if `earlier` is later.
    #[must_use]
    pub const fn cycles_since(self, earlier: Self) -> u64 {
        self.0.saturating_sub(earlier.0)
    }

    /// Returns true for the never-written marker.
    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Conversion between cycle counts and wall-clock units at a fixed core frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleRate {
    hz: u64,
}

impl CycleRate {
    /// Create a rate for a core running at `hz` cycles per second.
    ///
    /// A zero frequency is clamped to 1 Hz.
    #[must_use]
    pub const fn new(hz: u64) -> Self {
        Self {
            hz: if hz == 0 { 1 } else { hz },
        }
    }

    /// Core frequency in Hz.
    #[must_use]
    pub const fn hz(self) -> u64 {
        self.hz
    }

    /// Cycles per microsecond, the calibration unit for busy-waits.
    ///
    /// Never returns zero.
    #[must_use]
    pub const fn cycles_per_micro(self) -> u64 {
        let per = self.hz / 1_000_000;
        if per == 0 {
            1
        } else {
            per
        }
    }

    /// Number of cycles in `duration`.
    #[must_use]
    pub fn cycles_in(self, duration: Duration) -> u64 {
        let cycles = duration.as_nanos() * u128::from(self.hz) / 1_000_000_000;
        u64::try_from(cycles).unwrap_or(u64::MAX)
    }

    /// Wall-clock duration of `cycles`.
    #[must_use]
    pub fn duration_of(self, cycles: u64) -> Duration {
        let nanos = u128::from(cycles) * 1_000_000_000 / u128::from(self.hz);
        Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }
}
