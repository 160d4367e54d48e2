//! Configuration structures for the preemption probe.
//!
//! Every field has a default matching the reference measurement setup
//! (200 µs period, Low Task every 10th firing, 3/33 µs busy-waits, 200-slot
//! sample arrays), so an empty TOML document is a valid configuration.

use crate::time::CycleRate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Default period of the High Task's timer.
pub const DEFAULT_PERIOD: Duration = Duration::from_micros(200);
/// Default Low Task trigger divisor.
pub const DEFAULT_LOW_TASK_DIVISOR: u32 = 10;
/// Default core clock (STM32G4 at full speed).
pub const DEFAULT_CORE_CLOCK_HZ: u64 = 170_000_000;
/// Default High Task busy-wait in microseconds of spin count.
pub const DEFAULT_HIGH_BUSY_UNITS: u32 = 3;
/// Default Low Task busy-wait in microseconds of spin count.
pub const DEFAULT_LOW_BUSY_UNITS: u32 = 33;
/// Default capacity of each High Task sample array.
pub const DEFAULT_HIGH_CAPACITY: usize = 200;
/// Default capacity of each Low Task sample array.
pub const DEFAULT_LOW_CAPACITY: usize = 200;

/// Top-level probe configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Interval between Period Generator firings.
    #[serde(with = "humantime_serde")]
    pub period: Duration,

    /// Low Task is pended on every Nth firing.
    pub low_task_divisor: u32,

    /// Core clock frequency used to calibrate busy-waits and convert timestamps.
    pub core_clock_hz: u64,

    /// High Task busy-wait length, in microseconds worth of spin iterations.
    pub high_busy_units: u32,

    /// Low Task busy-wait length, in microseconds worth of spin iterations.
    pub low_busy_units: u32,

    /// Capacity of the High Task start/end arrays.
    pub high_capacity: usize,

    /// Capacity of the Low Task start/end arrays.
    pub low_capacity: usize,

    /// Settle time before the platform is armed.
    #[serde(with = "humantime_serde")]
    pub startup_delay: Duration,

    /// Cadence at which the reporter drains one sample.
    #[serde(with = "humantime_serde")]
    pub report_interval: Duration,

    /// Number of firings to run (0 = until the High Task array is full).
    pub max_firings: u64,

    /// Which platform drives the tasks.
    pub platform: PlatformKind,

    /// Simulated core parameters.
    pub simulation: SimulationConfig,

    /// Host real-time scheduling parameters.
    pub realtime: RealtimeConfig,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            period: DEFAULT_PERIOD,
            low_task_divisor: DEFAULT_LOW_TASK_DIVISOR,
            core_clock_hz: DEFAULT_CORE_CLOCK_HZ,
            high_busy_units: DEFAULT_HIGH_BUSY_UNITS,
            low_busy_units: DEFAULT_LOW_BUSY_UNITS,
            high_capacity: DEFAULT_HIGH_CAPACITY,
            low_capacity: DEFAULT_LOW_CAPACITY,
            startup_delay: Duration::from_millis(100),
            report_interval: Duration::from_millis(100),
            max_firings: 0,
            platform: PlatformKind::default(),
            simulation: SimulationConfig::default(),
            realtime: RealtimeConfig::default(),
        }
    }
}

/// Platform that delivers the timer and software interrupts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PlatformKind {
    /// Deterministic single-core interrupt simulation.
    #[default]
    Simulated,
    /// Fixed-priority threads pinned to one host CPU.
    Host,
}

impl fmt::Display for PlatformKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Simulated => write!(f, "simulated"),
            Self::Host => write!(f, "host"),
        }
    }
}

/// Cost model of the simulated core, in cycles.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Cycles consumed by one busy-wait iteration (flag check, decrement, nop, branch).
    pub spin_iteration_cycles: u64,

    /// Cycles consumed by one cycle counter read.
    pub clock_read_cycles: u64,

    /// Exception entry latency charged when an interrupt handler is dispatched.
    pub isr_entry_cycles: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            spin_iteration_cycles: 8,
            clock_read_cycles: 1,
            isr_entry_cycles: 12,
        }
    }
}

/// Real-time scheduling configuration for the host platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    /// Enable real-time scheduling (requires privileges).
    pub enabled: bool,

    /// Scheduler policy for both task threads.
    pub policy: SchedPolicy,

    /// Priority of the High Task thread (1-99).
    pub high_priority: u8,

    /// Priority of the Low Task thread (1-99, below `high_priority`).
    pub low_priority: u8,

    /// CPU both task threads are pinned to. `None` leaves placement to the OS,
    /// which breaks the single-core assumption.
    pub cpu: Option<usize>,

    /// Lock all memory pages (mlockall).
    pub lock_memory: bool,

    /// Fail at startup if RT requirements cannot be met instead of degrading.
    pub fail_fast: bool,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            policy: SchedPolicy::Fifo,
            high_priority: 90,
            low_priority: 80,
            cpu: Some(0),
            lock_memory: true,
            fail_fast: false,
        }
    }
}

/// Scheduler policy for real-time threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SchedPolicy {
    /// SCHED_FIFO: First-in-first-out real-time.
    #[default]
    Fifo,
    /// SCHED_RR: Round-robin real-time.
    Rr,
}

/// A timing assumption the configuration is likely to violate.
///
/// These degrade measurement fidelity but are not errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimingWarning {
    /// The High Task's busy-wait does not fit inside one period.
    HighWindowExceedsPeriod {
        /// Estimated High Task window in cycles.
        window_cycles: u64,
        /// Period in cycles.
        period_cycles: u64,
    },
    /// The Low Task's busy-wait ends before the next firing can overlap it.
    LowWindowTooShort {
        /// Estimated Low Task window in cycles.
        window_cycles: u64,
        /// Cycles between the end of a High invocation and the next firing.
        gap_cycles: u64,
    },
}

impl fmt::Display for TimingWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HighWindowExceedsPeriod {
                window_cycles,
                period_cycles,
            } => write!(
                f,
                "high task window ({window_cycles} cycles) does not fit in the period \
                 ({period_cycles} cycles)"
            ),
            Self::LowWindowTooShort {
                window_cycles,
                gap_cycles,
            } => write!(
                f,
                "low task window ({window_cycles} cycles) is shorter than the gap to the next \
                 firing ({gap_cycles} cycles); preemption may never be observed"
            ),
        }
    }
}

impl ProbeConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(ConfigError::Parse)
    }

    /// Serialize configuration to TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Core clock as a conversion rate.
    #[must_use]
    pub fn cycle_rate(&self) -> CycleRate {
        CycleRate::new(self.core_clock_hz)
    }

    /// Period length in core cycles.
    #[must_use]
    pub fn period_cycles(&self) -> u64 {
        self.cycle_rate().cycles_in(self.period)
    }

    /// Spin iterations of the High Task's busy-wait.
    #[must_use]
    pub fn high_spin_count(&self) -> u64 {
        self.cycle_rate().cycles_per_micro() * u64::from(self.high_busy_units)
    }

    /// Spin iterations of the Low Task's busy-wait.
    #[must_use]
    pub fn low_spin_count(&self) -> u64 {
        self.cycle_rate().cycles_per_micro() * u64::from(self.low_busy_units)
    }

    /// Number of High Task firings a run performs.
    ///
    /// With `max_firings = 0` this is the number needed to fill the High array.
    #[must_use]
    pub fn firings(&self) -> u64 {
        if self.max_firings == 0 {
            self.high_capacity.saturating_sub(1) as u64
        } else {
            self.max_firings
        }
    }

    /// Reject impossible values and report timing assumptions at risk.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for values the harness cannot run with.
    pub fn validate(&self) -> Result<Vec<TimingWarning>, ConfigError> {
        if self.period.is_zero() {
            return Err(ConfigError::Invalid("period must be non-zero".into()));
        }
        if self.low_task_divisor == 0 {
            return Err(ConfigError::Invalid(
                "low_task_divisor must be at least 1".into(),
            ));
        }
        if self.core_clock_hz < 1_000_000 {
            return Err(ConfigError::Invalid(format!(
                "core_clock_hz must be at least 1 MHz, got {}",
                self.core_clock_hz
            )));
        }
        if self.high_capacity < 2 || self.low_capacity < 2 {
            return Err(ConfigError::Invalid(format!(
                "sample capacities must be at least 2 (high={}, low={})",
                self.high_capacity, self.low_capacity
            )));
        }
        if self.realtime.low_priority >= self.realtime.high_priority {
            return Err(ConfigError::Invalid(format!(
                "realtime.low_priority ({}) must be below realtime.high_priority ({})",
                self.realtime.low_priority, self.realtime.high_priority
            )));
        }

        let cost = match self.platform {
            PlatformKind::Simulated => self.simulation.spin_iteration_cycles.max(1),
            PlatformKind::Host => 1,
        };
        let period_cycles = self.period_cycles();
        let high_window = self.high_spin_count() * cost;
        let low_window = self.low_spin_count() * cost;

        let mut warnings = Vec::new();
        if high_window >= period_cycles {
            warnings.push(TimingWarning::HighWindowExceedsPeriod {
                window_cycles: high_window,
                period_cycles,
            });
        }
        let gap_cycles = period_cycles.saturating_sub(high_window);
        if low_window <= gap_cycles {
            warnings.push(TimingWarning::LowWindowTooShort {
                window_cycles: low_window,
                gap_cycles,
            });
        }
        Ok(warnings)
    }
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File I/O error.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// TOML parsing error.
    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("failed to serialize TOML: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Value out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Serde helper module for `Duration` using humantime format.
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
