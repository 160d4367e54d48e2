//! Post-run analysis of drained samples.
//!
//! Works on an owned [`SampleSet`], never on the live store, so it can run
//! after the tasks have stopped or on samples loaded from elsewhere.

use crate::context::SampleSet;
use rms_common::metrics::{CycleStats, StatsSnapshot};
use rms_common::time::Timestamp;
use serde::Serialize;

/// A sample pattern that cannot come from a correct run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Violation {
    /// High end precedes High start.
    NegativeHighDuration {
        /// Sample index.
        index: usize,
    },
    /// Low segment end precedes its start.
    NegativeLowDuration {
        /// Sample index.
        index: usize,
    },
    /// High start is not later than the previous one.
    NonMonotonicHighStart {
        /// Sample index.
        index: usize,
    },
}

/// Summary statistics of one measurement, in cycles.
#[derive(Debug, Clone, Serialize)]
pub struct PreemptionAnalysis {
    /// Committed High samples.
    pub high_samples: usize,
    /// Committed Low segments.
    pub low_segments: usize,
    /// High Task execution windows; over budget means longer than one period.
    pub high_exec: StatsSnapshot,
    /// Low Task segment durations.
    pub low_segment: StatsSnapshot,
    /// High invocations during which a Low segment ended (preemptions detected).
    pub preemptions: usize,
    /// From a High start to the moment it saw the Low Task's signal.
    pub detection_latency: StatsSnapshot,
    /// From a detected suspension to the Low Task's resume.
    pub suspension: StatsSnapshot,
    /// Every broken sample invariant found.
    pub violations: Vec<Violation>,
}

impl PreemptionAnalysis {
    /// Analyze `samples` from a run with the given period.
    #[must_use]
    pub fn from_samples(samples: &SampleSet, period_cycles: u64) -> Self {
        let high_n = samples.high_start.len().min(samples.high_end.len());
        let low_n = samples.low_start.len().min(samples.low_end.len());
        let mut violations = Vec::new();

        let mut high_exec = CycleStats::new(high_n, period_cycles);
        for i in 0..high_n {
            let (start, end) = (samples.high_start[i], samples.high_end[i]);
            if end < start {
                violations.push(Violation::NegativeHighDuration { index: i });
            }
            high_exec.record(end.cycles_since(start));
            if i > 0 && start <= samples.high_start[i - 1] {
                violations.push(Violation::NonMonotonicHighStart { index: i });
            }
        }

        let high_starts = &samples.high_start[..high_n];
        let mut low_segment = CycleStats::unbounded(low_n);
        let mut detection_latency = CycleStats::unbounded(low_n);
        let mut suspension = CycleStats::unbounded(low_n);
        let mut preemptions = 0;

        for i in 0..low_n {
            let (start, end) = (samples.low_start[i], samples.low_end[i]);
            if end < start {
                violations.push(Violation::NegativeLowDuration { index: i });
            }
            low_segment.record(end.cycles_since(start));

            let Some(h) = containing_high(high_starts, &samples.high_end, end) else {
                continue;
            };
            preemptions += 1;
            detection_latency.record(end.cycles_since(samples.high_start[h]));
            if let Some(&resume) = samples.low_start.get(i + 1) {
                if !resume.is_zero() {
                    suspension.record(resume.cycles_since(end));
                }
            }
        }

        Self {
            high_samples: high_n,
            low_segments: low_n,
            high_exec: high_exec.snapshot(),
            low_segment: low_segment.snapshot(),
            preemptions,
            detection_latency: detection_latency.snapshot(),
            suspension: suspension.snapshot(),
            violations,
        }
    }

    /// True if no sample invariant was broken.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }
}

/// Index of the High invocation whose window strictly contains `ts`.
fn containing_high(starts: &[Timestamp], ends: &[Timestamp], ts: Timestamp) -> Option<usize> {
    let after = starts.partition_point(|s| *s < ts);
    let h = after.checked_sub(1)?;
    (ts < ends[h]).then_some(h)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(values: &[u64]) -> Vec<Timestamp> {
        values.iter().copied().map(Timestamp).collect()
    }

    #[test]
    fn test_clean_run_with_one_preemption() {
        // Period 100. High #3 catches Low at 205; Low resumes at 221.
        let samples = SampleSet {
            high_start: ts(&[1, 101, 201]),
            high_end: ts(&[20, 120, 220]),
            low_start: ts(&[130, 221]),
            low_end: ts(&[205, 240]),
        };

        let analysis = PreemptionAnalysis::from_samples(&samples, 100);

        assert!(analysis.is_clean());
        assert_eq!(analysis.high_samples, 3);
        assert_eq!(analysis.low_segments, 2);
        assert_eq!(analysis.preemptions, 1);
        assert_eq!(analysis.high_exec.max, Some(19));
        assert_eq!(analysis.high_exec.over_budget, 0);
        assert_eq!(analysis.detection_latency.min, Some(4));
        assert_eq!(analysis.suspension.min, Some(16));
        assert_eq!(analysis.low_segment.count, 2);
    }

    #[test]
    fn test_unpreempted_segment_is_not_counted() {
        let samples = SampleSet {
            high_start: ts(&[1, 101]),
            high_end: ts(&[20, 120]),
            low_start: ts(&[30]),
            low_end: ts(&[60]),
        };

        let analysis = PreemptionAnalysis::from_samples(&samples, 100);

        assert_eq!(analysis.preemptions, 0);
        assert_eq!(analysis.detection_latency.count, 0);
        assert_eq!(analysis.suspension.count, 0);
    }

    #[test]
    fn test_violations_are_reported() {
        let samples = SampleSet {
            high_start: ts(&[10, 50, 40]),
            high_end: ts(&[20, 45, 60]),
            low_start: ts(&[80]),
            low_end: ts(&[70]),
        };

        let analysis = PreemptionAnalysis::from_samples(&samples, 100);

        assert!(!analysis.is_clean());
        assert!(analysis.violations.contains(&Violation::NegativeHighDuration { index: 1 }));
        assert!(analysis.violations.contains(&Violation::NonMonotonicHighStart { index: 2 }));
        assert!(analysis.violations.contains(&Violation::NegativeLowDuration { index: 0 }));
    }

    #[test]
    fn test_overrun_counts_against_period_budget() {
        let samples = SampleSet {
            high_start: ts(&[1, 200]),
            high_end: ts(&[150, 220]),
            ..Default::default()
        };

        let analysis = PreemptionAnalysis::from_samples(&samples, 100);
        assert_eq!(analysis.high_exec.over_budget, 1);
    }

    #[test]
    fn test_serializes_to_json() {
        let analysis = PreemptionAnalysis::from_samples(&SampleSet::default(), 100);
        let json = serde_json::to_value(&analysis).unwrap();

        assert_eq!(json["high_samples"], 0);
        assert!(json["high_exec"]["min"].is_null());
        assert!(json["violations"].as_array().unwrap().is_empty());
    }
}
