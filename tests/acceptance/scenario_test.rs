//! Reference scenario acceptance tests.
//!
//! Period 200 µs, Low Task divisor 10, 3/33 busy units, 170 MHz core, 200-slot
//! arrays. One run fills the High array after 199 firings.
//!
//! # Acceptance Criteria
//!
//! - 19 Low invocations, each overlapped by a High firing
//! - Every detected suspension lies strictly inside the detecting High window
//! - 199 two-line quadruples drained after the header

use super::common::{
    assert_sample_invariants, containing_high, drain_to_string, parse_stream, run_simulated,
};
use rms_common::config::ProbeConfig;
use rms_probe::PreemptionAnalysis;

#[test]
fn test_reference_scenario_counts() {
    let config = ProbeConfig::default();
    assert_eq!(config.firings(), 199);

    let (ctx, sim) = run_simulated(&config, config.firings());

    assert_eq!(sim.firings, 199);
    assert_eq!(ctx.firings(), 199);
    assert!(ctx.high.is_full());
    assert_eq!(ctx.high.len(), 199);

    assert_eq!(sim.low_runs, 19);
    assert_eq!(ctx.low_invocations(), 19);
    assert_eq!(sim.preemptions, 19, "every Low invocation must be overlapped");
    assert_eq!(ctx.detections(), 19);
    // Two segments per invocation: before and after the preemption.
    assert_eq!(ctx.low.len(), 38);
}

#[test]
fn test_reference_scenario_invariants() {
    let config = ProbeConfig::default();
    let (ctx, _) = run_simulated(&config, config.firings());
    let samples = ctx.samples();

    assert_sample_invariants(&samples);

    // Even slots end on a detection, odd slots on the Low Task's own exit.
    for (i, end) in samples.low_end.iter().enumerate() {
        let high = containing_high(&samples, *end);
        if i % 2 == 0 {
            assert!(high.is_some(), "segment {i} ended outside any High window");
        } else {
            assert!(high.is_none(), "segment {i} ended inside a High window");
        }
    }

    let analysis = PreemptionAnalysis::from_samples(&samples, config.period_cycles());
    assert!(analysis.is_clean(), "{:?}", analysis.violations);
    assert_eq!(analysis.preemptions, 19);
    assert_eq!(analysis.high_exec.over_budget, 0);
    assert_eq!(analysis.suspension.count, 19);
}

#[test]
fn test_reference_scenario_stream() {
    let config = ProbeConfig::default();
    let (ctx, _) = run_simulated(&config, config.firings());

    let text = drain_to_string(&ctx);
    assert_eq!(text.lines().count(), 1 + 2 * 199);

    let quads = parse_stream(&text).unwrap();
    assert_eq!(quads.len(), 199);

    let samples = ctx.samples();
    for (i, quad) in quads.iter().enumerate() {
        assert_eq!(quad.high_start, samples.high_start[i].cycles());
        assert_eq!(quad.high_end, samples.high_end[i].cycles());
        assert!(quad.high_start > 0);
    }

    // Low columns carry the 38 written segments, then zeros.
    for (i, quad) in quads.iter().enumerate() {
        if i < 38 {
            assert!(quad.low_start > 0 && quad.low_end >= quad.low_start);
        } else {
            assert_eq!((quad.low_start, quad.low_end), (0, 0), "row {i}");
        }
    }
}

#[test]
fn test_repeated_runs_are_identical() {
    let config = ProbeConfig::default();
    let (a, _) = run_simulated(&config, config.firings());
    let (b, _) = run_simulated(&config, config.firings());

    assert_eq!(drain_to_string(&a), drain_to_string(&b));
}
