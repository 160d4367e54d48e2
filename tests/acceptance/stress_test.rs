//! Boundedness acceptance tests.
//!
//! Runs the probe far past the capacity of both sample arrays and checks
//! that nothing committed is overwritten and the saturation slot stays
//! untouched.

use super::common::{assert_sample_invariants, drain_to_string, parse_stream};
use rms_common::config::ProbeConfig;
use rms_common::time::Timestamp;
use rms_probe::{ProbeContext, SimulatedCore};

fn small_config() -> ProbeConfig {
    ProbeConfig {
        low_task_divisor: 3,
        high_capacity: 16,
        low_capacity: 16,
        ..Default::default()
    }
}

#[test]
fn test_committed_samples_survive_long_run() {
    let config = small_config();
    let ctx = ProbeContext::from_config(&config);
    let core = SimulatedCore::new(&ctx, &config);

    core.run(100);
    assert!(ctx.high.is_full());
    assert!(ctx.low.is_full());
    let before = ctx.samples();

    let summary = core.run(10_000);

    assert_eq!(summary.firings, 10_100);
    assert_eq!(ctx.firings(), 10_100);
    assert_eq!(ctx.samples(), before, "committed samples were overwritten");
    assert_eq!(ctx.high.len(), 15);
    assert_eq!(ctx.low.len(), 15);
    assert_sample_invariants(&before);
}

#[test]
fn test_saturation_slot_is_never_written() {
    let config = small_config();
    let ctx = ProbeContext::from_config(&config);
    SimulatedCore::new(&ctx, &config).run(5_000);

    let last = ctx.high.capacity() - 1;
    assert_eq!(ctx.high.start(last), Timestamp::ZERO);
    assert_eq!(ctx.high.end(last), Timestamp::ZERO);
    assert_eq!(ctx.low.start(last), Timestamp::ZERO);
    assert_eq!(ctx.low.end(last), Timestamp::ZERO);
}

#[test]
fn test_counters_keep_running_after_saturation() {
    let config = small_config();
    let ctx = ProbeContext::from_config(&config);
    let summary = SimulatedCore::new(&ctx, &config).run(3_000);

    // Sample storage stops at capacity; invocation counting does not.
    assert_eq!(summary.low_runs, 1_000);
    assert_eq!(ctx.low_invocations(), 1_000);
    assert!(ctx.period_counter() < ctx.divisor());
}

#[test]
fn test_drain_after_saturation_emits_capacity_minus_one() {
    let config = small_config();
    let ctx = ProbeContext::from_config(&config);
    SimulatedCore::new(&ctx, &config).run(1_000);

    let quads = parse_stream(&drain_to_string(&ctx)).unwrap();
    assert_eq!(quads.len(), 15);
    assert!(quads.iter().all(|q| q.low_start > 0));
}
