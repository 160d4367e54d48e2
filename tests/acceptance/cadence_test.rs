//! Low Task cadence acceptance tests.
//!
//! With a divisor of N the Low Task must run exactly once per N firings, and on
//! the simulated core its invocations start exactly N periods apart.

use super::common::{assert_sample_invariants, run_simulated};
use rms_common::config::ProbeConfig;

const FIRINGS: u64 = 120;

fn cadence_config(divisor: u32) -> ProbeConfig {
    ProbeConfig {
        low_task_divisor: divisor,
        high_capacity: 256,
        low_capacity: 256,
        ..Default::default()
    }
}

#[test]
fn test_one_invocation_per_divisor_firings() {
    for divisor in [2, 3, 4, 7, 10, 25] {
        let config = cadence_config(divisor);
        let (ctx, sim) = run_simulated(&config, FIRINGS);

        let expected = FIRINGS / u64::from(divisor);
        assert_eq!(sim.low_runs, expected, "divisor {divisor}");
        assert_eq!(ctx.low_invocations(), expected, "divisor {divisor}");
        assert_sample_invariants(&ctx.samples());
    }
}

#[test]
fn test_invocations_start_divisor_periods_apart() {
    for divisor in [2, 4, 10] {
        let config = cadence_config(divisor);
        let (ctx, _) = run_simulated(&config, FIRINGS);
        let samples = ctx.samples();

        // Every invocation but the last is preempted once, so its first
        // segment sits in an even slot.
        let invocations = usize::try_from(ctx.low_invocations()).unwrap();
        let first_starts: Vec<_> = (0..invocations - 1).map(|k| samples.low_start[2 * k]).collect();

        let expected = u64::from(divisor) * config.period_cycles();
        for pair in first_starts.windows(2) {
            assert_eq!(pair[1].cycles_since(pair[0]), expected, "divisor {divisor}");
        }
    }
}

#[test]
fn test_period_counter_resets_on_trigger() {
    let config = cadence_config(10);
    let (ctx, _) = run_simulated(&config, 105);

    assert_eq!(ctx.low_invocations(), 10);
    assert_eq!(ctx.period_counter(), 5);
}
