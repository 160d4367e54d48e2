//! The two measured tasks and the period bookkeeping that drives them.
//!
//! Both bodies are written as interrupt handlers: no allocation, no logging,
//! no locks, no error paths. Their only side effects are timestamp writes
//! into the [`ProbeContext`] and calls into the [`Platform`].
//!
//! The High Task runs once per timer firing. Every `divisor`-th firing it
//! pends the Low Task, which runs once the High Task returns and busy-waits
//! long enough to be interrupted by a later firing. The two sides find out
//! about that interruption through the preemption signal:
//!
//! 1. Low raises the signal on entry.
//! 2. High, finding it raised during its own busy-wait, timestamps the
//!    suspension into the Low end array, lowers the signal, and commits the
//!    Low slot.
//! 3. Low, finding the signal lowered after it resumes, timestamps the
//!    resume point into the (now fresh) Low start slot and raises it again.
//!    The same check runs once more on exit, so a preemption during the last
//!    spin still leaves a start in the slot the exit timestamp closes.

use crate::context::ProbeContext;
use crate::platform::Platform;

/// Period Generator bookkeeping, run first in every High Task invocation.
///
/// Counts the firing, pends the Low Task on every `divisor`-th one, and
/// acknowledges the timer flag.
#[inline]
pub fn period_tick<P: Platform + ?Sized>(ctx: &ProbeContext, platform: &P) {
    if ctx.tick_period() {
        platform.pend_low();
    }
    if platform.period_pending() {
        platform.acknowledge_period();
    }
}

/// High-priority task body.
pub fn high_task<P: Platform + ?Sized>(ctx: &ProbeContext, platform: &P) {
    period_tick(ctx, platform);

    ctx.high.record_start(platform.now());

    let mut remaining = ctx.high_spins();
    while remaining > 0 {
        // The Low Task was caught mid-window by this invocation.
        if ctx.signal.is_raised() {
            ctx.low.record_end(platform.now());
            ctx.signal.clear();
            ctx.low.advance();
            ctx.note_detection();
        }
        remaining -= 1;
        platform.spin();
    }

    ctx.high.record_end(platform.now());
    ctx.high.advance();
}

/// Low-priority, software-triggered task body.
pub fn low_task<P: Platform + ?Sized>(ctx: &ProbeContext, platform: &P) {
    ctx.low.record_start(platform.now());
    ctx.signal.raise();
    ctx.note_low_invocation();

    let mut remaining = ctx.low_spins();
    while remaining > 0 {
        // Lowered by the High Task: we were preempted and have just resumed.
        if !ctx.signal.is_raised() {
            ctx.low.record_start(platform.now());
            ctx.signal.raise();
        }
        remaining -= 1;
        platform.spin();
    }

    // Preempted during the last spin: the High Task already committed the
    // previous slot, so this final stretch needs its own start.
    if !ctx.signal.take() {
        ctx.low.record_start(platform.now());
    }
    ctx.low.record_end(platform.now());
    ctx.low.advance();

    platform.unpend_low();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ProbeContextBuilder;
    use rms_common::time::Timestamp;
    use std::cell::Cell;

    /// Platform with a clock that ticks once per call and no interrupts.
    #[derive(Default)]
    struct StepPlatform {
        clock: Cell<u64>,
        spins: Cell<u64>,
        pends: Cell<u32>,
        low_pending: Cell<bool>,
        period_flag: Cell<bool>,
    }

    impl Platform for StepPlatform {
        fn now(&self) -> Timestamp {
            self.clock.set(self.clock.get() + 1);
            Timestamp(self.clock.get())
        }

        fn spin(&self) {
            self.spins.set(self.spins.get() + 1);
        }

        fn pend_low(&self) {
            self.pends.set(self.pends.get() + 1);
            self.low_pending.set(true);
        }

        fn unpend_low(&self) {
            self.low_pending.set(false);
        }

        fn period_pending(&self) -> bool {
            self.period_flag.get()
        }

        fn acknowledge_period(&self) {
            self.period_flag.set(false);
        }
    }

    fn small_context() -> ProbeContext {
        ProbeContextBuilder::new()
            .high_capacity(8)
            .low_capacity(8)
            .low_task_divisor(2)
            .high_spins(5)
            .low_spins(7)
            .build()
    }

    #[test]
    fn test_high_task_records_bracketing_pair() {
        let ctx = small_context();
        let platform = StepPlatform::default();
        platform.period_flag.set(true);

        high_task(&ctx, &platform);

        assert_eq!(ctx.high.len(), 1);
        assert!(ctx.high.start(0) < ctx.high.end(0));
        assert_eq!(platform.spins.get(), 5);
        assert!(!platform.period_flag.get(), "timer flag must be acknowledged");
        assert_eq!(ctx.detections(), 0);
    }

    #[test]
    fn test_high_task_pends_low_on_divisor() {
        let ctx = small_context();
        let platform = StepPlatform::default();

        high_task(&ctx, &platform);
        assert_eq!(platform.pends.get(), 0);
        high_task(&ctx, &platform);
        assert_eq!(platform.pends.get(), 1);
        assert!(platform.low_pending.get());
    }

    #[test]
    fn test_low_task_without_preemption() {
        let ctx = small_context();
        let platform = StepPlatform::default();
        platform.low_pending.set(true);

        low_task(&ctx, &platform);

        assert_eq!(ctx.low.len(), 1);
        assert!(ctx.low.start(0) < ctx.low.end(0));
        assert!(!ctx.signal.is_raised());
        assert!(!platform.low_pending.get());
        assert_eq!(ctx.low_invocations(), 1);
    }

    #[test]
    fn test_high_task_detects_raised_signal() {
        let ctx = small_context();
        let platform = StepPlatform::default();

        // Low Task was interrupted right after raising the signal.
        ctx.low.record_start(platform.now());
        ctx.signal.raise();

        high_task(&ctx, &platform);

        assert!(!ctx.signal.is_raised());
        assert_eq!(ctx.low.len(), 1);
        assert_eq!(ctx.detections(), 1);
        let detected = ctx.low.end(0);
        assert!(ctx.high.start(0) < detected && detected < ctx.high.end(0));
    }
}
