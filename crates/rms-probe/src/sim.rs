//! Deterministic single-core interrupt simulation.
//!
//! The simulated core keeps a virtual cycle counter and a current execution
//! priority. Time advances only through the task bodies themselves (clock
//! reads and busy-wait iterations) and through idle jumps to the next timer
//! deadline. Interrupts are taken at busy-wait boundaries and on return from
//! a handler, exactly where a Cortex-M core would take them:
//!
//! - the periodic timer raises its status flag whenever the clock crosses a
//!   deadline and is delivered to the High Task if the core is running below
//!   High priority;
//! - the Low Task's software request is delivered when the core is running
//!   below Low priority, and its pending bit is cleared on entry;
//! - a handler that returns tail-chains straight into any interrupt that
//!   became deliverable while it ran.
//!
//! Because every step is a function of the configuration, two runs with the
//! same parameters produce identical samples.

use crate::context::ProbeContext;
use crate::platform::Platform;
use crate::tasks::{high_task, low_task};
use rms_common::config::{ProbeConfig, SimulationConfig};
use rms_common::time::Timestamp;
use serde::Serialize;
use std::cell::Cell;

/// Execution priority of the simulated core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    /// Background (main loop / idle).
    Thread,
    /// Low Task handler.
    Low,
    /// High Task handler.
    High,
}

/// Ground-truth counters kept by the simulated core.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SimulationSummary {
    /// Timer deadlines crossed.
    pub firings: u64,
    /// High Task handler entries.
    pub high_runs: u64,
    /// Low Task handler entries.
    pub low_runs: u64,
    /// Times the High Task was entered while the Low Task was active.
    pub preemptions: u64,
    /// Virtual cycles elapsed since the core was created.
    pub elapsed_cycles: u64,
}

/// A single core that runs the probe tasks under fixed-priority preemption.
#[derive(Debug)]
pub struct SimulatedCore<'a> {
    ctx: &'a ProbeContext,
    cost: SimulationConfig,
    period_cycles: u64,
    origin: u64,
    clock: Cell<u64>,
    next_fire: Cell<u64>,
    fires_left: Cell<u64>,
    period_flag: Cell<bool>,
    low_pending: Cell<bool>,
    level: Cell<Priority>,
    summary: Cell<SimulationSummary>,
}

impl<'a> SimulatedCore<'a> {
    /// Create a core for `ctx` with the period and cost model from `config`.
    #[must_use]
    pub fn new(ctx: &'a ProbeContext, config: &ProbeConfig) -> Self {
        // Cycle counter starts at 1 so that no recorded timestamp is zero.
        let origin = 1;
        Self {
            ctx,
            cost: config.simulation.clone(),
            period_cycles: config.period_cycles().max(1),
            origin,
            clock: Cell::new(origin),
            next_fire: Cell::new(u64::MAX),
            fires_left: Cell::new(0),
            period_flag: Cell::new(false),
            low_pending: Cell::new(false),
            level: Cell::new(Priority::Thread),
            summary: Cell::new(SimulationSummary::default()),
        }
    }

    /// Arm the timer for `firings` periods and run until the core is idle
    /// after the last one.
    ///
    /// May be called again to continue the same session.
    pub fn run(&self, firings: u64) -> SimulationSummary {
        self.fires_left.set(firings);
        self.next_fire.set(self.clock.get() + self.period_cycles);

        while self.fires_left.get() > 0 {
            // Idle (wait-for-interrupt) until the next deadline.
            let next = self.next_fire.get();
            if self.clock.get() < next {
                self.clock.set(next);
            }
            self.service();
        }

        self.next_fire.set(u64::MAX);
        self.summary()
    }

    /// Counters accumulated since the core was created.
    #[must_use]
    pub fn summary(&self) -> SimulationSummary {
        let mut summary = self.summary.get();
        summary.elapsed_cycles = self.clock.get() - self.origin;
        summary
    }

    /// Current virtual cycle count.
    #[must_use]
    pub fn cycles(&self) -> u64 {
        self.clock.get()
    }

    /// Priority the core is currently executing at.
    #[must_use]
    pub fn level(&self) -> Priority {
        self.level.get()
    }

    fn advance(&self, cycles: u64) {
        self.clock.set(self.clock.get() + cycles);
    }

    fn update_summary(&self, f: impl FnOnce(&mut SimulationSummary)) {
        let mut summary = self.summary.get();
        f(&mut summary);
        self.summary.set(summary);
    }

    /// Raise the timer flag for every deadline the clock has crossed.
    ///
    /// Deadlines missed while the flag is still set collapse into one event,
    /// as they would on a single status bit.
    fn raise_due_events(&self) {
        while self.fires_left.get() > 0 && self.clock.get() >= self.next_fire.get() {
            self.period_flag.set(true);
            self.next_fire.set(self.next_fire.get() + self.period_cycles);
            self.fires_left.set(self.fires_left.get() - 1);
            self.update_summary(|s| s.firings += 1);
        }
    }

    /// Take every interrupt deliverable at the current priority.
    fn service(&self) {
        loop {
            self.raise_due_events();
            let level = self.level.get();

            if self.period_flag.get() && level < Priority::High {
                if level == Priority::Low {
                    self.update_summary(|s| s.preemptions += 1);
                }
                self.update_summary(|s| s.high_runs += 1);
                self.dispatch(Priority::High, || high_task(self.ctx, self));
                continue;
            }

            if self.low_pending.get() && level < Priority::Low {
                // Pending bit is cleared by exception entry.
                self.low_pending.set(false);
                self.update_summary(|s| s.low_runs += 1);
                self.dispatch(Priority::Low, || low_task(self.ctx, self));
                continue;
            }

            break;
        }
    }

    fn dispatch(&self, priority: Priority, handler: impl FnOnce()) {
        let preempted = self.level.replace(priority);
        self.advance(self.cost.isr_entry_cycles);
        handler();
        self.level.set(preempted);
    }
}

impl Platform for SimulatedCore<'_> {
    fn now(&self) -> Timestamp {
        let ts = Timestamp(self.clock.get());
        self.advance(self.cost.clock_read_cycles);
        ts
    }

    fn spin(&self) {
        self.advance(self.cost.spin_iteration_cycles.max(1));
        self.service();
    }

    fn pend_low(&self) {
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
