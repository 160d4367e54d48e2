//! Host harness: the two tasks as fixed-priority threads.
//!
//! The High Task runs on a thread that sleeps to absolute deadlines one
//! period apart and raises the timer flag before each invocation. The Low
//! Task runs on a second thread that executes whenever its software request
//! is pending. With real-time scheduling enabled and both threads pinned to
//! one CPU, the kernel gives the same preemption behaviour as two interrupt
//! priorities on a single core; without it the numbers are still produced
//! but the threads may run in parallel.

use crate::clock::HostClock;
use crate::context::ProbeContext;
use crate::platform::Platform;
use crate::realtime::{configure_current_thread, ThreadRealtime};
use crate::tasks::{high_task, low_task};
use crossbeam_utils::CachePadded;
use rms_common::config::{ProbeConfig, RealtimeConfig};
use rms_common::error::{ProbeError, ProbeResult};
use rms_common::time::Timestamp;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::OnceLock;
use std::thread::{self, Thread};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Longest the Low Task thread sleeps between checks of its request line.
const LOW_IDLE_POLL: Duration = Duration::from_millis(1);

/// [`Platform`] shared by the two host task threads.
#[derive(Debug)]
pub struct HostPlatform {
    clock: HostClock,
    low_pending: CachePadded<AtomicBool>,
    period_flag: CachePadded<AtomicBool>,
    low_thread: OnceLock<Thread>,
}

impl HostPlatform {
    /// Create a platform whose clock starts now.
    #[must_use]
    pub fn new(clock: HostClock) -> Self {
        Self {
            clock,
            low_pending: CachePadded::new(AtomicBool::new(false)),
            period_flag: CachePadded::new(AtomicBool::new(false)),
            low_thread: OnceLock::new(),
        }
    }

    /// The cycle counter.
    #[must_use]
    pub fn clock(&self) -> &HostClock {
        &self.clock
    }

    /// Set the timer flag, as the timer hardware would on a firing.
    pub fn raise_period(&self) {
        self.period_flag.store(true, Ordering::Relaxed);
    }

    /// Take the Low Task request, clearing it the way exception entry does.
    pub fn take_low_request(&self) -> bool {
        self.low_pending.swap(false, Ordering::Relaxed)
    }

    /// True if a Low Task request is outstanding.
    #[must_use]
    pub fn low_requested(&self) -> bool {
        self.low_pending.load(Ordering::Relaxed)
    }

    fn register_low_thread(&self) {
        // Only the first registration counts.
        let _ = self.low_thread.set(thread::current());
    }
}

impl Platform for HostPlatform {
    #[inline]
    fn now(&self) -> Timestamp {
        self.clock.now()
    }

    #[inline]
    fn spin(&self) {
        std::hint::spin_loop();
    }

    fn pend_low(&self) {
        self.low_pending.store(true, Ordering::Relaxed);
        if let Some(low) = self.low_thread.get() {
            low.unpark();
        }
    }

    fn unpend_low(&self) {
        self.low_pending.store(false, Ordering::Relaxed);
    }

    fn period_pending(&self) -> bool {
        self.period_flag.load(Ordering::Relaxed)
    }

    fn acknowledge_period(&self) {
        self.period_flag.store(false, Ordering::Relaxed);
    }
}

/// Outcome of a host run.
#[derive(Debug, Clone, Serialize)]
pub struct HostRunSummary {
    /// Timer firings delivered to the High Task.
    pub firings: u64,
    /// Firings whose deadline had already passed when the timer thread got to it.
    pub late_firings: u64,
    /// Low Task invocations started.
    pub low_runs: u64,
    /// Whether the run ended on a stop request rather than the firing count.
    pub stopped: bool,
    /// Scheduling applied to the High Task thread.
    pub high_thread: ThreadRealtime,
    /// Scheduling applied to the Low Task thread.
    pub low_thread: ThreadRealtime,
    /// Wall time of the run.
    pub elapsed: Duration,
}

/// Runs a [`ProbeContext`] on two host threads.
#[derive(Debug)]
pub struct HostHarness<'a> {
    ctx: &'a ProbeContext,
    platform: HostPlatform,
    period: Duration,
    realtime: RealtimeConfig,
}

impl<'a> HostHarness<'a> {
    /// Create a harness for `ctx` using the period and real-time settings of `config`.
    #[must_use]
    pub fn new(ctx: &'a ProbeContext, config: &ProbeConfig) -> Self {
        Self {
            ctx,
            platform: HostPlatform::new(HostClock::new(config.cycle_rate())),
            period: config.period,
            realtime: config.realtime.clone(),
        }
    }

    /// The platform the tasks run against.
    #[must_use]
    pub fn platform(&self) -> &HostPlatform {
        &self.platform
    }

    /// Run `firings` periods, or until `stop` returns true.
    ///
    /// # Errors
    ///
    /// Returns an error if a task thread cannot be spawned, fails its
    /// real-time setup, or panics.
    pub fn run(
        &self,
        firings: u64,
        stop: &(dyn Fn() -> bool + Sync),
    ) -> ProbeResult<HostRunSummary> {
        self.run_observed(firings, stop, Duration::from_millis(100), |_| {})
    }

    /// Like [`run`](Self::run), calling `observe` on the calling thread every
    /// `interval` while the tasks are running.
    ///
    /// # Errors
    ///
    /// See [`run`](Self::run).
    pub fn run_observed<F>(
        &self,
        firings: u64,
        stop: &(dyn Fn() -> bool + Sync),
        interval: Duration,
        mut observe: F,
    ) -> ProbeResult<HostRunSummary>
    where
        F: FnMut(&ProbeContext),
    {
        let finished = AtomicBool::new(false);
        let delivered = AtomicU64::new(0);
        let late = AtomicU64::new(0);
        let started = Instant::now();

        info!(
            firings,
            period_us = self.period.as_micros() as u64,
            realtime = self.realtime.enabled,
            "Starting host harness"
        );

        let (high_thread, low_thread, stopped) = thread::scope(|s| -> ProbeResult<_> {
            let low = thread::Builder::new()
                .name("rms-low".into())
                .spawn_scoped(s, || self.low_loop(&finished))
                .map_err(|e| {
                    ProbeError::Platform(format!("Failed to spawn low task thread: {e}"))
                })?;

            let high = match thread::Builder::new()
                .name("rms-high".into())
                .spawn_scoped(s, || self.high_loop(firings, stop, &finished, &delivered, &late))
            {
                Ok(handle) => handle,
                Err(e) => {
                    finished.store(true, Ordering::Release);
                    self.wake_low();
                    return Err(ProbeError::Platform(format!(
                        "Failed to spawn high task thread: {e}"
                    )));
                }
            };

            while !finished.load(Ordering::Acquire) {
                observe(self.ctx);
                thread::sleep(interval);
            }

            let high = join_task(high, "high")?;
            let low = join_task(low, "low")?;
            Ok((high.0, low, high.1))
        })?;

        let summary = HostRunSummary {
            firings: delivered.load(Ordering::Relaxed),
            late_firings: late.load(Ordering::Relaxed),
            low_runs: self.ctx.low_invocations(),
            stopped,
            high_thread,
            low_thread,
            elapsed: started.elapsed(),
        };

        if summary.late_firings > 0 {
            warn!(late = summary.late_firings, "Timer deadlines were missed");
        }
        info!(
            firings = summary.firings,
            low_runs = summary.low_runs,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "Host harness finished"
        );
        Ok(summary)
    }

    /// Timer and High Task thread body. Returns its scheduling and whether it was stopped.
    fn high_loop(
        &self,
        firings: u64,
        stop: &(dyn Fn() -> bool + Sync),
        finished: &AtomicBool,
        delivered: &AtomicU64,
        late: &AtomicU64,
    ) -> ProbeResult<(ThreadRealtime, bool)> {
        let applied = configure_current_thread(&self.realtime, self.realtime.high_priority);
        let applied = match applied {
            Ok(applied) => applied,
            Err(e) => {
                finished.store(true, Ordering::Release);
                self.wake_low();
                return Err(e);
            }
        };
        debug!(?applied, "High task thread ready");

        let mut timer = PeriodTimer::start(self.period);
        let mut stopped = false;
        for _ in 0..firings {
            if stop() {
                stopped = true;
                break;
            }
            if timer.wait() {
                late.fetch_add(1, Ordering::Relaxed);
            }
            self.platform.raise_period();
            high_task(self.ctx, &self.platform);
            delivered.fetch_add(1, Ordering::Relaxed);
        }

        finished.store(true, Ordering::Release);
        self.wake_low();
        Ok((applied, stopped))
    }

    /// Low Task thread body.
    fn low_loop(&self, finished: &AtomicBool) -> ProbeResult<ThreadRealtime> {
        let applied = configure_current_thread(&self.realtime, self.realtime.low_priority)?;
        debug!(?applied, "Low task thread ready");
        self.platform.register_low_thread();

        loop {
            if self.platform.take_low_request() {
                low_task(self.ctx, &self.platform);
                continue;
            }
            if finished.load(Ordering::Acquire) {
                // A request made by the last firing is visible once `finished` is.
                if self.platform.take_low_request() {
                    low_task(self.ctx, &self.platform);
                }
                break;
            }
            thread::park_timeout(LOW_IDLE_POLL);
        }
        Ok(applied)
    }

    fn wake_low(&self) {
        if let Some(low) = self.platform.low_thread.get() {
            low.unpark();
        }
    }
}

fn join_task<T>(
    handle: thread::ScopedJoinHandle<'_, ProbeResult<T>>,
    name: &str,
) -> ProbeResult<T> {
    handle
        .join()
        .map_err(|_| ProbeError::Platform(format!("{name} task thread panicked")))?
}

/// Absolute-deadline periodic timer.
#[cfg(target_os = "linux")]
struct PeriodTimer {
    next: libc::timespec,
    period_ns: i64,
}

#[cfg(target_os = "linux")]
impl PeriodTimer {
    const NANOS_PER_SEC: i64 = 1_000_000_000;

    fn start(period: Duration) -> Self {
        let period_ns = i64::try_from(period.as_nanos()).unwrap_or(i64::MAX).max(1);
        let mut timer = Self {
            next: monotonic_now(),
            period_ns,
        };
        timer.arm_next();
        timer
    }

    /// Sleep until the current deadline and arm the next one.
    ///
    /// Returns true if the deadline had already passed.
    fn wait(&mut self) -> bool {
        let now = monotonic_now();
        let late = (now.tv_sec, now.tv_nsec) > (self.next.tv_sec, self.next.tv_nsec);

        loop {
            // SAFETY: `self.next` is a valid timespec and the remainder pointer
            // may be null with TIMER_ABSTIME.
            let rc = unsafe {
                libc::clock_nanosleep(
                    libc::CLOCK_MONOTONIC,
                    libc::TIMER_ABSTIME,
                    &self.next,
                    std::ptr::null_mut(),
                )
            };
            if rc != libc::EINTR {
                break;
            }
        }

        self.arm_next();
        late
    }

    fn arm_next(&mut self) {
        let total = i64::from(self.next.tv_nsec) + self.period_ns;
        self.next.tv_sec += (total / Self::NANOS_PER_SEC) as libc::time_t;
        self.next.tv_nsec = (total % Self::NANOS_PER_SEC) as libc::c_long;
    }
}

#[cfg(target_os = "linux")]
fn monotonic_now() -> libc::timespec {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: `ts` is a valid out-pointer and CLOCK_MONOTONIC always exists.
    unsafe {
        libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts);
    }
    ts
}

#[cfg(not(target_os = "linux"))]
struct PeriodTimer {
    next: Instant,
    period: Duration,
}

#[cfg(not(target_os = "linux"))]
impl PeriodTimer {
    fn start(period: Duration) -> Self {
        Self {
            next: Instant::now() + period,
            period,
        }
    }

    fn wait(&mut self) -> bool {
        let now = Instant::now();
        let late = now > self.next;
        if !late {
            thread::sleep(self.next - now);
        }
        self.next += self.period;
        late
    }
}
