//! Text export of the sample store.
//!
//! The header goes out when measurement starts. Once the High Task's array
//! is full, each poll emits one index-aligned quadruple as two records:
//!
//! ```text
//! time,level,time1,level1
//! <HighStart>, 1, <LowStart>, 1
//! <HighEnd>, 0, <LowEnd>, 0
//! ```
//!
//! Low slots that were never written print as `0`. Output errors never
//! interrupt the drain; the first one is logged and the rest are ignored.

use crate::context::ProbeContext;
use std::io::Write;
use std::thread;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Header line of the sample stream.
pub const CSV_HEADER: &str = "time,level,time1,level1";

/// Outcome of one [`Reporter::poll`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainStatus {
    /// The High array is not full yet; nothing was emitted.
    Waiting,
    /// The quadruple at this index was emitted.
    Emitted(usize),
    /// Every index has been emitted.
    Finished,
}

/// Drains a [`ProbeContext`] to a writer.
#[derive(Debug)]
pub struct Reporter<W: Write> {
    out: W,
    cursor: usize,
    header_written: bool,
    write_failed: bool,
}

impl<W: Write> Reporter<W> {
    /// Create a reporter writing to `out`.
    pub fn new(out: W) -> Self {
        Self {
            out,
            cursor: 0,
            header_written: false,
            write_failed: false,
        }
    }

    /// Write the stream header if it has not been written yet.
    pub fn start(&mut self) {
        if self.header_written {
            return;
        }
        self.header_written = true;
        let result = writeln!(self.out, "{CSV_HEADER}");
        self.check(result);
        self.flush();
    }

    /// Quadruples emitted so far.
    #[must_use]
    pub fn emitted(&self) -> usize {
        self.cursor
    }

    /// True if any write to the output has failed.
    #[must_use]
    pub fn write_failed(&self) -> bool {
        self.write_failed
    }

    /// True once every index of `ctx` has been emitted.
    #[must_use]
    pub fn is_finished(&self, ctx: &ProbeContext) -> bool {
        self.cursor >= Self::limit(ctx)
    }

    /// Emit at most one quadruple.
    ///
    /// Nothing is emitted until the High array is full.
    pub fn poll(&mut self, ctx: &ProbeContext) -> DrainStatus {
        if !ctx.high.is_full() {
            return DrainStatus::Waiting;
        }
        self.emit_next(ctx, Self::limit(ctx))
    }

    /// Emit every remaining quadruple at once. Returns the number emitted.
    pub fn drain(&mut self, ctx: &ProbeContext) -> usize {
        let before = self.cursor;
        while let DrainStatus::Emitted(_) = self.poll(ctx) {}
        self.flush();
        self.cursor - before
    }

    /// Emit one quadruple per `interval` until finished or `stop` returns true.
    ///
    /// Returns the number emitted.
    pub fn drain_paced(
        &mut self,
        ctx: &ProbeContext,
        interval: Duration,
        stop: impl Fn() -> bool,
    ) -> usize {
        let before = self.cursor;
        loop {
            if stop() {
                debug!(emitted = self.cursor, "Drain stopped");
                break;
            }
            match self.poll(ctx) {
                DrainStatus::Finished => break,
                DrainStatus::Emitted(_) => self.flush(),
                DrainStatus::Waiting => {}
            }
            if !interval.is_zero() {
                thread::sleep(interval);
            }
        }
        self.flush();
        self.cursor - before
    }

    /// Emit the committed High samples of a run that ended before the High
    /// array filled. Returns the number emitted.
    pub fn drain_committed(&mut self, ctx: &ProbeContext) -> usize {
        let before = self.cursor;
        let limit = ctx.high.len();
        while let DrainStatus::Emitted(_) = self.emit_next(ctx, limit) {}
        self.flush();
        self.cursor - before
    }

    /// Consume the reporter, returning the writer.
    pub fn into_inner(mut self) -> W {
        self.flush();
        self.out
    }

    /// Last index the drain covers, exclusive. The saturation slot is skipped.
    fn limit(ctx: &ProbeContext) -> usize {
        ctx.high.capacity() - 1
    }

    fn emit_next(&mut self, ctx: &ProbeContext, limit: usize) -> DrainStatus {
        self.start();

        if self.cursor >= limit {
            return DrainStatus::Finished;
        }

        let i = self.cursor;
        let (hs, he) = (ctx.high.start(i), ctx.high.end(i));
        let (ls, le) = (ctx.low.start(i), ctx.low.end(i));
        trace!(index = i, %hs, %he, %ls, %le, "Drained sample");

        let result = writeln!(self.out, "{hs}, 1, {ls}, 1")
            .and_then(|()| writeln!(self.out, "{he}, 0, {le}, 0"));
        self.check(result);

        self.cursor += 1;
        DrainStatus::Emitted(i)
    }

    fn flush(&mut self) {
        let result = self.out.flush();
        self.check(result);
    }

    fn check(&mut self, result: std::io::Result<()>) {
        if let Err(e) = result {
            if !self.write_failed {
                warn!(error = %e, "Sample output failed; further errors are ignored");
            }
            self.write_failed = true;
        }
    }
}
