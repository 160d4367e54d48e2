//! Shared measurement state: sample store, preemption signal, and counters.
//!
//! All state is allocated once when the context is built and is shared by
//! reference between the High Task, the Low Task, and the reporter.
//!
//! # Design
//!
//! - **Preallocated**: sample arrays are boxed slices of atomics sized at build
//!   time; nothing on the task paths allocates.
//! - **Saturating cursors**: a cursor stops at `capacity - 1`. Writes issued
//!   while a cursor is saturated are dropped, so committed samples are never
//!   overwritten and no index ever leaves its array.
//! - **Relaxed atomics**: mutual exclusion comes from the priority scheme
//!   (the High Task always interrupts the Low Task at an instruction
//!   boundary), not from memory ordering. Every shared word is only ever
//!   loaded or stored whole, so no reader can observe a torn value.

use crossbeam_utils::CachePadded;
use rms_common::config::ProbeConfig;
use rms_common::time::Timestamp;
use static_assertions::const_assert_eq;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};

// Timestamps are stored bit-for-bit in `AtomicU64` slots.
const_assert_eq!(std::mem::size_of::<Timestamp>(), std::mem::size_of::<u64>());

/// Index into a sample array, guaranteed to be below the last slot.
///
/// Only a [`SampleCursor`] hands these out, so an index can never address
/// the saturation slot or anything beyond it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SampleIndex(usize);

impl SampleIndex {
    /// Position within the array.
    #[must_use]
    pub fn get(self) -> usize {
        self.0
    }
}

/// Monotonic write cursor that saturates at `capacity - 1`.
#[derive(Debug)]
pub struct SampleCursor {
    position: CachePadded<AtomicUsize>,
    last: usize,
}

impl SampleCursor {
    /// Create a cursor for an array of `capacity` slots (at least 2).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            position: CachePadded::new(AtomicUsize::new(0)),
            last: capacity.max(2) - 1,
        }
    }

    /// Current position, `0..=capacity-1`.
    #[inline]
    #[must_use]
    pub fn position(&self) -> usize {
        self.position.load(Ordering::Relaxed)
    }

    /// Slot the next write lands in, or `None` once saturated.
    #[inline]
    #[must_use]
    pub fn current(&self) -> Option<SampleIndex> {
        let pos = self.position();
        (pos < self.last).then_some(SampleIndex(pos))
    }

    /// True once the cursor has reached `capacity - 1`.
    #[inline]
    #[must_use]
    pub fn is_saturated(&self) -> bool {
        self.position() >= self.last
    }

    /// Advance by one, stopping at `capacity - 1`.
    ///
    /// Load and store are separate: only one task writes a given cursor at a
    /// time, and a preempting writer always finishes before the preempted one
    /// resumes.
    #[inline]
    pub fn advance(&self) {
        let pos = self.position();
        if pos < self.last {
            self.position.store(pos + 1, Ordering::Relaxed);
        }
    }
}

/// Fixed-capacity array of timestamps.
#[derive(Debug)]
pub struct SampleArray {
    slots: Box<[AtomicU64]>,
}

impl SampleArray {
    /// Allocate `capacity` zeroed slots.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    /// Number of slots.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Store `ts` at `index`.
    #[inline]
    pub fn write(&self, index: SampleIndex, ts: Timestamp) {
        self.slots[index.get()].store(ts.cycles(), Ordering::Relaxed);
    }

    /// Read slot `i`; out-of-range reads yield [`Timestamp::ZERO`].
    #[must_use]
    pub fn read(&self, i: usize) -> Timestamp {
        self.slots
            .get(i)
            .map_or(Timestamp::ZERO, |slot| Timestamp(slot.load(Ordering::Relaxed)))
    }
}

/// Start and end arrays of one task plus the cursor indexing both.
#[derive(Debug)]
pub struct TaskRecord {
    starts: SampleArray,
    ends: SampleArray,
    cursor: SampleCursor,
}

impl TaskRecord {
    /// Allocate a record with `capacity` slots per array.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(2);
        Self {
            starts: SampleArray::new(capacity),
            ends: SampleArray::new(capacity),
            cursor: SampleCursor::new(capacity),
        }
    }

    /// Record a start timestamp at the cursor; dropped when saturated.
    #[inline]
    pub fn record_start(&self, ts: Timestamp) {
        if let Some(idx) = self.cursor.current() {
            self.starts.write(idx, ts);
        }
    }

    /// Record an end timestamp at the cursor; dropped when saturated.
    #[inline]
    pub fn record_end(&self, ts: Timestamp) {
        if let Some(idx) = self.cursor.current() {
            self.ends.write(idx, ts);
        }
    }

    /// Commit the current slot and move to the next.
    #[inline]
    pub fn advance(&self) {
        self.cursor.advance();
    }

    /// Committed samples so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cursor.position()
    }

    /// True before the first commit.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True once no further samples will be accepted.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.cursor.is_saturated()
    }

    /// Slots per array.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.starts.capacity()
    }

    /// Start timestamp at slot `i`.
    #[must_use]
    pub fn start(&self, i: usize) -> Timestamp {
        self.starts.read(i)
    }

    /// End timestamp at slot `i`.
    #[must_use]
    pub fn end(&self, i: usize) -> Timestamp {
        self.ends.read(i)
    }

    /// The write cursor.
    #[must_use]
    pub fn cursor(&self) -> &SampleCursor {
        &self.cursor
    }
}

/// Cooperative flag the Low Task raises and the High Task clears.
///
/// Not a lock: it only tells each side what the other did while it was
/// not running.
#[derive(Debug, Default)]
pub struct PreemptionSignal {
    raised: CachePadded<AtomicBool>,
}

impl PreemptionSignal {
    /// Create a lowered signal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the signal (Low Task only).
    #[inline]
    pub fn raise(&self) {
        self.raised.store(true, Ordering::Relaxed);
    }

    /// Lower the signal.
    #[inline]
    pub fn clear(&self) {
        self.raised.store(false, Ordering::Relaxed);
    }

    /// Lower the signal and return whether it was still raised.
    #[inline]
    pub fn take(&self) -> bool {
        self.raised.swap(false, Ordering::Relaxed)
    }

    /// Read the signal.
    #[inline]
    #[must_use]
    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::Relaxed)
    }
}

/// Everything the two tasks share, built once at startup.
#[derive(Debug)]
pub struct ProbeContext {
    /// High Task start/end samples.
    pub high: TaskRecord,
    /// Low Task segment start/end samples.
    pub low: TaskRecord,
    /// Low Task's "I am running" flag.
    pub signal: PreemptionSignal,
    /// Firings since the Low Task was last pended.
    period_counter: AtomicU32,
    /// Low Task is pended every `divisor` firings.
    divisor: u32,
    /// Spin iterations of the High Task's busy-wait.
    high_spins: u64,
    /// Spin iterations of the Low Task's busy-wait.
    low_spins: u64,
    /// Period Generator firings handled.
    firings: AtomicU64,
    /// Low Task invocations started.
    low_invocations: AtomicU64,
    /// High invocations that caught the Low Task mid-window.
    detections: AtomicU64,
}

impl ProbeContext {
    /// Build a context from configuration.
    #[must_use]
    pub fn from_config(config: &ProbeConfig) -> Self {
        ProbeContextBuilder::new()
            .high_capacity(config.high_capacity)
            .low_capacity(config.low_capacity)
            .low_task_divisor(config.low_task_divisor)
            .high_spins(config.high_spin_count())
            .low_spins(config.low_spin_count())
            .build()
    }

    /// Low Task trigger divisor.
    #[must_use]
    pub fn divisor(&self) -> u32 {
        self.divisor
    }

    /// Current value of the period counter, always `< divisor`.
    #[must_use]
    pub fn period_counter(&self) -> u32 {
        self.period_counter.load(Ordering::Relaxed)
    }

    /// Spin iterations of the High Task's busy-wait.
    #[must_use]
    pub fn high_spins(&self) -> u64 {
        self.high_spins
    }

    /// Spin iterations of the Low Task's busy-wait.
    #[must_use]
    pub fn low_spins(&self) -> u64 {
        self.low_spins
    }

    /// Period Generator firings handled so far.
    #[must_use]
    pub fn firings(&self) -> u64 {
        self.firings.load(Ordering::Relaxed)
    }

    /// Low Task invocations started so far.
    #[must_use]
    pub fn low_invocations(&self) -> u64 {
        self.low_invocations.load(Ordering::Relaxed)
    }

    /// High invocations that observed the Low Task's signal.
    #[must_use]
    pub fn detections(&self) -> u64 {
        self.detections.load(Ordering::Relaxed)
    }

    /// Count one firing and report whether the Low Task is due.
    ///
    /// Called only from the High Task.
    #[inline]
    pub(crate) fn tick_period(&self) -> bool {
        bump(&self.firings);
        let next = self.period_counter.load(Ordering::Relaxed) + 1;
        if next >= self.divisor {
            self.period_counter.store(0, Ordering::Relaxed);
            true
        } else {
            self.period_counter.store(next, Ordering::Relaxed);
            false
        }
    }

    #[inline]
    pub(crate) fn note_low_invocation(&self) {
        bump(&self.low_invocations);
    }

    #[inline]
    pub(crate) fn note_detection(&self) {
        bump(&self.detections);
    }

    /// Copy the committed samples out of the store.
    ///
    /// Allocates; call from the reporting side only.
    #[must_use]
    pub fn samples(&self) -> SampleSet {
        let collect = |record: &TaskRecord, ends: bool| -> Vec<Timestamp> {
            (0..record.len())
                .map(|i| if ends { record.end(i) } else { record.start(i) })
                .collect()
        };
        SampleSet {
            high_start: collect(&self.high, false),
            high_end: collect(&self.high, true),
            low_start: collect(&self.low, false),
            low_end: collect(&self.low, true),
        }
    }
}

/// Single-writer increment of a diagnostics counter.
#[inline]
fn bump(counter: &AtomicU64) {
    counter.store(counter.load(Ordering::Relaxed) + 1, Ordering::Relaxed);
}

/// Builder for [`ProbeContext`].
#[derive(Debug, Clone)]
pub struct ProbeContextBuilder {
    high_capacity: usize,
    low_capacity: usize,
    divisor: u32,
    high_spins: u64,
    low_spins: u64,
}

impl Default for ProbeContextBuilder {
    fn default() -> Self {
        let config = ProbeConfig::default();
        Self {
            high_capacity: config.high_capacity,
            low_capacity: config.low_capacity,
            divisor: config.low_task_divisor,
            high_spins: config.high_spin_count(),
            low_spins: config.low_spin_count(),
        }
    }
}

impl ProbeContextBuilder {
    /// Builder seeded with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the High Task array capacity (clamped to at least 2).
    #[must_use]
    pub fn high_capacity(mut self, capacity: usize) -> Self {
        self.high_capacity = capacity;
        self
    }

    /// Set the Low Task array capacity (clamped to at least 2).
    #[must_use]
    pub fn low_capacity(mut self, capacity: usize) -> Self {
        self.low_capacity = capacity;
        self
    }

    /// Set the Low Task trigger divisor (clamped to at least 1).
    #[must_use]
    pub fn low_task_divisor(mut self, divisor: u32) -> Self {
        self.divisor = divisor;
        self
    }

    /// Set the High Task busy-wait in spin iterations.
    #[must_use]
    pub fn high_spins(mut self, spins: u64) -> Self {
        self.high_spins = spins;
        self
    }

    /// Set the Low Task busy-wait in spin iterations.
    #[must_use]
    pub fn low_spins(mut self, spins: u64) -> Self {
        self.low_spins = spins;
        self
    }

    /// Allocate the context.
    #[must_use]
    pub fn build(self) -> ProbeContext {
        ProbeContext {
            high: TaskRecord::new(self.high_capacity),
            low: TaskRecord::new(self.low_capacity),
            signal: PreemptionSignal::new(),
            period_counter: AtomicU32::new(0),
            divisor: self.divisor.max(1),
            high_spins: self.high_spins,
            low_spins: self.low_spins,
            firings: AtomicU64::new(0),
            low_invocations: AtomicU64::new(0),
            detections: AtomicU64::new(0),
        }
    }
}

/// Owned copy of the committed samples.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SampleSet {
    /// High Task start timestamps.
    pub high_start: Vec<Timestamp>,
    /// High Task end timestamps.
    pub high_end: Vec<Timestamp>,
    /// Low Task segment start (or resume) timestamps.
    pub low_start: Vec<Timestamp>,
    /// Low Task segment end (or suspension-detected) timestamps.
    pub low_end: Vec<Timestamp>,
}
