//! Acceptance tests for the RMS preemption probe.
//!
//! These tests verify the measurement end to end:
//! - The reference scenario (200 µs period, Low Task divisor 10, 199 firings)
//! - Sample invariants and the exported stream format
//! - Boundedness far past capacity
//! - Low Task cadence over long runs
//!
//! Host tests that need real-time scheduling require root and are ignored
//! by default.

mod acceptance;
