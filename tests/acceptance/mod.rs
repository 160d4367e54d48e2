//! Integration tests for RMS probe acceptance testing.
//!
//! The simulated core makes every scenario deterministic, so most tests
//! assert exact counts. Host tests check only what holds on any scheduler
//! unless they run with real-time privileges.

mod cadence_test;
mod common;
mod config_test;
mod host_test;
mod scenario_test;
mod stress_test;
