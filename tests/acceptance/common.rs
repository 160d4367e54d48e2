//! Common utilities for integration tests.
//!
//! Provides helpers for:
//! - Running the probe on the simulated core
//! - Draining and parsing the exported sample stream
//! - Checking the sample invariants every run must satisfy
//! - Checking real-time prerequisites for host tests

#![allow(dead_code)] // Not every test module uses every helper

use rms_common::config::ProbeConfig;
use rms_common::time::Timestamp;
use rms_probe::{ProbeContext, Reporter, SampleSet, SimulatedCore, SimulationSummary};
use std::fs;

/// One drained index: two stream records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quadruple {
    pub high_start: u64,
    pub high_end: u64,
    pub low_start: u64,
    pub low_end: u64,
}

/// Build a context from `config` and run `firings` periods on the simulated core.
pub fn run_simulated(config: &ProbeConfig, firings: u64) -> (ProbeContext, SimulationSummary) {
    let ctx = ProbeContext::from_config(config);
    let summary = SimulatedCore::new(&ctx, config).run(firings);
    (ctx, summary)
}

/// Drain every quadruple of a full context into a string.
pub fn drain_to_string(ctx: &ProbeContext) -> String {
    let mut reporter = Reporter::new(Vec::new());
    reporter.drain(ctx);
    String::from_utf8(reporter.into_inner()).expect("stream is ASCII")
}

/// Parse the sample stream, checking the header and the level columns.
pub fn parse_stream(text: &str) -> Result<Vec<Quadruple>, String> {
    let mut lines = text.lines();
    match lines.next() {
        Some("time,level,time1,level1") => {}
        other => return Err(format!("bad header: {other:?}")),
    }

    let rows: Vec<&str> = lines.collect();
    if rows.len() % 2 != 0 {
        return Err(format!("odd number of records: {}", rows.len()));
    }

    rows.chunks(2)
        .map(|pair| {
            let (hs, ls) = parse_record(pair[0], 1)?;
            let (he, le) = parse_record(pair[1], 0)?;
            Ok(Quadruple {
                high_start: hs,
                high_end: he,
                low_start: ls,
                low_end: le,
            })
        })
        .collect()
}

fn parse_record(line: &str, level: u8) -> Result<(u64, u64), String> {
    let fields: Vec<&str> = line.split(", ").collect();
    if fields.len() != 4 {
        return Err(format!("expected 4 fields: {line:?}"));
    }
    let want = level.to_string();
    if fields[1] != want || fields[3] != want {
        return Err(format!("expected level {level}: {line:?}"));
    }
    let parse = |s: &str| s.parse::<u64>().map_err(|e| format!("{s:?}: {e}"));
    Ok((parse(fields[0])?, parse(fields[2])?))
}

/// Assert the invariants every single-core measurement must satisfy.
pub fn assert_sample_invariants(samples: &SampleSet) {
    assert_high_invariants(samples);
    for (i, (start, end)) in samples.low_start.iter().zip(&samples.low_end).enumerate() {
        assert!(start <= end, "low segment {i}: end {end} before start {start}");
    }
}

/// Assert non-negative High durations and strictly increasing High starts.
pub fn assert_high_invariants(samples: &SampleSet) {
    for (i, (start, end)) in samples.high_start.iter().zip(&samples.high_end).enumerate() {
        assert!(start <= end, "high sample {i}: end {end} before start {start}");
    }
    for (i, pair) in samples.high_start.windows(2).enumerate() {
        assert!(pair[0] < pair[1], "high start {} not after {}", i + 1, i);
    }
}

/// High invocation whose window strictly contains `ts`, if any.
pub fn containing_high(samples: &SampleSet, ts: Timestamp) -> Option<usize> {
    samples
        .high_start
        .iter()
        .zip(&samples.high_end)
        .position(|(start, end)| *start < ts && ts < *end)
}

/// Check if the system has PREEMPT_RT kernel.
pub fn has_preempt_rt() -> bool {
    if let Ok(version) = fs::read_to_string("/proc/version") {
        version.contains("PREEMPT_RT") || version.contains("PREEMPT RT")
    } else {
        false
    }
}

/// Check if running as root (required for RT priority).
pub fn is_root() -> bool {
    unsafe { libc::geteuid() == 0 }
}

/// Check all prerequisites for real-time host tests.
pub fn check_rt_prerequisites() -> Result<(), String> {
    if !is_root() {
        return Err("Not running as root - RT priority tests will fail".into());
    }
    if !has_preempt_rt() {
        eprintln!("WARNING: PREEMPT_RT kernel not detected - latency results may be unreliable");
    }
    Ok(())
}
