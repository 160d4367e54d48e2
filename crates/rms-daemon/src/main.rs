//! RMS probe daemon entry point.
//!
//! Loads the configuration, arms the selected platform, runs the two
//! measurement tasks, and streams the drained samples to stdout or a file.
//! Logs go to stderr so the sample stream stays machine-readable.

mod signals;
mod summary;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use rms_common::config::{PlatformKind, ProbeConfig};
use rms_common::state::{HarnessState, StateMachine};
use rms_probe::{init_process, HostHarness, ProbeContext, Reporter, SimulatedCore};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use crate::signals::{sleep_interruptible, SignalHandler};
use crate::summary::{PlatformOutcome, RunSummary, Verdict};

/// Platform selection on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum PlatformArg {
    /// Deterministic single-core simulation.
    Simulated,
    /// Fixed-priority host threads.
    Host,
}

impl From<PlatformArg> for PlatformKind {
    fn from(arg: PlatformArg) -> Self {
        match arg {
            PlatformArg::Simulated => PlatformKind::Simulated,
            PlatformArg::Host => PlatformKind::Host,
        }
    }
}

/// RMS probe daemon command-line arguments.
#[derive(Parser, Debug)]
#[command(
    name = "rms-daemon",
    about = "Measures fixed-priority preemption between a periodic and a software-triggered task",
    version,
    long_about = None
)]
struct Args {
    /// Path to a probe configuration file (TOML).
    #[arg(long, short = 'c', value_name = "FILE")]
    config: Option<PathBuf>,

    /// Platform to run the tasks on (overrides config file).
    #[arg(long, short = 'p', value_enum)]
    platform: Option<PlatformArg>,

    /// Timer firings to run (0 = until the High array is full).
    #[arg(long, short = 'n')]
    firings: Option<u64>,

    /// Delay between drained samples, e.g. "100ms" or "0s" (overrides config file).
    #[arg(long, value_parser = humantime::parse_duration)]
    report_interval: Option<Duration>,

    /// Write the sample stream to FILE instead of stdout.
    #[arg(long, short = 'o', value_name = "FILE")]
    output: Option<PathBuf>,

    /// Write the run summary as JSON to FILE.
    #[arg(long, value_name = "FILE")]
    summary_json: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, short = 'l', default_value = "info")]
    log_level: String,
}

fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level);

    info!(version = env!("CARGO_PKG_VERSION"), "Starting RMS probe daemon");

    let mut config = load_config(&args)?;
    apply_overrides(&mut config, &args);

    let warnings = config.validate().context("Invalid configuration")?;
    for warning in &warnings {
        warn!(%warning, "Timing assumption at risk");
    }

    info!(
        platform = %config.platform,
        period = %humantime::format_duration(config.period),
        divisor = config.low_task_divisor,
        firings = config.firings(),
        "Configuration loaded"
    );

    let signal_handler = SignalHandler::new().context("Failed to set up signal handlers")?;

    let output = open_output(args.output.as_deref())?;
    let summary = run_probe(&config, &signal_handler, output)?;

    if let Some(path) = &args.summary_json {
        let json = summary.to_json().context("Failed to serialize run summary")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write summary to {}", path.display()))?;
        info!(path = %path.display(), "Run summary written");
    }

    Ok(())
}

/// Initialize logging with the specified log level.
fn init_logging(level: &str) {
    let filter = format!("rms_daemon={level},rms_probe={level},rms_common={level}");

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&filter)),
        )
        .with_writer(io::stderr)
        .with_target(true)
        .with_thread_ids(true)
        .init();
}

/// Load configuration from file or use defaults.
///
/// Resolution priority (first existing file wins):
/// 1. Command-line `--config` argument
/// 2. `RMS_PROBE_CONFIG` environment variable
/// 3. `/etc/rms-probe/config.toml` (system path)
/// 4. `config/default.toml` (local development)
/// 5. Built-in defaults
fn load_config(args: &Args) -> Result<ProbeConfig> {
    if let Some(config_path) = &args.config {
        info!(?config_path, "Loading config from command-line argument");
        return ProbeConfig::from_file(config_path)
            .with_context(|| format!("Failed to load config from {config_path:?}"));
    }

    if let Ok(env_path) = std::env::var("RMS_PROBE_CONFIG") {
        let config_path = PathBuf::from(&env_path);
        if config_path.exists() {
            info!(?config_path, "Loading config from RMS_PROBE_CONFIG");
            return ProbeConfig::from_file(&config_path).with_context(|| {
                format!("Failed to load config from RMS_PROBE_CONFIG={env_path:?}")
            });
        }
        warn!(
            path = %env_path,
            "RMS_PROBE_CONFIG set but file does not exist, checking other locations"
        );
    }

    for path in ["/etc/rms-probe/config.toml", "config/default.toml"] {
        let config_path = Path::new(path);
        if config_path.exists() {
            info!(?config_path, "Loading config file");
            return ProbeConfig::from_file(config_path)
                .with_context(|| format!("Failed to load config from {config_path:?}"));
        }
    }

    info!("No config file found, using built-in defaults");
    Ok(ProbeConfig::default())
}

/// Apply command-line overrides on top of the loaded configuration.
fn apply_overrides(config: &mut ProbeConfig, args: &Args) {
    if let Some(platform) = args.platform {
        config.platform = platform.into();
    }
    if let Some(firings) = args.firings {
        config.max_firings = firings;
    }
    if let Some(interval) = args.report_interval {
        config.report_interval = interval;
    }
}

fn open_output(path: Option<&Path>) -> Result<BufWriter<Box<dyn Write>>> {
    let writer: Box<dyn Write> = match path {
        Some(path) => Box::new(
            File::create(path).with_context(|| format!("Failed to create {}", path.display()))?,
        ),
        None => Box::new(io::stdout()),
    };
    Ok(BufWriter::new(writer))
}

/// Run one measurement session from boot to drain.
fn run_probe<W: Write>(
    config: &ProbeConfig,
    signals: &SignalHandler,
    output: W,
) -> Result<RunSummary> {
    let mut state = StateMachine::new();
    let ctx = ProbeContext::from_config(config);
    let mut reporter = Reporter::new(output);
    let firings = config.firings();
    let started = Instant::now();
    let stop = || signals.shutdown_requested();

    state.transition(HarnessState::Settling)?;
    info!(delay = %humantime::format_duration(config.startup_delay), "Settling");
    if sleep_interruptible(signals, config.startup_delay) {
        info!("Shutdown requested while settling");
        state.abort();
        let outcome = PlatformOutcome::None;
        return Ok(finish(&ctx, &state, config, outcome, &reporter, signals, started));
    }

    state.transition(HarnessState::Measuring)?;
    reporter.start();
    let outcome = match config.platform {
        PlatformKind::Simulated => {
            let core = SimulatedCore::new(&ctx, config);
            let sim = core.run(firings);
            info!(
                firings = sim.firings,
                low_runs = sim.low_runs,
                preemptions = sim.preemptions,
                elapsed_cycles = sim.elapsed_cycles,
                "Simulation finished"
            );
            PlatformOutcome::Simulated(sim)
        }
        PlatformKind::Host => {
            init_process(&config.realtime).context("Real-time setup failed")?;
            let harness = HostHarness::new(&ctx, config);
            let host = harness
                .run_observed(firings, &stop, config.report_interval, |ctx| {
                    reporter.poll(ctx);
                })
                .context("Host harness failed")?;
            if host.stopped {
                info!("Shutdown requested while measuring");
                state.abort();
                let outcome = PlatformOutcome::Host(host);
                return Ok(finish(&ctx, &state, config, outcome, &reporter, signals, started));
            }
            PlatformOutcome::Host(host)
        }
    };

    state.transition(HarnessState::Draining)?;
    if ctx.high.is_full() {
        reporter.drain_paced(&ctx, config.report_interval, stop);
    } else {
        warn!(
            committed = ctx.high.len(),
            capacity = ctx.high.capacity(),
            "High array not full, emitting committed samples only"
        );
        reporter.drain_committed(&ctx);
    }

    if stop() {
        info!(emitted = reporter.emitted(), "Shutdown requested while draining");
        state.abort();
    } else {
        state.transition(HarnessState::Complete)?;
    }

    if reporter.write_failed() {
        error!("Sample output was incomplete");
    }

    Ok(finish(&ctx, &state, config, outcome, &reporter, signals, started))
}

fn finish<W: Write>(
    ctx: &ProbeContext,
    state: &StateMachine,
    config: &ProbeConfig,
    outcome: PlatformOutcome,
    reporter: &Reporter<W>,
    signals: &SignalHandler,
    started: Instant,
) -> RunSummary {
    let mut summary = RunSummary::collect(
        ctx,
        state.state(),
        config.platform,
        outcome,
        reporter.emitted(),
        config.period_cycles(),
        started.elapsed(),
    );
    summary.record_signals(signals);

    if summary.verdict == Verdict::Aborted {
        info!(
            signal_count = summary.signals_received,
            last_signal = ?summary.last_signal,
            "Run aborted"
        );
    }

    for violation in &summary.analysis.violations {
        warn!(?violation, "Sample invariant violated");
    }
    if summary.verdict == Verdict::NoPreemption {
        warn!("No preemption observed; the Low Task window may be too short");
    }

    info!(
        verdict = %summary.verdict,
        final_state = %summary.final_state,
        firings = summary.firings,
        low_invocations = summary.low_invocations,
        detections = summary.detections,
        emitted = summary.emitted,
        high_max = summary.analysis.high_exec.max.unwrap_or(0),
        detection_p99 = summary.analysis.detection_latency.p99.unwrap_or(0),
        "Probe run complete"
    );
    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quiet_config() -> ProbeConfig {
        ProbeConfig {
            startup_delay: Duration::ZERO,
            report_interval: Duration::ZERO,
            ..Default::default()
        }
    }

    #[test]
    fn test_args_parsing() {
        let args = Args::parse_from(["rms-daemon", "--platform", "host"]);
        assert_eq!(args.platform, Some(PlatformArg::Host));
        assert!(args.config.is_none());
        assert_eq!(args.log_level, "info");
    }

    #[test]
    fn test_args_with_overrides() {
        let args = Args::parse_from([
            "rms-daemon",
            "-c",
            "probe.toml",
            "-n",
            "50",
            "--report-interval",
            "5ms",
            "-o",
            "samples.csv",
        ]);
        assert_eq!(args.config, Some(PathBuf::from("probe.toml")));
        assert_eq!(args.output, Some(PathBuf::from("samples.csv")));

        let mut config = ProbeConfig::default();
        apply_overrides(&mut config, &args);
        assert_eq!(config.max_firings, 50);
        assert_eq!(config.report_interval, Duration::from_millis(5));
        assert_eq!(config.platform, PlatformKind::Simulated);
    }

    #[test]
    fn test_load_config_from_argument() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "low_task_divisor = 4").unwrap();
        let path = file.path().to_string_lossy().into_owned();

        let args = Args::parse_from(["rms-daemon", "--config", path.as_str()]);
        let config = load_config(&args).unwrap();
        assert_eq!(config.low_task_divisor, 4);
    }

    #[test]
    fn test_load_config_missing_file_fails() {
        let args = Args::parse_from(["rms-daemon", "--config", "/nonexistent/probe.toml"]);
        assert!(load_config(&args).is_err());
    }

    #[test]
    fn test_simulated_run_streams_all_samples() {
        let config = quiet_config();
        let signals = SignalHandler::detached();
        let mut out = Vec::new();

        let summary = run_probe(&config, &signals, &mut out).unwrap();

        assert_eq!(summary.verdict, Verdict::Preempted);
        assert_eq!(summary.final_state, "COMPLETE");
        assert_eq!(summary.emitted, 199);
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.lines().next(), Some("time,level,time1,level1"));
        assert_eq!(text.lines().count(), 1 + 2 * 199);
    }

    #[test]
    fn test_short_run_emits_committed_samples() {
        let config = ProbeConfig {
            max_firings: 25,
            ..quiet_config()
        };
        let signals = SignalHandler::detached();
        let mut out = Vec::new();

        let summary = run_probe(&config, &signals, &mut out).unwrap();

        assert_eq!(summary.emitted, 25);
        assert_eq!(summary.final_state, "COMPLETE");
    }

    #[test]
    fn test_header_precedes_short_run_samples() {
        let config = ProbeConfig {
            max_firings: 3,
            ..quiet_config()
        };
        let signals = SignalHandler::detached();
        let mut out = Vec::new();

        run_probe(&config, &signals, &mut out).unwrap();

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "time,level,time1,level1");
        assert_eq!(lines.len(), 1 + 2 * 3);
    }

    #[test]
    fn test_shutdown_before_measuring_aborts() {
        let config = quiet_config();
        let signals = SignalHandler::detached();
        signals.request_shutdown();
        let mut out = Vec::new();

        let summary = run_probe(&config, &signals, &mut out).unwrap();

        assert_eq!(summary.verdict, Verdict::Aborted);
        assert_eq!(summary.firings, 0);
        assert!(out.is_empty());
    }
}
