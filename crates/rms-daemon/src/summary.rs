//! End-of-run summary: verdict, counters and analysis.

use crate::signals::{SignalHandler, SignalKind};
use rms_common::config::PlatformKind;
use rms_common::state::HarnessState;
use rms_probe::{HostRunSummary, PreemptionAnalysis, ProbeContext, SimulationSummary};
use serde::Serialize;
use std::time::Duration;

/// Overall judgement of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// Samples are consistent and the Low Task was caught mid-window.
    Preempted,
    /// Samples are consistent but no preemption was observed.
    NoPreemption,
    /// Samples break an ordering invariant.
    Inconsistent,
    /// The run was aborted before it completed.
    Aborted,
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Verdict::Preempted => write!(f, "preempted"),
            Verdict::NoPreemption => write!(f, "no_preemption"),
            Verdict::Inconsistent => write!(f, "inconsistent"),
            Verdict::Aborted => write!(f, "aborted"),
        }
    }
}

/// Everything reported about a finished run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    /// Overall judgement.
    pub verdict: Verdict,
    /// Lifecycle state the run ended in.
    pub final_state: String,
    /// Platform the tasks ran on.
    pub platform: PlatformKind,
    /// Timer firings handled by the High Task.
    pub firings: u64,
    /// Low Task invocations started.
    pub low_invocations: u64,
    /// High invocations that observed the Low Task mid-window.
    pub detections: u64,
    /// Quadruples written to the sample stream.
    pub emitted: usize,
    /// Statistics over the committed samples, in cycles.
    pub analysis: PreemptionAnalysis,
    /// Ground truth from the simulated core.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub simulation: Option<SimulationSummary>,
    /// Outcome of the host threads.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<HostRunSummary>,
    /// Wall time from arming to the end of the drain.
    pub elapsed: Duration,
    /// SIGINT/SIGTERM deliveries seen by the process.
    pub signals_received: u32,
    /// Most recent of those signals.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_signal: Option<SignalKind>,
}

/// Platform-specific outcome of the measurement stage.
#[derive(Debug, Clone)]
pub enum PlatformOutcome {
    /// Simulated core counters.
    Simulated(SimulationSummary),
    /// Host thread counters.
    Host(HostRunSummary),
    /// Measurement never ran.
    None,
}

impl RunSummary {
    /// Assemble a summary from the context and the run's outcome.
    pub fn collect(
        ctx: &ProbeContext,
        state: HarnessState,
        platform: PlatformKind,
        outcome: PlatformOutcome,
        emitted: usize,
        period_cycles: u64,
        elapsed: Duration,
    ) -> Self {
        let analysis = PreemptionAnalysis::from_samples(&ctx.samples(), period_cycles);
        let verdict = verdict_for(state, &analysis);
        let (simulation, host) = match outcome {
            PlatformOutcome::Simulated(sim) => (Some(sim), None),
            PlatformOutcome::Host(host) => (None, Some(host)),
            PlatformOutcome::None => (None, None),
        };

        Self {
            verdict,
            final_state: state.to_string(),
            platform,
            firings: ctx.firings(),
            low_invocations: ctx.low_invocations(),
            detections: ctx.detections(),
            emitted,
            analysis,
            simulation,
            host,
            elapsed,
            signals_received: 0,
            last_signal: None,
        }
    }

    /// Copy the process signal counters from `signals`.
    pub fn record_signals(&mut self, signals: &SignalHandler) {
        self.signals_received = signals.signal_count();
        self.last_signal = signals.last_signal();
    }

    /// Render as pretty-printed JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

fn verdict_for(state: HarnessState, analysis: &PreemptionAnalysis) -> Verdict {
    if state == HarnessState::Aborted {
        Verdict::Aborted
    } else if !analysis.is_clean() {
        Verdict::Inconsistent
    } else if analysis.preemptions > 0 {
        Verdict::Preempted
    } else {
        Verdict::NoPreemption
    }
}
