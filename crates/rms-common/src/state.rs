//! Harness lifecycle state machine.
//!
//! BOOT → SETTLING → MEASURING → DRAINING → COMPLETE
//!
//! ABORTED is reachable from every non-terminal state so a shutdown signal
//! or platform failure can stop the run at any point.

use crate::error::{ProbeError, ProbeResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Lifecycle states of one measurement session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HarnessState {
    /// Process started, configuration not yet applied.
    #[default]
    Boot,
    /// Waiting out the startup delay before arming.
    Settling,
    /// Timer armed; tasks are recording samples.
    Measuring,
    /// High Task array full; reporter is emitting samples.
    Draining,
    /// All samples emitted.
    Complete,
    /// Stopped early.
    Aborted,
}

impl fmt::Display for HarnessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Boot => write!(f, "BOOT"),
            Self::Settling => write!(f, "SETTLING"),
            Self::Measuring => write!(f, "MEASURING"),
            Self::Draining => write!(f, "DRAINING"),
            Self::Complete => write!(f, "COMPLETE"),
            Self::Aborted => write!(f, "ABORTED"),
        }
    }
}

impl HarnessState {
    /// Check if a transition to `target` is valid from the current state.
    #[must_use]
    pub fn can_transition_to(&self, target: HarnessState) -> bool {
        use HarnessState::{Aborted, Boot, Complete, Draining, Measuring, Settling};

        matches!(
            (self, target),
            (Boot, Settling)
                | (Settling, Measuring)
                | (Measuring, Draining)
                | (Draining, Complete)
                | (Boot | Settling | Measuring | Draining, Aborted)
        )
    }

    /// Returns true once the session can make no further progress.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Aborted)
    }
}

/// State machine wrapper with transition history tracking.
#[derive(Debug, Clone, Default)]
pub struct StateMachine {
    current: HarnessState,
    previous: Option<HarnessState>,
    transition_count: u64,
}

impl StateMachine {
    /// Create a new state machine starting in BOOT.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the current state.
    #[must_use]
    pub fn state(&self) -> HarnessState {
        self.current
    }

    /// Get the previous state (if any transition occurred).
    #[must_use]
    pub fn previous_state(&self) -> Option<HarnessState> {
        self.previous
    }

    /// Get total number of transitions.
    #[must_use]
    pub fn transition_count(&self) -> u64 {
        self.transition_count
    }

    /// Attempt a state transition.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::InvalidStateTransition`] if `target` is not reachable.
    pub fn transition(&mut self, target: HarnessState) -> ProbeResult<()> {
        if !self.current.can_transition_to(target) {
            return Err(ProbeError::InvalidStateTransition {
                from: self.current.to_string(),
                to: target.to_string(),
            });
        }
        debug!(from = %self.current, to = %target, "Harness state transition");
        self.previous = Some(self.current);
        self.current = target;
        self.transition_count += 1;
        Ok(())
    }

    /// Move to ABORTED unless already terminal.
    pub fn abort(&mut self) {
        if self.current.can_transition_to(HarnessState::Aborted) {
            self.previous = Some(self.current);
            self.current = HarnessState::Aborted;
            self.transition_count += 1;
        }
    }
}
