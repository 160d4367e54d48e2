use thiserror::Error;

/// Probe error types covering configuration, platform arming, and harness lifecycle.
///
/// The measurement tasks themselves never fail; these errors only come from
/// the shell that configures, arms, and drains them.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProbeError {
    /// Configuration or initialization error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Platform could not be armed (timer, threads, interrupt lines).
    #[error("platform error: {0}")]
    Platform(String),

    /// Real-time environment requirements were not met.
    #[error("real-time setup failed: {0}")]
    Realtime(String),

    /// I/O operation error.
    #[error("I/O error: {0}")]
    Io(String),

    /// Invalid state transition attempted.
    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        /// Source state.
        from: String,
        /// Attempted target state.
        to: String,
    },
}

impl From<std::io::Error> for ProbeError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Convenience type alias for probe operations.
pub type ProbeResult<T> = Result<T, ProbeError>;
