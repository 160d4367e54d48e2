//! Signal handling for clean measurement abort.
//!
//! SIGINT and SIGTERM set an atomic flag from the handler; the measurement
//! and drain loops poll it between samples. Nothing else happens inside the
//! handler.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;
#[cfg(test)]
use tracing::info;

static SHUTDOWN_FLAG: AtomicBool = AtomicBool::new(false);
static SIGNAL_COUNT: AtomicU32 = AtomicU32::new(0);
static LAST_SIGNAL: AtomicI32 = AtomicI32::new(0);

/// Signal types that abort the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SignalKind {
    /// SIGTERM - Graceful termination request.
    #[serde(rename = "SIGTERM")]
    Terminate,
    /// SIGINT - Interrupt (Ctrl+C).
    #[serde(rename = "SIGINT")]
    Interrupt,
}

impl SignalKind {
    #[cfg(unix)]
    fn from_raw(signo: i32) -> Option<Self> {
        match signo {
            libc::SIGTERM => Some(Self::Terminate),
            libc::SIGINT => Some(Self::Interrupt),
            _ => None,
        }
    }
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalKind::Terminate => write!(f, "SIGTERM"),
            SignalKind::Interrupt => write!(f, "SIGINT"),
        }
    }
}

/// Handle for signal management. Cheap to clone and safe to share.
#[derive(Debug, Clone, Default)]
pub struct SignalHandler {
    requested: Arc<AtomicBool>,
}

impl SignalHandler {
    /// Create a handler and register the process signal handlers.
    ///
    /// # Errors
    ///
    /// Returns the OS error if a handler cannot be installed.
    pub fn new() -> std::io::Result<Self> {
        let handler = Self::detached();

        #[cfg(unix)]
        register_unix_handlers()?;

        Ok(handler)
    }

    /// Create a handler without touching the process signal dispositions.
    pub fn detached() -> Self {
        Self::default()
    }

    /// Check if shutdown has been requested by a signal or manually.
    #[inline]
    pub fn shutdown_requested(&self) -> bool {
        self.requested.load(Ordering::Relaxed) || SHUTDOWN_FLAG.load(Ordering::Relaxed)
    }

    /// Manually request shutdown.
    #[cfg(test)]
    pub fn request_shutdown(&self) {
        info!("Manual shutdown requested");
        self.requested.store(true, Ordering::Relaxed);
    }

    /// Total signals received by the process.
    pub fn signal_count(&self) -> u32 {
        SIGNAL_COUNT.load(Ordering::Relaxed)
    }

    /// The most recent signal received, if any.
    pub fn last_signal(&self) -> Option<SignalKind> {
        #[cfg(unix)]
        {
            SignalKind::from_raw(LAST_SIGNAL.load(Ordering::Relaxed))
        }
        #[cfg(not(unix))]
        {
            None
        }
    }
}

/// Count a delivered signal. Async-signal-safe.
fn note_signal(signo: i32) {
    SIGNAL_COUNT.fetch_add(1, Ordering::Relaxed);
    LAST_SIGNAL.store(signo, Ordering::Relaxed);
}

#[cfg(unix)]
fn register_unix_handlers() -> std::io::Result<()> {
    use std::os::raw::c_int;

    extern "C" fn on_signal(signo: c_int) {
        note_signal(signo);
        SHUTDOWN_FLAG.store(true, Ordering::Relaxed);
    }

    for signo in [libc::SIGTERM, libc::SIGINT] {
        // SAFETY: the handler only touches atomics, which is async-signal-safe.
        let previous = unsafe { libc::signal(signo, on_signal as libc::sighandler_t) };
        if previous == libc::SIG_ERR {
            return Err(std::io::Error::last_os_error());
        }
    }

    debug!("Unix signal handlers registered");
    Ok(())
}

/// Sleep for `duration` in short slices, returning early with `true` if
/// shutdown is requested.
pub fn sleep_interruptible(handler: &SignalHandler, duration: std::time::Duration) -> bool {
    let start = std::time::Instant::now();
    let poll_interval = std::time::Duration::from_millis(10);

    while start.elapsed() < duration {
        if handler.shutdown_requested() {
            return true;
        }
        std::thread::sleep(poll_interval.min(duration.saturating_sub(start.elapsed())));
    }

    handler.shutdown_requested()
}
