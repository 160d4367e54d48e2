//! Real-time scheduling and memory locking for the host harness.
//!
//! The host harness stands in for a single-core MCU with two fixed
//! interrupt priorities. To get close to that on Linux:
//! - memory is locked once per process (mlockall) so the tasks never fault;
//! - each task thread gets its own SCHED_FIFO/SCHED_RR priority;
//! - both threads are pinned to the same CPU so one can only run when the
//!   other is not.
//!
//! Without privileges every step degrades to a warning unless `fail_fast`
//! is set.

#![allow(unused_imports)] // Platform-specific code may not use all imports

use rms_common::config::{RealtimeConfig, SchedPolicy};
use rms_common::error::{ProbeError, ProbeResult};
use serde::Serialize;
use tracing::{debug, error, info, warn};

/// Result of process-wide real-time setup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessRealtime {
    /// Whether memory was locked successfully.
    pub memory_locked: bool,
}

/// Scheduling actually applied to one task thread.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ThreadRealtime {
    /// Applied scheduler policy.
    pub policy: Option<SchedPolicy>,
    /// Applied scheduler priority.
    pub priority: Option<u8>,
    /// CPU the thread is pinned to.
    pub cpu: Option<usize>,
}

impl ThreadRealtime {
    /// True if the thread runs under a real-time policy.
    #[must_use]
    pub fn is_realtime(&self) -> bool {
        self.policy.is_some()
    }
}

/// Prepare the process for real-time execution.
///
/// # Errors
///
/// Returns an error if `fail_fast` is set and the process lacks the
/// privileges the configuration asks for, or if mlockall fails for a reason
/// other than missing privileges.
pub fn init_process(config: &RealtimeConfig) -> ProbeResult<ProcessRealtime> {
    if !config.enabled {
        info!("Real-time scheduling disabled in configuration");
        return Ok(ProcessRealtime::default());
    }

    if config.fail_fast {
        info!("Validating real-time capabilities (fail_fast=true)");
        validate_rt_capabilities(config)?;
    }

    let memory_locked = if config.lock_memory {
        lock_memory()?
    } else {
        false
    };

    let status = ProcessRealtime { memory_locked };
    info!(?status, "Process real-time setup complete");
    Ok(status)
}

/// Apply the configured policy, `priority`, and CPU to the calling thread.
///
/// Call from inside the task thread before it starts measuring.
///
/// # Errors
///
/// Returns an error only for failures other than missing privileges or a
/// nonexistent CPU; those are logged and reported as not applied.
pub fn configure_current_thread(
    config: &RealtimeConfig,
    priority: u8,
) -> ProbeResult<ThreadRealtime> {
    if !config.enabled {
        return Ok(ThreadRealtime::default());
    }

    let (policy, priority) = set_scheduler(config.policy, priority)?;
    let cpu = match config.cpu {
        Some(cpu) => set_cpu_affinity(cpu)?,
        None => None,
    };

    Ok(ThreadRealtime {
        policy,
        priority,
        cpu,
    })
}

/// Lock all current and future memory pages.
#[cfg(target_os = "linux")]
fn lock_memory() -> ProbeResult<bool> {
    use nix::sys::mman::{mlockall, MlockAllFlags};

    debug!("Locking memory pages with mlockall");

    match mlockall(MlockAllFlags::MCL_CURRENT | MlockAllFlags::MCL_FUTURE) {
        Ok(()) => {
            info!("Memory locked successfully");
            Ok(true)
        }
        Err(e) => {
            if e == nix::errno::Errno::EPERM {
                warn!(
                    "mlockall failed with EPERM - running without CAP_IPC_LOCK capability. \
                     Page faults may perturb the measurement."
                );
                Ok(false)
            } else {
                Err(ProbeError::Realtime(format!("mlockall failed: {e}")))
            }
        }
    }
}

#[cfg(not(target_os = "linux"))]
fn lock_memory() -> ProbeResult<bool> {
    warn!("mlockall not available on this platform");
    Ok(false)
}

/// Set the calling thread's scheduler policy and priority.
#[cfg(target_os = "linux")]
fn set_scheduler(
    policy: SchedPolicy,
    priority: u8,
) -> ProbeResult<(Option<SchedPolicy>, Option<u8>)> {
    let linux_policy = match policy {
        SchedPolicy::Fifo => libc::SCHED_FIFO,
        SchedPolicy::Rr => libc::SCHED_RR,
    };

    let clamped_priority = priority.clamp(1, 99);
    if clamped_priority != priority {
        warn!(
            original = priority,
            clamped = clamped_priority,
            "Scheduler priority clamped to valid range"
        );
    }

    debug!(?policy, priority = clamped_priority, "Setting real-time scheduler");

    let param = libc::sched_param {
        sched_priority: i32::from(clamped_priority),
    };

    // SAFETY: pid 0 addresses the calling thread and `param` outlives the call.
    let result = unsafe { libc::sched_setscheduler(0, linux_policy, &param) };

    if result == -1 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EPERM) {
            warn!(
                "sched_setscheduler failed with EPERM - running without RT privileges. \
                 Task priorities will not be enforced by the kernel."
            );
            return Ok((None, None));
        }
        return Err(ProbeError::Realtime(format!("sched_setscheduler failed: {err}")));
    }

    info!(?policy, priority = clamped_priority, "Real-time scheduler configured");
    Ok((Some(policy), Some(clamped_priority)))
}

#[cfg(not(target_os = "linux"))]
fn set_scheduler(
    policy: SchedPolicy,
    priority: u8,
) -> ProbeResult<(Option<SchedPolicy>, Option<u8>)> {
    warn!(?policy, priority, "Real-time scheduling not available on this platform");
    Ok((None, None))
}

/// Pin the calling thread to `cpu`.
#[cfg(target_os = "linux")]
fn set_cpu_affinity(cpu: usize) -> ProbeResult<Option<usize>> {
    use nix::sched::{sched_setaffinity, CpuSet};
    use nix::unistd::Pid;

    let mut cpu_set = CpuSet::new();
    cpu_set
        .set(cpu)
        .map_err(|e| ProbeError::Config(format!("Invalid CPU index {cpu}: {e}")))?;

    match sched_setaffinity(Pid::from_raw(0), &cpu_set) {
        Ok(()) => {
            debug!(cpu, "CPU affinity set");
            Ok(Some(cpu))
        }
        Err(nix::errno::Errno::EINVAL) => {
            warn!(cpu, "Invalid CPU - the task threads are not pinned");
            Ok(None)
        }
        Err(e) => Err(ProbeError::Realtime(format!("sched_setaffinity failed: {e}"))),
    }
}

#[cfg(not(target_os = "linux"))]
fn set_cpu_affinity(cpu: usize) -> ProbeResult<Option<usize>> {
    warn!(cpu, "CPU affinity not available on this platform");
    Ok(None)
}

/// Check if the current process has real-time capabilities.
#[cfg(target_os = "linux")]
#[must_use]
pub fn check_rt_capabilities() -> RtCapabilities {
    use std::fs;

    let mut caps = RtCapabilities {
        // SAFETY: geteuid has no preconditions.
        is_root: unsafe { libc::geteuid() } == 0,
        ..Default::default()
    };

    let mut rlim = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    // SAFETY: `rlim` is a valid out-pointer for the duration of each call.
    if unsafe { libc::getrlimit(libc::RLIMIT_RTPRIO, &mut rlim) } == 0 {
        caps.rtprio_limit = Some(rlim.rlim_cur);
    }
    // SAFETY: as above.
    if unsafe { libc::getrlimit(libc::RLIMIT_MEMLOCK, &mut rlim) } == 0 {
        caps.memlock_limit = Some(rlim.rlim_cur);
    }

    if let Ok(version) = fs::read_to_string("/proc/version") {
        caps.preempt_rt = version.contains("PREEMPT_RT") || version.contains("PREEMPT RT");
    }

    caps
}

#[cfg(not(target_os = "linux"))]
#[must_use]
pub fn check_rt_capabilities() -> RtCapabilities {
    RtCapabilities::default()
}

/// Information about real-time capabilities of the system.
#[derive(Debug, Clone, Default)]
pub struct RtCapabilities {
    /// Whether running as root.
    pub is_root: bool,
    /// RLIMIT_RTPRIO value (max RT priority allowed).
    pub rtprio_limit: Option<u64>,
    /// RLIMIT_MEMLOCK value (max lockable memory).
    pub memlock_limit: Option<u64>,
    /// Whether running on a PREEMPT_RT kernel.
    pub preempt_rt: bool,
}

impl RtCapabilities {
    /// Check if RT scheduling at `priority` is likely to succeed.
    #[must_use]
    pub fn can_use_rt_priority(&self, priority: u8) -> bool {
        self.is_root || self.rtprio_limit.is_some_and(|l| l >= u64::from(priority))
    }

    /// Check if memory locking is likely to succeed.
    #[must_use]
    pub fn can_lock_memory(&self) -> bool {
        if self.is_root {
            return true;
        }

        #[cfg(target_family = "unix")]
        {
            self.memlock_limit.is_some_and(|l| l == libc::RLIM_INFINITY)
        }

        #[cfg(not(target_family = "unix"))]
        {
            false
        }
    }
}

/// Validate that the real-time setup the configuration asks for is possible.
///
/// # Errors
///
/// Returns [`ProbeError::Realtime`] listing every unmet requirement.
pub fn validate_rt_capabilities(config: &RealtimeConfig) -> ProbeResult<()> {
    if !config.enabled {
        return Ok(());
    }

    let caps = check_rt_capabilities();
    let mut issues = Vec::new();

    if !caps.preempt_rt {
        warn!("PREEMPT_RT kernel not detected. Preemption latencies will include kernel jitter.");
    }

    let needed = config.high_priority.max(config.low_priority);
    if !caps.can_use_rt_priority(needed) {
        issues.push(format!(
            "Cannot use RT scheduling (SCHED_{:?}) at priority {needed}: RLIMIT_RTPRIO={:?}, \
             is_root={}. Grant CAP_SYS_NICE capability or raise RLIMIT_RTPRIO.",
            config.policy, caps.rtprio_limit, caps.is_root
        ));
    }

    if config.lock_memory && !caps.can_lock_memory() {
        issues.push(format!(
            "Cannot lock memory: RLIMIT_MEMLOCK={:?}, is_root={}. \
             Grant CAP_IPC_LOCK capability or set RLIMIT_MEMLOCK to unlimited.",
            caps.memlock_limit, caps.is_root
        ));
    }

    if issues.is_empty() {
        info!("Real-time capabilities validated successfully");
        Ok(())
    } else {
        let message = format!(
            "Real-time requirements not met (fail_fast=true):\n  - {}",
            issues.join("\n  - ")
        );
        error!("{}", message);
        Err(ProbeError::Realtime(message))
    }
}
