//! The seam between the measurement tasks and whatever delivers interrupts.
//!
//! A platform provides the cycle counter, the busy-wait step, the Low Task's
//! software interrupt line, and the periodic timer's status flag. The tasks
//! are generic over it so the same code runs on the simulated core and on
//! the host harness.

use rms_common::time::Timestamp;

/// Hardware services consumed by the High and Low tasks.
///
/// Every method must be callable from either task at any time and must not
/// block.
pub trait Platform {
    /// Read the monotonic cycle counter.
    fn now(&self) -> Timestamp;

    /// Execute one busy-wait iteration.
    ///
    /// This is an instruction boundary: a higher-priority interrupt that
    /// became due may be taken here.
    fn spin(&self);

    /// Raise the Low Task's software-pending request.
    fn pend_low(&self);

    /// Withdraw the Low Task's software-pending request.
    fn unpend_low(&self);

    /// Returns true if the periodic timer's status flag is set.
    fn period_pending(&self) -> bool;

    /// Clear the periodic timer's status flag so the next firing is seen.
    fn acknowledge_period(&self);
}
