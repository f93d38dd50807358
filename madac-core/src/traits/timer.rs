//! Step pacing timer trait
//!
//! The handler paces step emission with a periodic timer instead of
//! sleeping, so the cadence does not drift with the work done per step.

/// Periodic step timer
pub trait StepTimer {
    /// Wait for the next period boundary
    fn next(&mut self) -> impl core::future::Future<Output = ()>;

    /// Restart the period from now
    ///
    /// Called when a new motion starts so the first step is not emitted
    /// early because of time spent idle.
    fn restart(&mut self);

    /// Monotonic time in milliseconds
    fn now_ms(&self) -> u64;
}
