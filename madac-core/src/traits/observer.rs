//! Status observer trait
//!
//! Logging and indicator sinks receive status transitions through this
//! trait. Calls happen on the handler context and must return quickly;
//! implementations drop notifications rather than block.

use crate::state::DriverStatus;
use crate::traits::StoreError;

/// Passive sink for driver notifications
pub trait StatusObserver {
    /// Driver status changed
    fn status_changed(&mut self, index: u8, from: DriverStatus, to: DriverStatus);

    /// A motion settled (arrived, cancelled or faulted) at `step`
    fn position_settled(&mut self, _index: u8, _step: u32) {}

    /// Persisting state failed; the driver keeps running
    fn persist_failed(&mut self, _index: u8, _error: StoreError) {}
}

/// Observer that discards every notification
#[derive(Debug, Clone, Copy, Default)]
pub struct NullObserver;

impl StatusObserver for NullObserver {
    fn status_changed(&mut self, _index: u8, _from: DriverStatus, _to: DriverStatus) {}
}
