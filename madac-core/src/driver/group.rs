//! Groups of motor drivers
//!
//! Several blinds driven from one board are addressed by index. Each
//! driver stays independent; the group only routes calls.

use embassy_sync::blocking_mutex::raw::RawMutex;

use super::shared::MotorDriver;

/// Fixed set of drivers addressed by blind index
pub struct DriverGroup<'d, M: RawMutex, const N: usize> {
    drivers: [&'d MotorDriver<M>; N],
}

impl<'d, M: RawMutex, const N: usize> DriverGroup<'d, M, N> {
    /// Create a group from drivers
    pub const fn new(drivers: [&'d MotorDriver<M>; N]) -> Self {
        Self { drivers }
    }

    /// Driver with the given blind index
    pub fn get(&self, index: u8) -> Option<&'d MotorDriver<M>> {
        self.drivers.iter().copied().find(|d| d.index() == index)
    }

    /// Cancel the motion of one blind without touching the others
    ///
    /// Returns `true` if a running motion was cancelled.
    pub fn interrupt_for_index(&self, index: u8) -> bool {
        self.drivers
            .iter()
            .fold(false, |hit, d| d.interrupt_for_index(index) || hit)
    }

    /// Cancel every running motion
    pub fn cancel_all(&self) -> usize {
        self.drivers
            .iter()
            .filter(|d| d.cancel_current_request())
            .count()
    }

    /// Iterate over the drivers
    pub fn iter(&self) -> impl Iterator<Item = &'d MotorDriver<M>> + '_ {
        self.drivers.iter().copied()
    }
}
