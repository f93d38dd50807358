//! End-stop detection trait
//!
//! An end-stop is anything that reports "the blind cannot travel further":
//! a StallGuard DIAG output, a limit switch, or a current sense comparator.

/// End-stop / stall sensor
pub trait EndStop {
    /// Check whether the end-stop condition is currently present
    fn is_triggered(&mut self) -> bool;

    /// Clear any latched condition before travelling away from a stop
    fn clear(&mut self) {}
}

/// End-stop for installations without any sensor
///
/// Calibration always fails at the safety ceiling with this sensor.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoEndStop;

impl EndStop for NoEndStop {
    fn is_triggered(&mut self) -> bool {
        false
    }
}

impl<T: EndStop + ?Sized> EndStop for &mut T {
    fn is_triggered(&mut self) -> bool {
        (**self).is_triggered()
    }

    fn clear(&mut self) {
        (**self).clear()
    }
}
