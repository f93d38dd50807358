//! Stepper capability trait
//!
//! The motor driver needs only four operations from the physical stage.
//! Adapters over concrete driver chips (TMC2209 step/dir, A4988, ...)
//! implement this trait; the state machine never sees the chip.

/// Logical travel direction
///
/// `Forward` increases the blind percentage, `Reverse` decreases it.
/// Mapping to a physical rotation is owned by the calibration parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Direction {
    /// Towards 100%
    Forward,
    /// Towards 0%
    Reverse,
}

impl Direction {
    /// Direction needed to travel from `from` to `to`
    ///
    /// Returns `None` when no travel is needed.
    pub fn between(from: u32, to: u32) -> Option<Self> {
        match to.cmp(&from) {
            core::cmp::Ordering::Greater => Some(Direction::Forward),
            core::cmp::Ordering::Less => Some(Direction::Reverse),
            core::cmp::Ordering::Equal => None,
        }
    }
}

/// Errors that can occur with stepper operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StepperError {
    /// A control pin could not be driven
    Pin,
    /// Communication error with the driver (UART/SPI)
    Communication,
    /// The driver reported a fault (short, overtemperature)
    DriverFault,
}

/// Minimal stepper capability
///
/// One call to [`step`](StepperCapability::step) emits exactly one physical
/// step pulse. Implementations must not buffer or coalesce steps.
pub trait StepperCapability {
    /// Power the driver stage
    fn enable(&mut self) -> Result<(), StepperError>;

    /// Remove power from the driver stage
    ///
    /// The motor no longer holds position while disabled.
    fn disable(&mut self) -> Result<(), StepperError>;

    /// Set the physical rotation direction for the following steps
    fn set_direction(&mut self, forward: bool) -> Result<(), StepperError>;

    /// Emit one step pulse
    fn step(&mut self) -> Result<(), StepperError>;
}

impl<T: StepperCapability + ?Sized> StepperCapability for &mut T {
    fn enable(&mut self) -> Result<(), StepperError> {
        (**self).enable()
    }

    fn disable(&mut self) -> Result<(), StepperError> {
        (**self).disable()
    }

    fn set_direction(&mut self, forward: bool) -> Result<(), StepperError> {
        (**self).set_direction(forward)
    }

    fn step(&mut self) -> Result<(), StepperError> {
        (**self).step()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_between() {
        assert_eq!(Direction::between(0, 10), Some(Direction::Forward));
        assert_eq!(Direction::between(10, 0), Some(Direction::Reverse));
        assert_eq!(Direction::between(7, 7), None);
    }
}
