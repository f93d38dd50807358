//! Driver status definition

use super::events::DriverEvent;

/// Driver status
///
/// `Calibrating` and `Moving` are distinct and mutually exclusive. Both
/// count as "running". `Idle` and `Error` are re-enterable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DriverStatus {
    /// Not stepping, ready for requests
    #[default]
    Idle,
    /// Running the blind traversal that learns the full range
    Calibrating,
    /// Stepping towards an ordinary target
    Moving,
    /// Fault detected; stepping stopped until recalibration or reset
    Error(Fault),
}

/// Faults detected asynchronously by the step loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Fault {
    /// End-stop fired away from the target
    Stall,
    /// Motion exceeded the maximum traversal time
    Timeout,
    /// The stepper capability failed
    Hardware,
    /// No end-stop within the calibration ceiling
    CalibrationFailed,
}

impl DriverStatus {
    /// Check if the step loop is active in this status
    pub fn is_running(&self) -> bool {
        matches!(self, DriverStatus::Moving | DriverStatus::Calibrating)
    }

    /// Get the fault, if any
    pub fn fault(&self) -> Option<Fault> {
        match self {
            DriverStatus::Error(fault) => Some(*fault),
            _ => None,
        }
    }

    /// Process an event and return the next status
    pub fn transition(self, event: DriverEvent) -> Self {
        use DriverEvent::*;
        use DriverStatus::*;

        match (self, event) {
            // Accepting work; a running motion is replaced, never merged
            (Idle | Moving | Calibrating, MotionAccepted) => Moving,
            (Idle | Moving | Calibrating | Error(_), CalibrationAccepted) => Calibrating,

            // Settling
            (Moving, Arrived) => Idle,
            (Calibrating, Calibrated) => Idle,
            (Moving | Calibrating, Cancelled) => Idle,

            // Faults only come from the step loop
            (Moving | Calibrating, FaultDetected(fault)) => Error(fault),

            // Re-synchronisation clears an error
            (Idle | Error(_), Resynced) => Idle,

            // Default: stay in current status
            _ => self,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_move_and_arrive() {
        let status = DriverStatus::Idle.transition(DriverEvent::MotionAccepted);
        assert_eq!(status, DriverStatus::Moving);
        assert!(status.is_running());
        assert_eq!(status.transition(DriverEvent::Arrived), DriverStatus::Idle);
    }

    #[test]
    fn test_calibration_exclusive_of_moving() {
        let status = DriverStatus::Moving.transition(DriverEvent::CalibrationAccepted);
        assert_eq!(status, DriverStatus::Calibrating);
        // Arrival belongs to ordinary motion
        assert_eq!(status.transition(DriverEvent::Arrived), DriverStatus::Calibrating);
        assert_eq!(status.transition(DriverEvent::Calibrated), DriverStatus::Idle);
    }

    #[test]
    fn test_fault_from_running_states() {
        for status in [DriverStatus::Moving, DriverStatus::Calibrating] {
            let next = status.transition(DriverEvent::FaultDetected(Fault::Stall));
            assert_eq!(next, DriverStatus::Error(Fault::Stall));
            assert_eq!(next.fault(), Some(Fault::Stall));
        }
    }

    #[test]
    fn test_fault_ignored_when_idle() {
        let next = DriverStatus::Idle.transition(DriverEvent::FaultDetected(Fault::Timeout));
        assert_eq!(next, DriverStatus::Idle);
    }

    #[test]
    fn test_error_requires_recovery() {
        let error = DriverStatus::Error(Fault::Timeout);
        assert_eq!(error.transition(DriverEvent::MotionAccepted), error);
        assert_eq!(error.transition(DriverEvent::Cancelled), error);
        assert_eq!(error.transition(DriverEvent::Resynced), DriverStatus::Idle);
        assert_eq!(
            error.transition(DriverEvent::CalibrationAccepted),
            DriverStatus::Calibrating
        );
    }

    #[test]
    fn test_cancel_returns_to_idle() {
        for status in [DriverStatus::Moving, DriverStatus::Calibrating] {
            assert_eq!(status.transition(DriverEvent::Cancelled), DriverStatus::Idle);
        }
        assert_eq!(
            DriverStatus::Idle.transition(DriverEvent::Cancelled),
            DriverStatus::Idle
        );
    }
}
