//! Events that trigger status transitions

use super::status::Fault;

/// Events that can trigger status transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DriverEvent {
    // Caller side
    /// An ordinary positioning request was accepted
    MotionAccepted,
    /// A blind traversal (calibration) request was accepted
    CalibrationAccepted,
    /// Position was forced without motion
    Resynced,

    // Handler side
    /// The in-progress motion reached its target
    Arrived,
    /// The in-progress motion or calibration was cancelled at a step boundary
    Cancelled,
    /// Calibration found both end-stops
    Calibrated,
    /// The handler detected a fault
    FaultDetected(Fault),
}
