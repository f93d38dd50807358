//! Normalized motion requests
//!
//! Every interaction source (buttons, voice, network) is reduced to a
//! [`MotionRequest`] before it reaches the motor driver.

/// Highest accepted percentage
pub const MAX_PERCENTAGE: u8 = 100;

/// Request consumed by `MotorDriver::fulfill_request`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MotionRequest {
    /// Target open percentage, 0 closed to 100 open
    Percentage(u8),
    /// Absolute step target
    Steps(u32),
    /// Full end-to-end traversal that learns the range
    Calibrate,
}

impl MotionRequest {
    /// Check if this is the blind traversal request
    pub fn is_calibration(&self) -> bool {
        matches!(self, MotionRequest::Calibrate)
    }

    /// Check if the target needs a known full range
    pub fn needs_calibration(&self) -> bool {
        matches!(self, MotionRequest::Percentage(_))
    }

    /// Resolve the step target against the full range
    ///
    /// Returns `None` for the calibration request and for a percentage
    /// without a full range. With no full range an absolute step target
    /// is used as is.
    pub fn target_step(&self, full: Option<u32>) -> Option<u32> {
        match (*self, full) {
            (MotionRequest::Percentage(p), Some(full)) => Some(percent_to_step(p, full)),
            (MotionRequest::Percentage(_), None) => None,
            (MotionRequest::Steps(s), Some(full)) => Some(s.min(full)),
            (MotionRequest::Steps(s), None) => Some(s),
            (MotionRequest::Calibrate, _) => None,
        }
    }
}

/// Convert a percentage to a step position
///
/// `round(p / 100 × full)`, with `p` clamped to 100.
pub fn percent_to_step(percentage: u8, full: u32) -> u32 {
    let p = percentage.min(MAX_PERCENTAGE) as u64;
    ((p * full as u64 + 50) / 100) as u32
}

/// Convert a step position to a percentage
///
/// `round(step / full × 100)`, with `step` clamped to `full`. A zero range
/// reports 0.
pub fn step_to_percent(step: u32, full: u32) -> u8 {
    if full == 0 {
        return 0;
    }
    let step = step.min(full) as u64;
    let full = full as u64;
    ((step * 100 + full / 2) / full) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_percent_to_step() {
        assert_eq!(percent_to_step(0, 4800), 0);
        assert_eq!(percent_to_step(50, 4800), 2400);
        assert_eq!(percent_to_step(100, 4800), 4800);
        assert_eq!(percent_to_step(33, 1000), 330);
        assert_eq!(percent_to_step(33, 100), 33);
        assert_eq!(percent_to_step(150, 4800), 4800);
    }

    #[test]
    fn test_step_to_percent() {
        assert_eq!(step_to_percent(0, 4800), 0);
        assert_eq!(step_to_percent(2400, 4800), 50);
        assert_eq!(step_to_percent(4800, 4800), 100);
        assert_eq!(step_to_percent(9999, 4800), 100);
        assert_eq!(step_to_percent(10, 0), 0);
    }

    #[test]
    fn test_target_step() {
        assert_eq!(MotionRequest::Percentage(25).target_step(Some(4000)), Some(1000));
        assert_eq!(MotionRequest::Percentage(25).target_step(None), None);
        assert_eq!(MotionRequest::Steps(9000).target_step(Some(4000)), Some(4000));
        assert_eq!(MotionRequest::Steps(9000).target_step(None), Some(9000));
        assert_eq!(MotionRequest::Calibrate.target_step(Some(4000)), None);
    }

    proptest! {
        #[test]
        fn prop_percent_roundtrip_within_one(p in 0u8..=100, full in 100u32..2_000_000) {
            let step = percent_to_step(p, full);
            prop_assert!(step <= full);
            let back = step_to_percent(step, full) as i16;
            prop_assert!((back - p as i16).abs() <= 1);
        }

        #[test]
        fn prop_step_to_percent_bounded(step in any::<u32>(), full in 1u32..=u32::MAX) {
            prop_assert!(step_to_percent(step, full) <= 100);
        }

        #[test]
        fn prop_percent_to_step_monotonic(p in 0u8..100, full in 1u32..2_000_000) {
            prop_assert!(percent_to_step(p, full) <= percent_to_step(p + 1, full));
        }
    }
}
