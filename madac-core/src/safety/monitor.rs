//! Motion monitor implementation
//!
//! Tracks the start of the current motion and evaluates the traversal
//! time limit and the arrival allowance.

use crate::config::MotionConfig;
use crate::state::Fault;

/// Result of a safety check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SafetyStatus {
    /// All conditions normal
    Ok,
    /// Safety condition violated
    Fault(Fault),
}

/// What an end-stop report means at the current position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EndStopVerdict {
    /// Close enough to the target to treat as arrival
    Arrived,
    /// Blocked away from the target
    Stalled,
}

/// Safety monitor for one motor driver
#[derive(Debug, Clone)]
pub struct MotionMonitor {
    /// Maximum duration of one motion (ms)
    max_traversal_ms: u32,
    /// Arrival allowance in percent of the full range
    allowance_pct: u8,
    /// Start of the current motion (ms), None when idle
    started_at_ms: Option<u64>,
}

impl MotionMonitor {
    /// Create a new monitor from the motion configuration
    pub fn new(config: &MotionConfig) -> Self {
        Self {
            max_traversal_ms: config.max_traversal_ms,
            allowance_pct: config.arrival_allowance_pct,
            started_at_ms: None,
        }
    }

    /// Record the start of a motion
    pub fn motion_started(&mut self, now_ms: u64) {
        self.started_at_ms = Some(now_ms);
    }

    /// Forget the current motion
    pub fn motion_settled(&mut self) {
        self.started_at_ms = None;
    }

    /// Time since the motion started
    pub fn elapsed_ms(&self, now_ms: u64) -> u64 {
        self.started_at_ms
            .map(|start| now_ms.saturating_sub(start))
            .unwrap_or(0)
    }

    /// Check the traversal time limit
    pub fn check(&self, now_ms: u64) -> SafetyStatus {
        if self.started_at_ms.is_some() && self.elapsed_ms(now_ms) > self.max_traversal_ms as u64 {
            return SafetyStatus::Fault(Fault::Timeout);
        }
        SafetyStatus::Ok
    }

    /// Allowed distance from the target, in steps
    ///
    /// Without a known full range there is no allowance.
    pub fn allowance_steps(&self, full: Option<u32>) -> u32 {
        full.map(|full| (full as u64 * self.allowance_pct as u64 / 100) as u32)
            .unwrap_or(0)
    }

    /// Classify an end-stop report during an ordinary motion
    pub fn classify_end_stop(&self, current: u32, expected: u32, full: Option<u32>) -> EndStopVerdict {
        if current.abs_diff(expected) <= self.allowance_steps(full) {
            EndStopVerdict::Arrived
        } else {
            EndStopVerdict::Stalled
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor() -> MotionMonitor {
        MotionMonitor::new(&MotionConfig {
            max_traversal_ms: 1000,
            ..MotionConfig::new()
        })
    }

    #[test]
    fn test_timeout() {
        let mut m = monitor();
        assert_eq!(m.check(5000), SafetyStatus::Ok);

        m.motion_started(100);
        assert_eq!(m.check(1100), SafetyStatus::Ok);
        assert_eq!(m.check(1101), SafetyStatus::Fault(Fault::Timeout));

        m.motion_settled();
        assert_eq!(m.check(5000), SafetyStatus::Ok);
    }

    #[test]
    fn test_elapsed_with_clock_behind_start() {
        let mut m = monitor();
        m.motion_started(500);
        assert_eq!(m.elapsed_ms(400), 0);
    }

    #[test]
    fn test_allowance() {
        let m = monitor();
        // 5% of 4800
        assert_eq!(m.allowance_steps(Some(4800)), 240);
        assert_eq!(m.allowance_steps(None), 0);

        assert_eq!(m.classify_end_stop(4600, 4800, Some(4800)), EndStopVerdict::Arrived);
        assert_eq!(m.classify_end_stop(4500, 4800, Some(4800)), EndStopVerdict::Stalled);
        assert_eq!(m.classify_end_stop(10, 0, None), EndStopVerdict::Stalled);
    }
}
