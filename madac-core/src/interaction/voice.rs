//! Voice assistant request shape
//!
//! A voice assistant emulating a dimmable light reports an on/off state
//! and a brightness value in 0..=255. Brightness maps to the open
//! percentage; "off" closes the blind.

use crate::controller::Intent;
use crate::motion::{MotionRequest, MAX_PERCENTAGE};

/// Request as delivered by the voice assistant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct VoiceRequest {
    /// Device switched on
    pub on: bool,
    /// Brightness-style value, 0..=255
    pub value: u8,
}

impl VoiceRequest {
    /// Create a voice request
    pub const fn new(on: bool, value: u8) -> Self {
        Self { on, value }
    }

    /// Target percentage, rounded to nearest
    pub fn percentage(&self) -> u8 {
        if !self.on {
            return 0;
        }
        ((self.value as u16 * MAX_PERCENTAGE as u16 + 127) / 255) as u8
    }

    /// Normalised intent
    pub fn intent(&self) -> Intent {
        Intent::Move(MotionRequest::Percentage(self.percentage()))
    }
}

/// Brightness value reported back for a percentage
pub fn percentage_to_value(percentage: u8) -> u8 {
    let p = percentage.min(MAX_PERCENTAGE) as u16;
    ((p * 255 + 50) / 100) as u8
}
