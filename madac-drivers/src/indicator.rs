//! Status LED
//!
//! One LED shows the driver status: off when idle, solid while moving,
//! slow blink while calibrating and fast blink on error.

use embedded_hal::digital::OutputPin;
use madac_core::state::DriverStatus;

/// Blink period while calibrating (ms)
pub const SLOW_BLINK_MS: u64 = 1000;

/// Blink period on error (ms)
pub const FAST_BLINK_MS: u64 = 200;

/// LED pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LedPattern {
    Off,
    Solid,
    /// 50% duty square wave
    Blink { period_ms: u64 },
}

impl LedPattern {
    /// Pattern for a driver status
    pub fn for_status(status: DriverStatus) -> Self {
        match status {
            DriverStatus::Idle => LedPattern::Off,
            DriverStatus::Moving => LedPattern::Solid,
            DriverStatus::Calibrating => LedPattern::Blink {
                period_ms: SLOW_BLINK_MS,
            },
            DriverStatus::Error(_) => LedPattern::Blink {
                period_ms: FAST_BLINK_MS,
            },
        }
    }

    /// LED level at `now_ms`
    pub fn is_lit(&self, now_ms: u64) -> bool {
        match *self {
            LedPattern::Off => false,
            LedPattern::Solid => true,
            LedPattern::Blink { period_ms } => {
                let period = period_ms.max(2);
                now_ms % period < period / 2
            }
        }
    }
}

/// LED driven from the driver status
pub struct StatusLed<P> {
    pin: P,
    active_low: bool,
    pattern: LedPattern,
    /// Level last written to the pin
    lit: Option<bool>,
}

impl<P: OutputPin> StatusLed<P> {
    /// Create an LED indicator, initially off
    pub fn new(pin: P, active_low: bool) -> Self {
        Self {
            pin,
            active_low,
            pattern: LedPattern::Off,
            lit: None,
        }
    }

    /// Current pattern
    pub fn pattern(&self) -> LedPattern {
        self.pattern
    }

    /// Select the pattern for `status`
    pub fn set_status(&mut self, status: DriverStatus) {
        self.pattern = LedPattern::for_status(status);
    }

    /// Drive the pin for `now_ms`; the pin is written only on change
    pub fn update(&mut self, now_ms: u64) -> Result<(), P::Error> {
        let lit = self.pattern.is_lit(now_ms);
        if self.lit == Some(lit) {
            return Ok(());
        }

        if lit != self.active_low {
            self.pin.set_high()?;
        } else {
            self.pin.set_low()?;
        }
        self.lit = Some(lit);
        Ok(())
    }
}
