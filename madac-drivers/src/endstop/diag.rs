//! StallGuard DIAG end-stop
//!
//! The TMC2209 raises DIAG when the StallGuard result drops below the
//! threshold, which happens when the blind runs into its mechanical end.
//! The pin is sampled once per step. A stall is reported only after the
//! pin stays active for several samples, and the first samples after
//! [`clear`](EndStop::clear) are ignored while the motor accelerates away
//! from standstill, where StallGuard readings are meaningless.

use embedded_hal::digital::InputPin;
use madac_core::traits::EndStop;

/// DIAG sampling configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DiagConfig {
    /// Active level (true = high when stalled)
    pub active_high: bool,
    /// Consecutive active samples before a stall is reported
    pub debounce_samples: u16,
    /// Samples ignored after a clear
    pub blanking_samples: u16,
}

impl Default for DiagConfig {
    fn default() -> Self {
        Self {
            active_high: true,
            debounce_samples: 8,
            blanking_samples: 400,
        }
    }
}

/// End-stop reading the TMC2209 DIAG output
pub struct DiagEndStop<P> {
    pin: P,
    config: DiagConfig,
    counter: u16,
    blanking: u16,
    /// Latched until cleared
    stalled: bool,
}

impl<P: InputPin> DiagEndStop<P> {
    /// Create a DIAG end-stop
    pub fn new(pin: P, config: DiagConfig) -> Self {
        Self {
            pin,
            config,
            counter: 0,
            blanking: config.blanking_samples,
            stalled: false,
        }
    }

    fn pin_active(&mut self) -> bool {
        // An unreadable pin reads as stalled so the motion stops
        match self.pin.is_high() {
            Ok(high) => high == self.config.active_high,
            Err(_) => true,
        }
    }
}

impl<P: InputPin> EndStop for DiagEndStop<P> {
    fn is_triggered(&mut self) -> bool {
        if self.stalled {
            return true;
        }
        if self.blanking > 0 {
            self.blanking -= 1;
            return false;
        }

        if self.pin_active() {
            self.counter = self.counter.saturating_add(1);
            if self.counter >= self.config.debounce_samples {
                self.stalled = true;
            }
        } else {
            self.counter = 0;
        }
        self.stalled
    }

    fn clear(&mut self) {
        self.counter = 0;
        self.stalled = false;
        self.blanking = self.config.blanking_samples;
    }
}
