//! Step/dir stepper stage
//!
//! Drives any step/dir/enable driver chip (TMC2209 in standalone or UART
//! mode, A4988, DRV8825) through `embedded-hal` output pins. Each call to
//! `step` emits one pulse; pacing between pulses is owned by the caller.

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;
use madac_core::traits::{StepperCapability, StepperError};

/// Pulse timing for the driver chip
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StepTiming {
    /// STEP high time in nanoseconds
    pub pulse_ns: u32,
    /// DIR setup time before the next STEP edge in nanoseconds
    pub dir_setup_ns: u32,
}

impl StepTiming {
    /// TMC2209 minimum timings with margin (datasheet: 100 ns / 20 ns)
    pub const TMC2209: Self = Self {
        pulse_ns: 2_000,
        dir_setup_ns: 1_000,
    };
}

impl Default for StepTiming {
    fn default() -> Self {
        Self::TMC2209
    }
}

/// Stepper stage driven by STEP, DIR and EN pins
pub struct StepDirStepper<STEP, DIR, EN, D> {
    step: STEP,
    dir: DIR,
    enable: EN,
    delay: D,
    /// EN is active low on most driver chips
    enable_inverted: bool,
    timing: StepTiming,
    enabled: bool,
}

impl<STEP, DIR, EN, D> StepDirStepper<STEP, DIR, EN, D>
where
    STEP: OutputPin,
    DIR: OutputPin,
    EN: OutputPin,
    D: DelayNs,
{
    /// Create a stepper stage
    ///
    /// The pins are not touched until the first call; create the EN pin at
    /// its disabled level.
    pub fn new(step: STEP, dir: DIR, enable: EN, delay: D, enable_inverted: bool) -> Self {
        Self {
            step,
            dir,
            enable,
            delay,
            enable_inverted,
            timing: StepTiming::default(),
            enabled: false,
        }
    }

    /// Override the pulse timing
    pub fn with_timing(mut self, timing: StepTiming) -> Self {
        self.timing = timing;
        self
    }

    /// Check if the stage was last enabled
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Release the pins and delay
    pub fn into_inner(self) -> (STEP, DIR, EN, D) {
        (self.step, self.dir, self.enable, self.delay)
    }

    fn drive_enable(&mut self, on: bool) -> Result<(), StepperError> {
        let level_high = on != self.enable_inverted;
        let result = if level_high {
            self.enable.set_high()
        } else {
            self.enable.set_low()
        };
        result.map_err(|_| StepperError::Pin)?;
        self.enabled = on;
        Ok(())
    }
}

impl<STEP, DIR, EN, D> StepperCapability for StepDirStepper<STEP, DIR, EN, D>
where
    STEP: OutputPin,
    DIR: OutputPin,
    EN: OutputPin,
    D: DelayNs,
{
    fn enable(&mut self) -> Result<(), StepperError> {
        self.drive_enable(true)
    }

    fn disable(&mut self) -> Result<(), StepperError> {
        self.drive_enable(false)
    }

    fn set_direction(&mut self, forward: bool) -> Result<(), StepperError> {
        let result = if forward {
            self.dir.set_high()
        } else {
            self.dir.set_low()
        };
        result.map_err(|_| StepperError::Pin)?;
        self.delay.delay_ns(self.timing.dir_setup_ns);
        Ok(())
    }

    fn step(&mut self) -> Result<(), StepperError> {
        self.step.set_high().map_err(|_| StepperError::Pin)?;
        self.delay.delay_ns(self.timing.pulse_ns);
        self.step.set_low().map_err(|_| StepperError::Pin)
    }
}
