//! Pin allocation by number
//!
//! Board pins come from `machine.toml` as GPIO numbers. The bank owns the
//! GPIOs not claimed by fixed peripherals and hands each one out at most once.

use embassy_rp::gpio::AnyPin;
use embassy_rp::Peri;

/// Number of user GPIOs on the RP2040
pub const GPIO_COUNT: usize = 30;

/// Error when requesting a pin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PinError {
    /// Pin number out of range (0-29 valid)
    InvalidPin(u8),
    /// Pin already taken or reserved
    Unavailable(u8),
}

/// Owner of the configurable GPIO pins
pub struct PinBank {
    pins: [Option<Peri<'static, AnyPin>>; GPIO_COUNT],
}

impl PinBank {
    /// Create a bank indexed by GPIO number
    ///
    /// `None` entries are reserved and never handed out.
    pub fn new(pins: [Option<Peri<'static, AnyPin>>; GPIO_COUNT]) -> Self {
        Self { pins }
    }

    /// Take a pin by number
    pub fn take(&mut self, pin_num: u8) -> Result<Peri<'static, AnyPin>, PinError> {
        self.pins
            .get_mut(pin_num as usize)
            .ok_or(PinError::InvalidPin(pin_num))?
            .take()
            .ok_or(PinError::Unavailable(pin_num))
    }
}
