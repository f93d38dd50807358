//! RP2040-specific HAL for the blinds actuator firmware
//!
//! Provides RP2040 implementations of the shared `madac-hal` traits:
//!
//! - Flash storage driver (implements `madac_hal::FlashStorage`)
//! - Pin bank handing out GPIOs by the numbers in `machine.toml`
//!
//! Step, direction and enable pins are plain `embassy_rp::gpio::Output`s and
//! are driven through `embedded-hal` by `madac-drivers`.

#![no_std]

pub mod flash;
pub mod pins;

// Re-export shared traits from madac-hal for convenience
pub use madac_hal::{FlashStorage as FlashStorageTrait, StorageKey, MAX_ITEM_SIZE};
pub use pins::{PinBank, PinError};
