//! Machine configuration types
//!
//! These types describe the motion tuning, the TMC2209 driver settings and
//! the board wiring of one actuator.

/// Pin configuration with optional inversion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PinConfig {
    /// GPIO pin number (0-29 for RP2040)
    pub pin: u8,
    /// Pin is active-low (inverted)
    pub inverted: bool,
    /// Enable internal pull-up
    pub pull_up: bool,
}

impl PinConfig {
    /// Create a new pin config
    pub const fn new(pin: u8) -> Self {
        Self {
            pin,
            inverted: false,
            pull_up: false,
        }
    }

    /// Create an inverted (active-low) pin
    pub const fn inverted(pin: u8) -> Self {
        Self {
            pin,
            inverted: true,
            pull_up: false,
        }
    }

    /// Create an active-low input with pull-up enabled
    pub const fn button(pin: u8) -> Self {
        Self {
            pin,
            inverted: true,
            pull_up: true,
        }
    }
}

/// Step loop tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MotionConfig {
    /// Period between step pulses in microseconds
    pub step_interval_us: u32,
    /// Maximum duration of one motion before it is declared a timeout
    pub max_traversal_ms: u32,
    /// Safety ceiling for each calibration phase
    pub calibration_ceiling_steps: u32,
    /// Steps during which the end-stop is ignored after leaving the zero stop
    pub release_steps: u32,
    /// Distance from the target, in percent of the full range, at which a
    /// stall is accepted as arrival
    pub arrival_allowance_pct: u8,
    /// Default direction convention used by calibration
    pub direction_inverted: bool,
    /// Microsteps per full step
    pub microsteps: u16,
}

impl MotionConfig {
    /// Default step period (5000 steps/s)
    pub const DEFAULT_STEP_INTERVAL_US: u32 = 200;
    /// Default motion time limit (2 minutes)
    pub const DEFAULT_MAX_TRAVERSAL_MS: u32 = 120_000;
    /// Default calibration ceiling
    pub const DEFAULT_CALIBRATION_CEILING_STEPS: u32 = 500_000;
    /// Default end-stop release distance (100 full steps at 16 microsteps)
    pub const DEFAULT_RELEASE_STEPS: u32 = 1_600;

    /// Create the default motion configuration
    pub const fn new() -> Self {
        Self {
            step_interval_us: Self::DEFAULT_STEP_INTERVAL_US,
            max_traversal_ms: Self::DEFAULT_MAX_TRAVERSAL_MS,
            calibration_ceiling_steps: Self::DEFAULT_CALIBRATION_CEILING_STEPS,
            release_steps: Self::DEFAULT_RELEASE_STEPS,
            arrival_allowance_pct: 5,
            direction_inverted: false,
            microsteps: 16,
        }
    }
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// TMC2209 driver settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Tmc2209Settings {
    /// UART slave address (0-3, set by MS1/MS2 pins)
    pub uart_address: u8,
    /// Run current in mA RMS
    pub run_current_ma: u16,
    /// Hold current in mA RMS
    pub hold_current_ma: u16,
    /// StallGuard threshold (SGTHRS), DIAG fires when SG_RESULT < 2 × value
    pub stall_threshold: u8,
    /// Lower velocity threshold for StallGuard and CoolStep (TCOOLTHRS)
    pub tcoolthrs: u32,
    /// CoolStep minimum StallGuard value (SEMIN)
    pub semin: u8,
    /// CoolStep hysteresis (SEMAX)
    pub semax: u8,
    /// CoolStep current down step speed (SEDN)
    pub sedn: u8,
    /// Chopper off time (TOFF)
    pub toff: u8,
    /// Use StealthChop instead of SpreadCycle
    pub stealthchop: bool,
}

impl Tmc2209Settings {
    /// Create the default driver settings
    pub const fn new() -> Self {
        Self {
            uart_address: 0,
            run_current_ma: 2000,
            hold_current_ma: 500,
            stall_threshold: 40,
            tcoolthrs: 0xFFFFF,
            semin: 0,
            semax: 2,
            sedn: 0b01,
            toff: 4,
            stealthchop: true,
        }
    }
}

impl Default for Tmc2209Settings {
    fn default() -> Self {
        Self::new()
    }
}

/// Board wiring
///
/// The TMC2209 UART is fixed to UART1 on GPIO8/GPIO9 and is not listed here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BoardPins {
    /// Step pulse output
    pub step: PinConfig,
    /// Direction output
    pub dir: PinConfig,
    /// Driver enable output (active-low)
    pub enable: PinConfig,
    /// TMC2209 DIAG input
    pub diag: PinConfig,
    /// Up button input
    pub button_up: PinConfig,
    /// Down button input
    pub button_down: PinConfig,
    /// Status LED output
    pub led: PinConfig,
}

impl BoardPins {
    /// Default wiring
    pub const fn new() -> Self {
        Self {
            step: PinConfig::new(11),
            dir: PinConfig::new(10),
            enable: PinConfig::inverted(12),
            diag: PinConfig::new(13),
            button_up: PinConfig::button(2),
            button_down: PinConfig::button(3),
            led: PinConfig::new(25),
        }
    }
}

impl Default for BoardPins {
    fn default() -> Self {
        Self::new()
    }
}

/// Complete machine configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MachineConfig {
    /// Step loop tuning
    pub motion: MotionConfig,
    /// Driver chip settings
    pub tmc: Tmc2209Settings,
    /// Board wiring
    pub pins: BoardPins,
}

impl MachineConfig {
    /// Create the default configuration
    pub const fn new() -> Self {
        Self {
            motion: MotionConfig::new(),
            tmc: Tmc2209Settings::new(),
            pins: BoardPins::new(),
        }
    }
}
