//! Configuration loading
//!
//! A `machine.toml` stored in flash takes precedence; otherwise the copy
//! embedded at build time is used.

use core::str;
use defmt::*;

use madac_core::config::{parse_config, MachineConfig, ParseError};
use madac_hal_rp2040::flash::{FlashError, StorageKey};
use madac_hal_rp2040::{FlashStorageTrait, MAX_ITEM_SIZE};

/// Embedded default configuration (validated by build.rs)
const EMBEDDED_CONFIG: &str = include_str!("../machine.toml");

/// Configuration loading errors
#[derive(Debug, Clone, Copy, defmt::Format)]
pub enum ConfigError {
    /// Flash operation failed
    Flash(FlashError),
    /// Invalid UTF-8 in TOML data
    InvalidUtf8,
    /// TOML parsing failed
    Parse(ParseError),
}

impl From<FlashError> for ConfigError {
    fn from(e: FlashError) -> Self {
        ConfigError::Flash(e)
    }
}

/// Load the machine configuration
pub async fn load_config<F: FlashStorageTrait>(storage: &mut F) -> MachineConfig {
    match load_from_flash(storage).await {
        Ok(config) => {
            info!("Loaded configuration from flash");
            config
        }
        Err(ConfigError::Flash(FlashError::NotFound)) => {
            info!("No configuration in flash, using embedded machine.toml");
            embedded_config()
        }
        Err(e) => {
            warn!("Flash configuration rejected: {:?}, using embedded machine.toml", e);
            embedded_config()
        }
    }
}

async fn load_from_flash<F: FlashStorageTrait>(storage: &mut F) -> Result<MachineConfig, ConfigError> {
    let mut buffer = [0u8; MAX_ITEM_SIZE];
    let len = storage
        .read(StorageKey::MachineConfigToml, &mut buffer)
        .await?;
    debug!("Read {} bytes of TOML from flash", len);

    let text = str::from_utf8(&buffer[..len]).map_err(|_| ConfigError::InvalidUtf8)?;
    parse_config(text).map_err(ConfigError::Parse)
}

fn embedded_config() -> MachineConfig {
    match parse_config(EMBEDDED_CONFIG) {
        Ok(config) => config,
        Err(e) => {
            // build.rs validates the file, so only the parser and validator
            // disagreeing gets here
            error!("Embedded machine.toml rejected: {:?}, using defaults", e);
            MachineConfig::default()
        }
    }
}

/// Log the settings that matter when diagnosing a blind
pub fn log_config_summary(config: &MachineConfig) {
    let m = &config.motion;
    let t = &config.tmc;
    info!(
        "Motion: {} us/step, {} microsteps, timeout {} ms, allowance {}%",
        m.step_interval_us, m.microsteps, m.max_traversal_ms, m.arrival_allowance_pct
    );
    info!(
        "TMC2209: addr={}, run={}mA, hold={}mA, sgthrs={}, stealthchop={}",
        t.uart_address, t.run_current_ma, t.hold_current_ma, t.stall_threshold, t.stealthchop
    );
    debug!("Pins: {:?}", config.pins);
}
