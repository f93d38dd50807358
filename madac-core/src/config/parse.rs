//! Minimal `machine.toml` parser
//!
//! Handles only the subset needed for the actuator configuration and
//! does NOT support all of TOML. It allocates nothing.
//!
//! Supported features:
//! - `[motion]`, `[tmc2209]` and `[pins]` section headers
//! - Key = value pairs (integer, hex integer, boolean, pin string)
//! - Comments (# ...)
//!
//! Unknown sections and keys are rejected so typos do not silently fall
//! back to defaults.

use super::machine::{MachineConfig, PinConfig};

/// Parse error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ParseError {
    /// Invalid or unknown section header
    InvalidSection,
    /// Line is not `key = value`
    InvalidLine,
    /// Unknown key for the current section
    UnknownKey,
    /// Invalid value type or out of range
    InvalidValue,
    /// Invalid pin string
    InvalidPin,
}

/// Current parsing context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Root,
    Motion,
    Tmc2209,
    Pins,
}

/// Parse TOML configuration into MachineConfig
///
/// Keys that are not present keep their default value.
pub fn parse_config(input: &str) -> Result<MachineConfig, ParseError> {
    let mut config = MachineConfig::new();
    let mut section = Section::Root;

    for line in input.lines() {
        let line = strip_comment(line).trim();

        if line.is_empty() {
            continue;
        }

        if line.starts_with('[') && line.ends_with(']') {
            section = parse_section_header(&line[1..line.len() - 1])?;
            continue;
        }

        let (key, value) = parse_key_value(line).ok_or(ParseError::InvalidLine)?;
        apply_value(section, key, value, &mut config)?;
    }

    Ok(config)
}

/// Parse section header like "motion" or "tmc2209"
fn parse_section_header(header: &str) -> Result<Section, ParseError> {
    match header.trim() {
        "motion" => Ok(Section::Motion),
        "tmc2209" => Ok(Section::Tmc2209),
        "pins" => Ok(Section::Pins),
        _ => Err(ParseError::InvalidSection),
    }
}

/// Remove a trailing comment that is not inside a string
fn strip_comment(line: &str) -> &str {
    match line.find('#') {
        Some(hash_pos) if line[..hash_pos].matches('"').count() % 2 == 0 => &line[..hash_pos],
        _ => line,
    }
}

/// Split a line into key and value
fn parse_key_value(line: &str) -> Option<(&str, &str)> {
    let eq_pos = line.find('=')?;
    let key = line[..eq_pos].trim();
    let value = line[eq_pos + 1..].trim();

    if key.is_empty() || value.is_empty() {
        return None;
    }

    Some((key, value))
}

/// Strip surrounding quotes from a string value
fn parse_string(value: &str) -> &str {
    if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
        &value[1..value.len() - 1]
    } else {
        // Allow unquoted strings for simple values
        value
    }
}

/// Parse an unsigned integer value, decimal, `0x` hex or `0b` binary,
/// `_` separators allowed
fn parse_int<T: TryFrom<u64>>(value: &str) -> Result<T, ParseError> {
    let (digits, radix) = if let Some(hex) = value.strip_prefix("0x") {
        (hex, 16)
    } else if let Some(bin) = value.strip_prefix("0b") {
        (bin, 2)
    } else {
        (value, 10)
    };

    if digits.is_empty() {
        return Err(ParseError::InvalidValue);
    }

    let mut acc: u64 = 0;
    for c in digits.chars() {
        if c == '_' {
            continue;
        }
        let d = c.to_digit(radix).ok_or(ParseError::InvalidValue)?;
        acc = acc
            .checked_mul(radix as u64)
            .and_then(|v| v.checked_add(d as u64))
            .ok_or(ParseError::InvalidValue)?;
    }

    T::try_from(acc).map_err(|_| ParseError::InvalidValue)
}

/// Parse a register field no wider than `max`
fn parse_bounded(value: &str, max: u8) -> Result<u8, ParseError> {
    let v: u8 = parse_int(value)?;
    if v > max {
        return Err(ParseError::InvalidValue);
    }
    Ok(v)
}

/// Parse a boolean value
fn parse_bool(value: &str) -> Result<bool, ParseError> {
    match value {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(ParseError::InvalidValue),
    }
}

/// Parse a pin string like "gpio11", "!gpio12", "^gpio4"
fn parse_pin(value: &str) -> Result<PinConfig, ParseError> {
    let mut s = parse_string(value);
    let mut inverted = false;
    let mut pull_up = false;

    loop {
        if let Some(rest) = s.strip_prefix('!') {
            inverted = true;
            s = rest;
        } else if let Some(rest) = s.strip_prefix('^') {
            pull_up = true;
            s = rest;
        } else {
            break;
        }
    }

    let num = s.strip_prefix("gpio").ok_or(ParseError::InvalidPin)?;
    let pin: u8 = num.parse().map_err(|_| ParseError::InvalidPin)?;
    if pin > 29 {
        return Err(ParseError::InvalidPin);
    }

    Ok(PinConfig {
        pin,
        inverted,
        pull_up,
    })
}

/// Apply a parsed value to the configuration
fn apply_value(
    section: Section,
    key: &str,
    value: &str,
    config: &mut MachineConfig,
) -> Result<(), ParseError> {
    match section {
        Section::Root => return Err(ParseError::UnknownKey),
        Section::Motion => {
            let m = &mut config.motion;
            match key {
                "step_interval_us" => m.step_interval_us = parse_int(value)?,
                "max_traversal_ms" => m.max_traversal_ms = parse_int(value)?,
                "calibration_ceiling_steps" => m.calibration_ceiling_steps = parse_int(value)?,
                "release_steps" => m.release_steps = parse_int(value)?,
                "arrival_allowance_pct" => {
                    let pct: u8 = parse_int(value)?;
                    if pct > 100 {
                        return Err(ParseError::InvalidValue);
                    }
                    m.arrival_allowance_pct = pct;
                }
                "direction_inverted" => m.direction_inverted = parse_bool(value)?,
                "microsteps" => {
                    let ms: u16 = parse_int(value)?;
                    if !ms.is_power_of_two() || ms > 256 {
                        return Err(ParseError::InvalidValue);
                    }
                    m.microsteps = ms;
                }
                _ => return Err(ParseError::UnknownKey),
            }
        }
        Section::Tmc2209 => {
            let t = &mut config.tmc;
            match key {
                "uart_address" => {
                    let addr: u8 = parse_int(value)?;
                    if addr > 3 {
                        return Err(ParseError::InvalidValue);
                    }
                    t.uart_address = addr;
                }
                "run_current_ma" => t.run_current_ma = parse_int(value)?,
                "hold_current_ma" => t.hold_current_ma = parse_int(value)?,
                "stall_threshold" => t.stall_threshold = parse_int(value)?,
                "tcoolthrs" => {
                    let v: u32 = parse_int(value)?;
                    if v > 0xFFFFF {
                        return Err(ParseError::InvalidValue);
                    }
                    t.tcoolthrs = v;
                }
                "semin" => t.semin = parse_bounded(value, 15)?,
                "semax" => t.semax = parse_bounded(value, 15)?,
                "sedn" => t.sedn = parse_bounded(value, 3)?,
                "toff" => t.toff = parse_bounded(value, 15)?,
                "stealthchop" => t.stealthchop = parse_bool(value)?,
                _ => return Err(ParseError::UnknownKey),
            }
        }
        Section::Pins => {
            let p = &mut config.pins;
            let pin = parse_pin(value)?;
            match key {
                "step" => p.step = pin,
                "dir" => p.dir = pin,
                "enable" => p.enable = pin,
                "diag" => p.diag = pin,
                "button_up" => p.button_up = pin,
                "button_down" => p.button_down = pin,
                "led" => p.led = pin,
                _ => return Err(ParseError::UnknownKey),
            }
        }
    }

    Ok(())
}
