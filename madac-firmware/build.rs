//! Build script for madac-firmware
//!
//! - Sets up linker search paths for memory.x
//! - Validates machine.toml at compile time

use std::env;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

/// GPIOs claimed by the TMC2209 UART
const RESERVED_PINS: [i64; 2] = [8, 9];

fn main() {
    setup_linker();
    validate_config();
}

/// Set up linker search paths for memory.x
fn setup_linker() {
    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());

    let memory_x = include_bytes!("memory.x");
    let mut f = File::create(out_dir.join("memory.x")).unwrap();
    f.write_all(memory_x).unwrap();

    println!("cargo:rustc-link-search={}", out_dir.display());
    println!("cargo:rerun-if-changed=memory.x");
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rustc-link-arg-bins=--nmagic");
    println!("cargo:rustc-link-arg-bins=-Tlink.x");
    println!("cargo:rustc-link-arg-bins=-Tlink-rp.x");
    println!("cargo:rustc-link-arg-bins=-Tdefmt.x");
}

/// Validate machine.toml at compile time
fn validate_config() {
    println!("cargo:rerun-if-changed=machine.toml");

    let config_path = Path::new("machine.toml");
    if !config_path.exists() {
        fail("machine.toml not found", &["Create one in the madac-firmware directory."]);
    }

    let content = match fs::read_to_string(config_path) {
        Ok(content) => content,
        Err(e) => fail("Failed to read machine.toml", &[&e.to_string()]),
    };

    let config: toml::Value = match toml::from_str(&content) {
        Ok(value) => value,
        Err(e) => {
            let msg = e.to_string();
            let lines: Vec<&str> = msg.lines().collect();
            fail("Invalid TOML syntax in machine.toml", &lines);
        }
    };

    let mut errors = Vec::new();
    validate_sections(&config, &mut errors);
    validate_motion(&config, &mut errors);
    validate_tmc(&config, &mut errors);
    validate_pins(&config, &mut errors);

    if !errors.is_empty() {
        let lines: Vec<&str> = errors.iter().map(String::as_str).collect();
        fail("Invalid machine.toml", &lines);
    }

    println!("cargo:warning=machine.toml validated successfully");
}

/// Abort the build with a boxed error message
fn fail(title: &str, lines: &[&str]) -> ! {
    let body = lines
        .iter()
        .map(|line| {
            let truncated = if line.len() > 62 {
                format!("{}...", &line[..59])
            } else {
                line.to_string()
            };
            format!("║  • {:<62} ║", truncated)
        })
        .collect::<Vec<_>>()
        .join("\n");

    panic!(
        "\n\
        ╔══════════════════════════════════════════════════════════════════╗\n\
        ║  ERROR: {:<56} ║\n\
        ╠══════════════════════════════════════════════════════════════════╣\n\
        {}\n\
        ╚══════════════════════════════════════════════════════════════════╝\n",
        title, body
    );
}

fn validate_sections(config: &toml::Value, errors: &mut Vec<String>) {
    let Some(root) = config.as_table() else {
        errors.push("top level must be a table".into());
        return;
    };

    for (name, value) in root {
        if !["motion", "tmc2209", "pins"].contains(&name.as_str()) {
            errors.push(format!("unknown section [{}]", name));
        } else if !value.is_table() {
            errors.push(format!("[{}] must be a table", name));
        }
    }
}

/// Check an optional integer key against an inclusive range
fn check_range(
    section: &str,
    table: &toml::value::Table,
    key: &str,
    min: i64,
    max: i64,
    errors: &mut Vec<String>,
) {
    match table.get(key) {
        None => {}
        Some(toml::Value::Integer(v)) if (min..=max).contains(v) => {}
        Some(toml::Value::Integer(_)) => {
            errors.push(format!("[{}] {} must be {}-{}", section, key, min, max))
        }
        Some(_) => errors.push(format!("[{}] {} must be an integer", section, key)),
    }
}

fn check_bool(section: &str, table: &toml::value::Table, key: &str, errors: &mut Vec<String>) {
    if let Some(value) = table.get(key) {
        if !value.is_bool() {
            errors.push(format!("[{}] {} must be true or false", section, key));
        }
    }
}

fn check_known_keys(
    section: &str,
    table: &toml::value::Table,
    known: &[&str],
    errors: &mut Vec<String>,
) {
    for key in table.keys() {
        if !known.contains(&key.as_str()) {
            errors.push(format!("[{}] unknown key '{}'", section, key));
        }
    }
}

fn validate_motion(config: &toml::Value, errors: &mut Vec<String>) {
    let Some(motion) = config.get("motion").and_then(|m| m.as_table()) else {
        return;
    };

    check_known_keys(
        "motion",
        motion,
        &[
            "step_interval_us",
            "max_traversal_ms",
            "calibration_ceiling_steps",
            "release_steps",
            "arrival_allowance_pct",
            "direction_inverted",
            "microsteps",
        ],
        errors,
    );
    check_range("motion", motion, "step_interval_us", 20, 100_000, errors);
    check_range("motion", motion, "max_traversal_ms", 1_000, u32::MAX as i64, errors);
    check_range("motion", motion, "calibration_ceiling_steps", 1, u32::MAX as i64, errors);
    check_range("motion", motion, "release_steps", 0, u32::MAX as i64, errors);
    check_range("motion", motion, "arrival_allowance_pct", 0, 100, errors);
    check_bool("motion", motion, "direction_inverted", errors);

    if let Some(toml::Value::Integer(ms)) = motion.get("microsteps") {
        if !(1..=256).contains(ms) || (*ms as u32).count_ones() != 1 {
            errors.push("[motion] microsteps must be a power of two up to 256".into());
        }
    }
}

fn validate_tmc(config: &toml::Value, errors: &mut Vec<String>) {
    let Some(tmc) = config.get("tmc2209").and_then(|t| t.as_table()) else {
        return;
    };

    check_known_keys(
        "tmc2209",
        tmc,
        &[
            "uart_address",
            "run_current_ma",
            "hold_current_ma",
            "stall_threshold",
            "tcoolthrs",
            "semin",
            "semax",
            "sedn",
            "toff",
            "stealthchop",
        ],
        errors,
    );
    check_range("tmc2209", tmc, "uart_address", 0, 3, errors);
    check_range("tmc2209", tmc, "run_current_ma", 100, 2_000, errors);
    check_range("tmc2209", tmc, "hold_current_ma", 0, 2_000, errors);
    check_range("tmc2209", tmc, "stall_threshold", 0, 255, errors);
    check_range("tmc2209", tmc, "tcoolthrs", 0, 0xFFFFF, errors);
    check_range("tmc2209", tmc, "semin", 0, 15, errors);
    check_range("tmc2209", tmc, "semax", 0, 15, errors);
    check_range("tmc2209", tmc, "sedn", 0, 3, errors);
    check_range("tmc2209", tmc, "toff", 1, 15, errors);
    check_bool("tmc2209", tmc, "stealthchop", errors);
}

fn validate_pins(config: &toml::Value, errors: &mut Vec<String>) {
    let Some(pins) = config.get("pins").and_then(|p| p.as_table()) else {
        return;
    };

    let known = [
        "step",
        "dir",
        "enable",
        "diag",
        "button_up",
        "button_down",
        "led",
    ];
    check_known_keys("pins", pins, &known, errors);

    let mut used: Vec<(i64, &str)> = Vec::new();
    for (key, value) in pins {
        let Some(spec) = value.as_str() else {
            errors.push(format!("[pins] {} must be a string like \"gpio11\"", key));
            continue;
        };

        let number = spec
            .trim_start_matches(['^', '!'])
            .strip_prefix("gpio")
            .and_then(|n| n.parse::<i64>().ok());

        match number {
            Some(n) if (0..30).contains(&n) => {
                if RESERVED_PINS.contains(&n) {
                    errors.push(format!("[pins] {} uses gpio{}, reserved for the TMC2209 UART", key, n));
                }
                if let Some((_, other)) = used.iter().find(|(m, _)| *m == n) {
                    errors.push(format!("[pins] {} and {} both use gpio{}", other, key, n));
                }
                used.push((n, key));
            }
            _ => errors.push(format!("[pins] {} = \"{}\" is not a valid pin", key, spec)),
        }
    }
}
