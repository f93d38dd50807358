//! Calibration data types
//!
//! Stores the learned traversal so it can be persisted to flash and
//! loaded on boot.

use serde::{Deserialize, Serialize};

/// Magic number to identify valid calibration data
pub const CALIBRATION_MAGIC: u32 = 0x424C_4E43; // "BLNC"

/// Magic number to identify valid position data
pub const POSITION_MAGIC: u32 = 0x424C_4E50; // "BLNP"

/// Current record format version
pub const RECORD_VERSION: u8 = 1;

/// Learned traversal of one blind
///
/// Produced by the calibration traversal, read once at driver
/// initialization, replaced by a later recalibration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CalibrationParams {
    /// Steps spanning 0% to 100%
    pub full_rotation_step_count: u32,
    /// Physical rotation for increasing percentage is the reverse of the
    /// motor's positive direction
    pub direction_inverted: bool,
}

impl CalibrationParams {
    /// Create calibration parameters
    pub const fn new(full_rotation_step_count: u32, direction_inverted: bool) -> Self {
        Self {
            full_rotation_step_count,
            direction_inverted,
        }
    }

    /// A zero step count marks "not calibrated"
    pub const fn is_valid(&self) -> bool {
        self.full_rotation_step_count > 0
    }
}

/// Calibration record stored in flash
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CalibrationRecord {
    /// Magic number for validation
    pub magic: u32,
    /// Data format version
    pub version: u8,
    /// Learned traversal
    pub params: CalibrationParams,
    /// CRC32 checksum (calculated over magic..params)
    pub crc: u32,
}

impl CalibrationRecord {
    /// Create a sealed record
    pub fn new(params: CalibrationParams) -> Self {
        let mut record = Self {
            magic: CALIBRATION_MAGIC,
            version: RECORD_VERSION,
            params,
            crc: 0,
        };
        record.crc = record.calculate_crc();
        record
    }

    /// Calculate CRC32 for the record (excluding the crc field itself)
    pub fn calculate_crc(&self) -> u32 {
        let mut crc: u32 = 0xFFFF_FFFF;
        crc = crc32_update(crc, &self.magic.to_le_bytes());
        crc = crc32_update(crc, &[self.version]);
        crc = crc32_update(crc, &self.params.full_rotation_step_count.to_le_bytes());
        crc = crc32_update(crc, &[self.params.direction_inverted as u8]);
        !crc
    }

    /// Check magic, version, CRC and the step count
    pub fn is_valid(&self) -> bool {
        self.magic == CALIBRATION_MAGIC
            && self.version == RECORD_VERSION
            && self.crc == self.calculate_crc()
            && self.params.is_valid()
    }
}

/// Last known position record stored in flash
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PositionRecord {
    /// Magic number for validation
    pub magic: u32,
    /// Data format version
    pub version: u8,
    /// Step position at the last settle
    pub last_known_step: u32,
    /// CRC32 checksum (calculated over magic..last_known_step)
    pub crc: u32,
}

impl PositionRecord {
    /// Create a sealed record
    pub fn new(last_known_step: u32) -> Self {
        let mut record = Self {
            magic: POSITION_MAGIC,
            version: RECORD_VERSION,
            last_known_step,
            crc: 0,
        };
        record.crc = record.calculate_crc();
        record
    }

    /// Calculate CRC32 for the record (excluding the crc field itself)
    pub fn calculate_crc(&self) -> u32 {
        let mut crc: u32 = 0xFFFF_FFFF;
        crc = crc32_update(crc, &self.magic.to_le_bytes());
        crc = crc32_update(crc, &[self.version]);
        crc = crc32_update(crc, &self.last_known_step.to_le_bytes());
        !crc
    }

    /// Check magic, version and CRC
    pub fn is_valid(&self) -> bool {
        self.magic == POSITION_MAGIC
            && self.version == RECORD_VERSION
            && self.crc == self.calculate_crc()
    }
}

/// Simple CRC32 update function (IEEE 802.3 polynomial)
fn crc32_update(crc: u32, data: &[u8]) -> u32 {
    const POLY: u32 = 0xEDB8_8320;
    let mut crc = crc;

    for &byte in data {
        crc ^= byte as u32;
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ POLY;
            } else {
                crc >>= 1;
            }
        }
    }

    crc
}
