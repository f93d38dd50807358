//! Persistent key-value storage
//!
//! The firmware stores an optional `machine.toml` override and, per blind,
//! the learned calibration and the last known position.

/// Highest blind index that can be addressed by a storage key
pub const MAX_BLIND_INDEX: u8 = 0x0F;

/// Storage keys for persisted data
///
/// Calibration and position are kept under separate keys so that the
/// frequent position writes never rewrite the calibration record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StorageKey {
    /// Machine configuration as TOML text
    MachineConfigToml,
    /// Learned calibration for the blind with the given index
    Calibration(u8),
    /// Last known step position for the blind with the given index
    Position(u8),
}

impl StorageKey {
    const TAG_CONFIG: u8 = 0x00;
    const TAG_CALIBRATION: u8 = 0x10;
    const TAG_POSITION: u8 = 0x20;

    /// Get the key as a byte value
    ///
    /// The upper nibble selects the record kind, the lower nibble the blind.
    pub fn as_u8(self) -> u8 {
        match self {
            StorageKey::MachineConfigToml => Self::TAG_CONFIG,
            StorageKey::Calibration(index) => Self::TAG_CALIBRATION | (index & MAX_BLIND_INDEX),
            StorageKey::Position(index) => Self::TAG_POSITION | (index & MAX_BLIND_INDEX),
        }
    }

    /// Create a key from a byte value
    pub fn from_u8(value: u8) -> Option<Self> {
        let index = value & MAX_BLIND_INDEX;
        match value & !MAX_BLIND_INDEX {
            Self::TAG_CONFIG if index == 0 => Some(StorageKey::MachineConfigToml),
            Self::TAG_CALIBRATION => Some(StorageKey::Calibration(index)),
            Self::TAG_POSITION => Some(StorageKey::Position(index)),
            _ => None,
        }
    }
}

/// Largest value stored under one key (the TOML machine configuration)
pub const MAX_ITEM_SIZE: usize = 2048;

/// Errors from flash storage operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FlashError {
    /// Flash operation failed
    Flash,
    /// Storage operation failed
    Storage,
    /// Key not found
    NotFound,
    /// Buffer too small for the data
    BufferTooSmall,
    /// Data corrupted or invalid
    Corrupted,
    /// Storage is full
    Full,
}

/// Key-value storage for configuration and blind state
///
/// Values are at most [`MAX_ITEM_SIZE`] bytes. A write replaces the
/// previous value of the key; a read returns the newest one.
pub trait FlashStorage {
    /// Read the value of `key` into `buffer`, returning its length
    fn read(
        &mut self,
        key: StorageKey,
        buffer: &mut [u8],
    ) -> impl core::future::Future<Output = Result<usize, FlashError>>;

    /// Replace the value of `key`
    fn write(
        &mut self,
        key: StorageKey,
        data: &[u8],
    ) -> impl core::future::Future<Output = Result<(), FlashError>>;
}

// Implement the sequential-storage Key trait when the feature is enabled
#[cfg(feature = "sequential-storage")]
impl sequential_storage::map::Key for StorageKey {
    fn serialize_into(
        &self,
        buffer: &mut [u8],
    ) -> Result<usize, sequential_storage::map::SerializationError> {
        if buffer.is_empty() {
            return Err(sequential_storage::map::SerializationError::BufferTooSmall);
        }
        buffer[0] = self.as_u8();
        Ok(1)
    }

    fn deserialize_from(
        buffer: &[u8],
    ) -> Result<(Self, usize), sequential_storage::map::SerializationError> {
        if buffer.is_empty() {
            return Err(sequential_storage::map::SerializationError::BufferTooSmall);
        }
        match StorageKey::from_u8(buffer[0]) {
            Some(key) => Ok((key, 1)),
            None => Err(sequential_storage::map::SerializationError::InvalidFormat),
        }
    }
}
