//! Blind state persistence over flash storage
//!
//! Calibration and position are stored as separate postcard records keyed
//! per blind index. A record that is missing, fails to decode, or fails
//! its magic/version/CRC check loads as absent.

use madac_hal::{FlashError, FlashStorage, StorageKey};

use crate::config::{CalibrationParams, CalibrationRecord, PositionRecord};
use crate::traits::{BlindStore, StoreError};

/// Maximum serialized record size
const MAX_RECORD_SIZE: usize = 32;

/// [`BlindStore`] for one blind backed by a [`FlashStorage`]
pub struct FlashBlindStore<F: FlashStorage> {
    storage: F,
    index: u8,
}

impl<F: FlashStorage> FlashBlindStore<F> {
    /// Create a store for the blind with the given index
    pub fn new(storage: F, index: u8) -> Self {
        Self { storage, index }
    }

    /// Consume the store and return the underlying storage
    pub fn into_storage(self) -> F {
        self.storage
    }

    /// Read a raw record; `None` when not stored
    async fn read<'b>(
        &mut self,
        key: StorageKey,
        buffer: &'b mut [u8; MAX_RECORD_SIZE],
    ) -> Result<Option<&'b [u8]>, StoreError> {
        match self.storage.read(key, buffer).await {
            Ok(len) => Ok(Some(&buffer[..len])),
            Err(FlashError::NotFound | FlashError::Corrupted | FlashError::BufferTooSmall) => {
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl<F: FlashStorage> BlindStore for FlashBlindStore<F> {
    async fn load_calibration(&mut self) -> Result<Option<CalibrationParams>, StoreError> {
        let mut buffer = [0u8; MAX_RECORD_SIZE];
        let key = StorageKey::Calibration(self.index);
        let Some(bytes) = self.read(key, &mut buffer).await? else {
            return Ok(None);
        };

        Ok(postcard::from_bytes::<CalibrationRecord>(bytes)
            .ok()
            .filter(CalibrationRecord::is_valid)
            .map(|record| record.params))
    }

    async fn save_calibration(&mut self, params: CalibrationParams) -> Result<(), StoreError> {
        let record = CalibrationRecord::new(params);
        let mut buffer = [0u8; MAX_RECORD_SIZE];
        let bytes = postcard::to_slice(&record, &mut buffer).map_err(|_| StoreError::Serialize)?;

        self.storage
            .write(StorageKey::Calibration(self.index), bytes)
            .await?;
        Ok(())
    }

    async fn load_position(&mut self) -> Result<Option<u32>, StoreError> {
        let mut buffer = [0u8; MAX_RECORD_SIZE];
        let key = StorageKey::Position(self.index);
        let Some(bytes) = self.read(key, &mut buffer).await? else {
            return Ok(None);
        };

        Ok(postcard::from_bytes::<PositionRecord>(bytes)
            .ok()
            .filter(PositionRecord::is_valid)
            .map(|record| record.last_known_step))
    }

    async fn save_position(&mut self, step: u32) -> Result<(), StoreError> {
        let record = PositionRecord::new(step);
        let mut buffer = [0u8; MAX_RECORD_SIZE];
        let bytes = postcard::to_slice(&record, &mut buffer).map_err(|_| StoreError::Serialize)?;

        self.storage
            .write(StorageKey::Position(self.index), bytes)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_futures::block_on;
    use heapless::{LinearMap, Vec};

    /// RAM-backed flash
    #[derive(Default)]
    struct RamFlash {
        items: LinearMap<u8, Vec<u8, 64>, 8>,
        broken: bool,
    }

    impl FlashStorage for RamFlash {
        async fn read(&mut self, key: StorageKey, buffer: &mut [u8]) -> Result<usize, FlashError> {
            if self.broken {
                return Err(FlashError::Flash);
            }
            let item = self.items.get(&key.as_u8()).ok_or(FlashError::NotFound)?;
            if item.len() > buffer.len() {
                return Err(FlashError::BufferTooSmall);
            }
            buffer[..item.len()].copy_from_slice(item);
            Ok(item.len())
        }

        async fn write(&mut self, key: StorageKey, data: &[u8]) -> Result<(), FlashError> {
            let item = Vec::from_slice(data).map_err(|_| FlashError::BufferTooSmall)?;
            self.items
                .insert(key.as_u8(), item)
                .map_err(|_| FlashError::Full)?;
            Ok(())
        }
    }

    #[test]
    fn test_empty_store_loads_absent() {
        let mut store = FlashBlindStore::new(RamFlash::default(), 0);
        assert_eq!(block_on(store.load_calibration()), Ok(None));
        assert_eq!(block_on(store.load_position()), Ok(None));
    }

    #[test]
    fn test_save_then_load() {
        let mut store = FlashBlindStore::new(RamFlash::default(), 0);
        block_on(store.save_calibration(CalibrationParams::new(4800, true))).unwrap();
        block_on(store.save_position(2400)).unwrap();

        assert_eq!(
            block_on(store.load_calibration()),
            Ok(Some(CalibrationParams::new(4800, true)))
        );
        assert_eq!(block_on(store.load_position()), Ok(Some(2400)));
    }

    #[test]
    fn test_records_are_per_blind() {
        let mut first = FlashBlindStore::new(RamFlash::default(), 0);
        block_on(first.save_position(100)).unwrap();

        let mut second = FlashBlindStore::new(first.into_storage(), 1);
        assert_eq!(block_on(second.load_position()), Ok(None));
        block_on(second.save_position(200)).unwrap();

        let mut first = FlashBlindStore::new(second.into_storage(), 0);
        assert_eq!(block_on(first.load_position()), Ok(Some(100)));
    }

    #[test]
    fn test_corrupt_record_loads_absent() {
        let mut store = FlashBlindStore::new(RamFlash::default(), 0);
        block_on(store.save_position(2400)).unwrap();

        let mut flash = store.into_storage();
        let key = StorageKey::Position(0).as_u8();
        if let Some(item) = flash.items.get_mut(&key) {
            // Flip a bit inside the record
            item[5] ^= 0x01;
        }

        let mut store = FlashBlindStore::new(flash, 0);
        assert_eq!(block_on(store.load_position()), Ok(None));
    }

    #[test]
    fn test_garbage_loads_absent() {
        let mut flash = RamFlash::default();
        block_on(flash.write(StorageKey::Calibration(0), &[0xFF; 3])).unwrap();

        let mut store = FlashBlindStore::new(flash, 0);
        assert_eq!(block_on(store.load_calibration()), Ok(None));
    }

    #[test]
    fn test_flash_failure_propagates() {
        let flash = RamFlash {
            broken: true,
            ..RamFlash::default()
        };
        let mut store = FlashBlindStore::new(flash, 0);
        assert_eq!(
            block_on(store.load_position()),
            Err(StoreError::Flash(FlashError::Flash))
        );
    }
}
