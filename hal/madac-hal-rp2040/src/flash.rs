//! RP2040 flash storage
//!
//! Values live in a `sequential-storage` map in the last 64 KiB of the
//! 2 MiB flash, outside the program image (see `memory.x`). Position
//! records are rewritten after every motion; the map spreads those writes
//! over the whole region.

use core::ops::Range;

use embassy_rp::dma::Channel;
use embassy_rp::flash::{Async, Flash};
use embassy_rp::peripherals::FLASH;
use embassy_rp::Peri;
use sequential_storage::cache::NoCache;
use sequential_storage::map;

pub use madac_hal::flash::{FlashError, StorageKey};
use madac_hal::MAX_ITEM_SIZE;

/// Total flash size of the Pico
pub const FLASH_SIZE: usize = 2 * 1024 * 1024;

/// Size of the storage region at the end of flash
pub const STORAGE_SIZE: usize = 64 * 1024;

/// Flash addresses of the storage region
pub const STORAGE_RANGE: Range<u32> = (FLASH_SIZE - STORAGE_SIZE) as u32..FLASH_SIZE as u32;

/// Key and item header overhead inside the map buffer
const ITEM_OVERHEAD: usize = 16;

fn storage_error<E>(e: sequential_storage::Error<E>) -> FlashError {
    match e {
        sequential_storage::Error::Storage { .. } => FlashError::Flash,
        sequential_storage::Error::FullStorage => FlashError::Full,
        sequential_storage::Error::Corrupted { .. } => FlashError::Corrupted,
        sequential_storage::Error::BufferTooSmall { .. } => FlashError::BufferTooSmall,
        _ => FlashError::Storage,
    }
}

/// Flash-backed [`madac_hal::FlashStorage`]
pub struct Rp2040FlashStorage<'d> {
    flash: Flash<'d, FLASH, Async, FLASH_SIZE>,
    /// Scratch space for map items, kept here instead of in each future
    scratch: [u8; MAX_ITEM_SIZE + ITEM_OVERHEAD],
}

impl<'d> Rp2040FlashStorage<'d> {
    /// Take the flash peripheral and a DMA channel for reads
    pub fn new(flash: Peri<'d, FLASH>, dma: Peri<'d, impl Channel>) -> Self {
        Self {
            flash: Flash::new(flash, dma),
            scratch: [0; MAX_ITEM_SIZE + ITEM_OVERHEAD],
        }
    }
}

impl madac_hal::FlashStorage for Rp2040FlashStorage<'_> {
    async fn read(&mut self, key: StorageKey, buffer: &mut [u8]) -> Result<usize, FlashError> {
        let value = map::fetch_item::<StorageKey, &[u8], _>(
            &mut self.flash,
            STORAGE_RANGE,
            &mut NoCache::new(),
            &mut self.scratch,
            &key,
        )
        .await
        .map_err(storage_error)?
        .ok_or(FlashError::NotFound)?;

        let out = buffer
            .get_mut(..value.len())
            .ok_or(FlashError::BufferTooSmall)?;
        out.copy_from_slice(value);
        Ok(value.len())
    }

    async fn write(&mut self, key: StorageKey, data: &[u8]) -> Result<(), FlashError> {
        if data.len() > MAX_ITEM_SIZE {
            return Err(FlashError::BufferTooSmall);
        }

        map::store_item(
            &mut self.flash,
            STORAGE_RANGE,
            &mut NoCache::new(),
            &mut self.scratch,
            &key,
            &data,
        )
        .await
        .map_err(storage_error)
    }
}

/// Flash storage used by the firmware
pub type FlashStorage<'d> = Rp2040FlashStorage<'d>;
