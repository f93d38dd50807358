//! Persistent blind state trait
//!
//! The driver reads calibration and position once at initialization and
//! writes them at motion/calibration settle boundaries.

use madac_hal::FlashError;

use crate::config::CalibrationParams;

/// Errors from blind state persistence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StoreError {
    /// Underlying flash operation failed
    Flash(FlashError),
    /// Record could not be serialized
    Serialize,
}

impl From<FlashError> for StoreError {
    fn from(e: FlashError) -> Self {
        StoreError::Flash(e)
    }
}

/// Storage for one blind's calibration and last known position
///
/// `Ok(None)` means nothing valid is stored; callers treat it as
/// "not calibrated" / "position unknown".
pub trait BlindStore {
    /// Load the learned calibration
    fn load_calibration(
        &mut self,
    ) -> impl core::future::Future<Output = Result<Option<CalibrationParams>, StoreError>>;

    /// Persist the learned calibration
    fn save_calibration(
        &mut self,
        params: CalibrationParams,
    ) -> impl core::future::Future<Output = Result<(), StoreError>>;

    /// Load the last known step position
    fn load_position(&mut self)
        -> impl core::future::Future<Output = Result<Option<u32>, StoreError>>;

    /// Persist the current step position
    fn save_position(
        &mut self,
        step: u32,
    ) -> impl core::future::Future<Output = Result<(), StoreError>>;
}
