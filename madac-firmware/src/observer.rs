//! Status observer for the step loop
//!
//! Logs every notification and forwards status changes to the indicator.

use defmt::*;

use madac_core::state::DriverStatus;
use madac_core::traits::{StatusObserver, StoreError};

use crate::channels::STATUS_CHANNEL;

/// Observer logging over defmt
pub struct LogObserver;

impl StatusObserver for LogObserver {
    fn status_changed(&mut self, index: u8, from: DriverStatus, to: DriverStatus) {
        match to {
            DriverStatus::Error(fault) => error!("Blind {}: {:?} -> fault {:?}", index, from, fault),
            _ => info!("Blind {}: {:?} -> {:?}", index, from, to),
        }

        if STATUS_CHANNEL.try_send(to).is_err() {
            debug!("Status channel full, dropping update");
        }
    }

    fn position_settled(&mut self, index: u8, step: u32) {
        debug!("Blind {} settled at step {}", index, step);
    }

    fn persist_failed(&mut self, index: u8, error: StoreError) {
        warn!("Blind {}: persisting state failed: {:?}", index, error);
    }
}
