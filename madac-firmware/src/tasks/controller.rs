//! Controller task
//!
//! Arbitrates requests from all interaction sources and forwards them to
//! the motor driver.

use defmt::*;
use embassy_futures::select::{select, Either};
use embassy_time::{Duration, Instant, Timer};

use madac_core::controller::{Controller, Dispatch};

use crate::channels::{DRIVER, REQUEST_CHANNEL};

/// How often maintenance mode expiry is checked
const MODE_CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// Controller task
#[embassy_executor::task]
pub async fn controller_task() {
    info!("Controller task started");

    let mut controller = Controller::new();

    loop {
        match select(REQUEST_CHANNEL.receive(), Timer::after(MODE_CHECK_INTERVAL)).await {
            Either::First(request) => {
                let mode = controller.mode();
                let now = Instant::now().as_millis();

                match controller.dispatch(&DRIVER, request, now) {
                    Dispatch::Forwarded => {
                        info!("{:?} from {:?}", request.intent, request.source)
                    }
                    Dispatch::Rejected(e) => {
                        warn!("{:?} from {:?} rejected: {:?}", request.intent, request.source, e)
                    }
                    other => debug!(
                        "{:?} from {:?} dropped: {:?}",
                        request.intent, request.source, other
                    ),
                }

                if controller.mode() != mode {
                    info!("Operation mode: {:?}", controller.mode());
                }
            }
            Either::Second(()) => {
                if controller.tick(Instant::now().as_millis()) {
                    info!("Maintenance mode expired");
                }
            }
        }
    }
}
