//! Status indicator task

use core::convert::Infallible;

use defmt::*;
use embassy_futures::select::{select, Either};
use embassy_rp::gpio::Output;
use embassy_time::{Duration, Instant, Ticker};

use madac_drivers::indicator::StatusLed;

use crate::channels::{DRIVER, STATUS_CHANNEL};

/// LED refresh period in milliseconds
const REFRESH_INTERVAL_MS: u64 = 50;

/// Indicator task
#[embassy_executor::task]
pub async fn indicator_task(mut led: StatusLed<Output<'static>>) {
    info!("Indicator task started");

    let mut ticker = Ticker::every(Duration::from_millis(REFRESH_INTERVAL_MS));
    led.set_status(DRIVER.get_status());

    loop {
        match select(STATUS_CHANNEL.receive(), ticker.next()).await {
            Either::First(status) => {
                led.set_status(status);
                trace!("LED pattern {:?}", led.pattern());
            }
            Either::Second(()) => {}
        }

        let result: Result<(), Infallible> = led.update(Instant::now().as_millis());
        if let Err(never) = result {
            match never {}
        }
    }
}
