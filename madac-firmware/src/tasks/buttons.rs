//! Manual button task
//!
//! Samples the up/down buttons, classifies gestures and sends the resulting
//! intents to the controller.

use defmt::*;
use embassy_rp::gpio::Input;
use embassy_time::{Duration, Instant, Ticker};

use madac_core::controller::{RequestSource, SourcedIntent};
use madac_core::interaction::ButtonClassifier;

use crate::channels::REQUEST_CHANNEL;

/// Button sampling period in milliseconds
const SAMPLE_INTERVAL_MS: u64 = 20;

/// Push button with two-sample debounce
pub struct Button {
    pin: Input<'static>,
    active_low: bool,
    last_raw: bool,
    stable: bool,
}

impl Button {
    /// Create a button
    pub fn new(pin: Input<'static>, active_low: bool) -> Self {
        Self {
            pin,
            active_low,
            last_raw: false,
            stable: false,
        }
    }

    /// Sample the pin; the level changes only after two equal samples
    fn sample(&mut self) -> bool {
        let raw = self.pin.is_high() != self.active_low;
        if raw == self.last_raw {
            self.stable = raw;
        }
        self.last_raw = raw;
        self.stable
    }
}

/// Button task
#[embassy_executor::task]
pub async fn buttons_task(mut up: Button, mut down: Button) {
    info!("Button task started");

    let mut ticker = Ticker::every(Duration::from_millis(SAMPLE_INTERVAL_MS));
    let mut classifier = ButtonClassifier::new();

    loop {
        ticker.next().await;

        let now = Instant::now().as_millis();
        let Some(push) = classifier.update(now, up.sample(), down.sample()) else {
            continue;
        };

        debug!("Button gesture: {:?}", push);
        let request = SourcedIntent::new(RequestSource::Manual, push.intent());
        if REQUEST_CHANNEL.try_send(request).is_err() {
            warn!("Request channel full, dropping {:?}", push);
        }
    }
}
