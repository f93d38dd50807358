//! Motor task
//!
//! Owns the step loop handler and paces it with an embassy `Ticker`.

use defmt::*;
use embassy_rp::gpio::{Input, Output};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_time::{Delay, Duration, Instant, Ticker};
use portable_atomic::Ordering;

use madac_core::driver::Handler;
use madac_core::persist::FlashBlindStore;
use madac_core::traits::{StepTimer, StepperCapability, StepperError};
use madac_drivers::endstop::DiagEndStop;
use madac_drivers::stepper::StepDirStepper;
use madac_hal_rp2040::flash::FlashStorage;

use crate::channels::DRIVER_FAULT;
use crate::observer::LogObserver;

/// Step/dir stage on GPIO outputs
pub type BlindStepper = StepDirStepper<Output<'static>, Output<'static>, Output<'static>, Delay>;

/// Handler with the board's concrete hardware
pub type BlindHandler = Handler<
    'static,
    CriticalSectionRawMutex,
    GuardedStepper,
    DiagEndStop<Input<'static>>,
    FlashBlindStore<FlashStorage<'static>>,
    LogObserver,
>;

/// Stepper stage that refuses to move while the TMC2209 reports a fault
pub struct GuardedStepper(pub BlindStepper);

impl GuardedStepper {
    fn check(&self) -> Result<(), StepperError> {
        if DRIVER_FAULT.load(Ordering::Relaxed) {
            return Err(StepperError::DriverFault);
        }
        Ok(())
    }
}

impl StepperCapability for GuardedStepper {
    fn enable(&mut self) -> Result<(), StepperError> {
        self.check()?;
        self.0.enable()
    }

    fn disable(&mut self) -> Result<(), StepperError> {
        self.0.disable()
    }

    fn set_direction(&mut self, forward: bool) -> Result<(), StepperError> {
        self.0.set_direction(forward)
    }

    fn step(&mut self) -> Result<(), StepperError> {
        self.check()?;
        self.0.step()
    }
}

/// Step timer over an embassy `Ticker`
pub struct TickerTimer {
    ticker: Ticker,
}

impl TickerTimer {
    /// Create a timer with the given step interval
    pub fn new(interval_us: u32) -> Self {
        Self {
            ticker: Ticker::every(Duration::from_micros(interval_us as u64)),
        }
    }
}

impl StepTimer for TickerTimer {
    async fn next(&mut self) {
        self.ticker.next().await
    }

    fn restart(&mut self) {
        self.ticker.reset();
    }

    fn now_ms(&self) -> u64 {
        Instant::now().as_millis()
    }
}

/// Motor task
///
/// Runs the step loop. When the loop is stopped it waits to be started
/// again.
#[embassy_executor::task]
pub async fn motor_task(mut handler: BlindHandler, step_interval_us: u32) {
    info!("Motor task started ({} us/step)", step_interval_us);

    let mut timer = TickerTimer::new(step_interval_us);
    loop {
        handler.run(&mut timer).await;
        info!("Step loop stopped");
    }
}
