//! MaD blinds actuator firmware
//!
//! Main firmware binary for RP2040 boards driving one blind through a
//! TMC2209 stepper driver. The step loop, the controller, the buttons, the
//! status LED and the TMC2209 supervisor each run as an Embassy task.

#![no_std]
#![no_main]

use defmt::*;
use embassy_executor::Spawner;
use embassy_rp::bind_interrupts;
use embassy_rp::gpio::{Input, Level, Output, Pull};
use embassy_rp::peripherals::UART1;
use embassy_rp::uart::{BufferedInterruptHandler, Config as UartConfig, Uart};
use embassy_time::{Delay, Timer};
use static_cell::StaticCell;
use {defmt_rtt as _, panic_probe as _};

use madac_core::config::{BoardPins, PinConfig};
use madac_core::driver::Handler;
use madac_core::persist::FlashBlindStore;
use madac_drivers::endstop::{DiagConfig, DiagEndStop};
use madac_drivers::indicator::StatusLed;
use madac_drivers::stepper::{StepDirStepper, Tmc2209Driver};
use madac_hal_rp2040::flash::Rp2040FlashStorage;
use madac_hal_rp2040::{PinBank, PinError};

use crate::channels::DRIVER;
use crate::config::{load_config, log_config_summary};
use crate::observer::LogObserver;
use crate::tasks::{BlindStepper, Button, GuardedStepper};

mod channels;
mod config;
mod observer;
mod tasks;

bind_interrupts!(struct Irqs {
    UART1_IRQ => BufferedInterruptHandler<UART1>;
});

// UART buffers for the TMC2209 link (must live forever)
static TX_BUF: StaticCell<[u8; 64]> = StaticCell::new();
static RX_BUF: StaticCell<[u8; 64]> = StaticCell::new();

/// TMC2209 UART baud rate
const TMC_BAUD: u32 = 115_200;

/// Board peripherals claimed from the pin bank
struct BoardIo {
    stepper: BlindStepper,
    diag: DiagEndStop<Input<'static>>,
    up: Button,
    down: Button,
    led: StatusLed<Output<'static>>,
}

/// Main entry point
#[embassy_executor::main]
async fn main(spawner: Spawner) {
    info!("MaD blinds firmware starting...");

    let p = embassy_rp::init(Default::default());
    info!("Peripherals initialized");

    let mut flash = Rp2040FlashStorage::new(p.FLASH, p.DMA_CH0);
    let config = load_config(&mut flash).await;
    log_config_summary(&config);

    // TMC2209 UART is fixed to UART1 on GPIO8 (TX) and GPIO9 (RX)
    let mut uart_config = UartConfig::default();
    uart_config.baudrate = TMC_BAUD;
    let tx_buf = TX_BUF.init([0u8; 64]);
    let rx_buf = RX_BUF.init([0u8; 64]);
    let uart = Uart::new_blocking(p.UART1, p.PIN_8, p.PIN_9, uart_config)
        .into_buffered(Irqs, tx_buf, rx_buf);
    info!("UART initialized for TMC2209");

    let mut bank = PinBank::new([
        Some(p.PIN_0.into()),
        Some(p.PIN_1.into()),
        Some(p.PIN_2.into()),
        Some(p.PIN_3.into()),
        Some(p.PIN_4.into()),
        Some(p.PIN_5.into()),
        Some(p.PIN_6.into()),
        Some(p.PIN_7.into()),
        None, // GPIO8: TMC2209 TX
        None, // GPIO9: TMC2209 RX
        Some(p.PIN_10.into()),
        Some(p.PIN_11.into()),
        Some(p.PIN_12.into()),
        Some(p.PIN_13.into()),
        Some(p.PIN_14.into()),
        Some(p.PIN_15.into()),
        Some(p.PIN_16.into()),
        Some(p.PIN_17.into()),
        Some(p.PIN_18.into()),
        Some(p.PIN_19.into()),
        Some(p.PIN_20.into()),
        Some(p.PIN_21.into()),
        Some(p.PIN_22.into()),
        Some(p.PIN_23.into()),
        Some(p.PIN_24.into()),
        Some(p.PIN_25.into()),
        Some(p.PIN_26.into()),
        Some(p.PIN_27.into()),
        Some(p.PIN_28.into()),
        Some(p.PIN_29.into()),
    ]);

    let io = match claim_board_io(&mut bank, &config.pins) {
        Ok(io) => io,
        Err(e) => {
            error!("Pin assignment failed: {:?}", e);
            loop {
                Timer::after_secs(60).await;
            }
        }
    };
    info!("Board pins claimed");

    // Restore calibration and position before the step loop starts
    let store = FlashBlindStore::new(flash, DRIVER.index());
    let mut handler = Handler::new(
        &DRIVER,
        GuardedStepper(io.stepper),
        io.diag,
        store,
        LogObserver,
        config.motion,
    );
    handler.initialize().await;
    DRIVER.enable_driver(true);
    DRIVER.start_handler();

    match DRIVER.get_percentage() {
        Ok(pct) => info!("Blind at {}%", pct),
        Err(_) => warn!("Blind not calibrated, hold both buttons to calibrate"),
    }

    let tmc_driver = Tmc2209Driver::new(config.tmc, config.motion.microsteps);

    spawner.spawn(unwrap!(tasks::motor_task(handler, config.motion.step_interval_us)));
    spawner.spawn(unwrap!(tasks::controller_task()));
    spawner.spawn(unwrap!(tasks::buttons_task(io.up, io.down)));
    spawner.spawn(unwrap!(tasks::indicator_task(io.led)));
    spawner.spawn(unwrap!(tasks::tmc_task(uart, tmc_driver)));

    info!("All tasks spawned, firmware running");

    loop {
        Timer::after_secs(60).await;
        let steps = DRIVER.get_steps();
        debug!("Heartbeat: {:?}, {:?}", DRIVER.get_status(), steps);
    }
}

/// Claim every board pin named in the configuration
fn claim_board_io(bank: &mut PinBank, pins: &BoardPins) -> Result<BoardIo, PinError> {
    let step = Output::new(bank.take(pins.step.pin)?, Level::Low);
    let dir = Output::new(bank.take(pins.dir.pin)?, Level::Low);
    // Start with the driver disabled
    let enable = Output::new(
        bank.take(pins.enable.pin)?,
        if pins.enable.inverted { Level::High } else { Level::Low },
    );
    let stepper = StepDirStepper::new(step, dir, enable, Delay, pins.enable.inverted);

    let diag = DiagEndStop::new(
        Input::new(bank.take(pins.diag.pin)?, Pull::Down),
        DiagConfig {
            active_high: !pins.diag.inverted,
            ..DiagConfig::default()
        },
    );

    let up = button(bank, &pins.button_up)?;
    let down = button(bank, &pins.button_down)?;

    let led_level = if pins.led.inverted { Level::High } else { Level::Low };
    let led = StatusLed::new(Output::new(bank.take(pins.led.pin)?, led_level), pins.led.inverted);

    Ok(BoardIo {
        stepper,
        diag,
        up,
        down,
        led,
    })
}

fn button(bank: &mut PinBank, pin: &PinConfig) -> Result<Button, PinError> {
    let pull = if pin.pull_up { Pull::Up } else { Pull::None };
    Ok(Button::new(Input::new(bank.take(pin.pin)?, pull), pin.inverted))
}
