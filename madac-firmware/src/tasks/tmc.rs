//! TMC2209 driver task
//!
//! Configures the TMC2209 over UART1 and then watches DRV_STATUS. While a
//! driver fault is reported the stepper stage refuses to step, which the
//! step loop turns into a hardware fault.

use defmt::*;
use embassy_rp::uart::BufferedUart;
use embassy_time::{with_timeout, Delay, Duration, Ticker, Timer};
use portable_atomic::Ordering;

use madac_core::state::DriverStatus;
use madac_drivers::stepper::{Tmc2209Bus, Tmc2209Driver};

use crate::channels::{DRIVER, DRIVER_FAULT};

/// Configuration attempts before giving up
const CONFIGURE_ATTEMPTS: u32 = 3;

/// Timeout for one UART transaction sequence
const UART_TIMEOUT: Duration = Duration::from_millis(200);

/// DRV_STATUS poll interval
const STATUS_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// TMC2209 task
#[embassy_executor::task]
pub async fn tmc_task(uart: BufferedUart, driver: Tmc2209Driver) {
    info!("TMC2209 task starting...");

    // Wait for TMC2209 to power up
    Timer::after(Duration::from_millis(100)).await;

    // PDN_UART is a single wire; every byte sent is echoed back
    let mut bus = Tmc2209Bus::new(uart, true);
    let mut delay = Delay;

    let mut configured = false;
    for attempt in 1..=CONFIGURE_ATTEMPTS {
        match with_timeout(UART_TIMEOUT, bus.configure(&driver, &mut delay)).await {
            Ok(Ok(())) => {
                configured = true;
                break;
            }
            Ok(Err(e)) => warn!("TMC2209 configuration attempt {} failed: {:?}", attempt, e),
            Err(_) => warn!("TMC2209 configuration attempt {} timed out", attempt),
        }
    }

    if !configured {
        error!("TMC2209 not configured, motion disabled");
        DRIVER_FAULT.store(true, Ordering::Relaxed);
        return;
    }

    info!(
        "TMC2209 configured at address {}: run {}mA, hold {}mA, SGTHRS {}",
        driver.address(),
        driver.settings().run_current_ma,
        driver.settings().hold_current_ma,
        driver.settings().stall_threshold
    );

    let mut ticker = Ticker::every(STATUS_POLL_INTERVAL);
    loop {
        ticker.next().await;

        match with_timeout(UART_TIMEOUT, bus.drv_status(&driver)).await {
            Ok(Ok(status)) if status.has_fault() => {
                if !DRIVER_FAULT.swap(true, Ordering::Relaxed) {
                    error!("TMC2209 fault: {:?}", status);
                }
            }
            Ok(Ok(status)) => {
                if DRIVER_FAULT.swap(false, Ordering::Relaxed) {
                    info!("TMC2209 fault cleared");
                }
                if status.has_warning() {
                    warn!("TMC2209 warning: {:?}", status);
                }
            }
            Ok(Err(e)) => warn!("DRV_STATUS read failed: {:?}", e),
            Err(_) => warn!("DRV_STATUS read timed out"),
        }

        // SG_RESULT while moving, for tuning SGTHRS
        if matches!(DRIVER.get_status(), DriverStatus::Moving | DriverStatus::Calibrating) {
            if let Ok(Ok(sg)) = with_timeout(UART_TIMEOUT, bus.stallguard_result(&driver)).await {
                debug!("SG_RESULT {} (threshold {})", sg, 2 * driver.settings().stall_threshold as u16);
            }
        }
    }
}
