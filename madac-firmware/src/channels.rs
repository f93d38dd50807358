//! Inter-task communication
//!
//! Statics shared between Embassy tasks: the motor driver itself, the
//! request channel feeding the controller and the status channel feeding
//! the indicator.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use portable_atomic::AtomicBool;

use madac_core::controller::SourcedIntent;
use madac_core::driver::MotorDriver;
use madac_core::state::DriverStatus;

/// Channel capacity for requests from interaction sources
const REQUEST_CHANNEL_SIZE: usize = 8;

/// Channel capacity for status notifications
const STATUS_CHANNEL_SIZE: usize = 8;

/// The blind's motor driver
pub static DRIVER: MotorDriver<CriticalSectionRawMutex> = MotorDriver::new(0);

/// Requests from buttons (and future voice/network sources) to the controller
pub static REQUEST_CHANNEL: Channel<CriticalSectionRawMutex, SourcedIntent, REQUEST_CHANNEL_SIZE> =
    Channel::new();

/// Status transitions from the step loop to the indicator
///
/// Written with `try_send`; a full channel drops the notification.
pub static STATUS_CHANNEL: Channel<CriticalSectionRawMutex, DriverStatus, STATUS_CHANNEL_SIZE> =
    Channel::new();

/// Set while the TMC2209 reports a driver fault or could not be configured
pub static DRIVER_FAULT: AtomicBool = AtomicBool::new(false);
