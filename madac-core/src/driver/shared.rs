//! Caller side of the motor driver
//!
//! Every operation here only takes the state lock briefly and returns;
//! none of them waits for a motion. The step loop picks up work from the
//! command slot.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::signal::Signal;

use crate::config::CalibrationParams;
use crate::motion::{step_to_percent, MotionRequest};
use crate::state::{DriverEvent, DriverStatus, Fault};
use crate::traits::Direction;

/// Rejections returned synchronously to the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DriverError {
    /// Percentage requested before the full range is known
    Uncalibrated,
    /// The step loop is not started
    HandlerStopped,
    /// The driver stage is disabled
    Disabled,
    /// An ordinary request while in the error status
    Faulted(Fault),
    /// Operation not allowed while a motion runs
    Busy,
    /// Zero full range
    InvalidCalibration,
}

/// Work handed to the step loop through the single command slot
///
/// A newer command overwrites an unconsumed one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Command {
    /// Travel to an absolute step
    Travel(u32),
    /// Run the calibration traversal
    Calibrate,
    /// Wake the step loop to observe flags or flush persistence
    Sync,
    /// Wake the step loop so it can exit
    Shutdown,
}

/// Position report for diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StepReport {
    /// Steps physically emitted, as a position
    pub current: u32,
    /// Target of the in-progress or last motion
    pub expected: u32,
}

/// Copy of the shared driver fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DriverSnapshot {
    pub calibration: Option<CalibrationParams>,
    pub current_step: u32,
    pub expected_step: u32,
    pub direction: Direction,
    pub status: DriverStatus,
    pub is_motor_running: bool,
    pub keep_handler_running: bool,
    pub stop_requested: bool,
    pub blind_traversal_requested: bool,
    pub driver_enabled: bool,
    pub last_motor_start_ms: u64,
}

/// State shared between callers and the step loop
#[derive(Debug, Clone, Copy)]
pub(crate) struct DriverState {
    pub calibration: Option<CalibrationParams>,
    pub current_step: u32,
    pub expected_step: u32,
    pub direction: Direction,
    pub status: DriverStatus,
    pub is_motor_running: bool,
    pub keep_handler_running: bool,
    pub stop_requested: bool,
    pub blind_traversal_requested: bool,
    pub driver_enabled: bool,
    pub last_motor_start_ms: u64,
    /// Position changed without being persisted
    pub position_dirty: bool,
    /// Calibration changed without being persisted
    pub calibration_dirty: bool,
}

impl DriverState {
    const fn new() -> Self {
        Self {
            calibration: None,
            current_step: 0,
            expected_step: 0,
            direction: Direction::Forward,
            status: DriverStatus::Idle,
            is_motor_running: false,
            keep_handler_running: false,
            stop_requested: false,
            blind_traversal_requested: false,
            driver_enabled: false,
            last_motor_start_ms: 0,
            position_dirty: false,
            calibration_dirty: false,
        }
    }

    /// Full range, when calibrated
    pub fn full(&self) -> Option<u32> {
        self.calibration.map(|c| c.full_rotation_step_count)
    }

    /// Apply an event, returning `(from, to)` when the status changed
    pub fn apply(&mut self, event: DriverEvent) -> Option<(DriverStatus, DriverStatus)> {
        let from = self.status;
        self.status = from.transition(event);
        (from != self.status).then_some((from, self.status))
    }

    fn snapshot(&self) -> DriverSnapshot {
        DriverSnapshot {
            calibration: self.calibration,
            current_step: self.current_step,
            expected_step: self.expected_step,
            direction: self.direction,
            status: self.status,
            is_motor_running: self.is_motor_running,
            keep_handler_running: self.keep_handler_running,
            stop_requested: self.stop_requested,
            blind_traversal_requested: self.blind_traversal_requested,
            driver_enabled: self.driver_enabled,
            last_motor_start_ms: self.last_motor_start_ms,
        }
    }
}

/// Caller-side handle of one blind's motor driver
///
/// Const-constructible so it can live in a `static`. The step loop is a
/// [`Handler`](super::Handler) borrowing this value.
pub struct MotorDriver<M: RawMutex> {
    index: u8,
    pub(crate) state: Mutex<M, RefCell<DriverState>>,
    pub(crate) command: Signal<M, Command>,
    pub(crate) started: Signal<M, ()>,
    pub(crate) exited: Signal<M, ()>,
}

impl<M: RawMutex> MotorDriver<M> {
    /// Create a driver for the blind with the given index
    pub const fn new(index: u8) -> Self {
        Self {
            index,
            state: Mutex::new(RefCell::new(DriverState::new())),
            command: Signal::new(),
            started: Signal::new(),
            exited: Signal::new(),
        }
    }

    /// Blind index of this driver
    pub fn index(&self) -> u8 {
        self.index
    }

    pub(crate) fn with_state<R>(&self, f: impl FnOnce(&mut DriverState) -> R) -> R {
        self.state.lock(|s| f(&mut s.borrow_mut()))
    }

    /// Load calibration and last known position
    ///
    /// An invalid calibration counts as uncalibrated. The position is
    /// clamped to the full range. Status becomes `Idle`.
    pub fn initialize_driver(&self, calibration: Option<CalibrationParams>, position: Option<u32>) {
        self.with_state(|s| {
            s.calibration = calibration.filter(|c| c.is_valid());
            let step = position.unwrap_or(0);
            s.current_step = s.full().map_or(step, |full| step.min(full));
            s.expected_step = s.current_step;
            s.status = DriverStatus::Idle;
            s.is_motor_running = false;
            s.stop_requested = false;
            s.blind_traversal_requested = false;
        });
    }

    /// Allow or forbid motion
    ///
    /// Disabling while running stops the step loop at the next step
    /// boundary; the stage is powered down when that motion settles.
    pub fn enable_driver(&self, enabled: bool) {
        self.with_state(|s| {
            s.driver_enabled = enabled;
            if !enabled && s.is_motor_running {
                s.stop_requested = true;
                self.command.signal(Command::Sync);
            }
        });
    }

    /// Let the step loop run
    ///
    /// Idempotent while already started.
    pub fn start_handler(&self) {
        self.with_state(|s| {
            if s.keep_handler_running {
                return;
            }
            s.keep_handler_running = true;
            self.exited.reset();
            self.started.signal(());
        });
    }

    /// Stop the step loop and wait until it has exited
    ///
    /// A running motion is cancelled first. Requires the handler task to
    /// be running `Handler::run`.
    pub async fn stop_handler(&self) {
        let was_running = self.with_state(|s| {
            if !s.keep_handler_running {
                return false;
            }
            s.keep_handler_running = false;
            if s.is_motor_running {
                s.stop_requested = true;
            }
            self.command.signal(Command::Shutdown);
            true
        });

        if was_running {
            self.exited.wait().await;
        }
    }

    /// Accept a motion request
    ///
    /// Returns once the request is handed to the step loop. A running
    /// motion is cancelled at its next step boundary and replaced; two
    /// targets are never active at once.
    pub fn fulfill_request(&self, request: MotionRequest) -> Result<(), DriverError> {
        self.with_state(|s| {
            if !s.keep_handler_running {
                return Err(DriverError::HandlerStopped);
            }
            if !s.driver_enabled {
                return Err(DriverError::Disabled);
            }
            if let Some(fault) = s.status.fault() {
                if !request.is_calibration() {
                    return Err(DriverError::Faulted(fault));
                }
            }

            if request.needs_calibration() && s.full().is_none() {
                return Err(DriverError::Uncalibrated);
            }
            let command = match request.target_step(s.full()) {
                Some(target) => Command::Travel(target),
                None => Command::Calibrate,
            };

            if s.is_motor_running {
                s.stop_requested = true;
            } else {
                if let Command::Travel(target) = command {
                    if target == s.current_step {
                        s.expected_step = target;
                        return Ok(());
                    }
                    s.expected_step = target;
                    if let Some(direction) = Direction::between(s.current_step, target) {
                        s.direction = direction;
                    }
                    s.apply(DriverEvent::MotionAccepted);
                } else {
                    s.apply(DriverEvent::CalibrationAccepted);
                }
                s.blind_traversal_requested = request.is_calibration();
                s.is_motor_running = true;
            }

            self.command.signal(command);
            Ok(())
        })
    }

    /// Start the calibration traversal
    pub fn calibrate(&self) -> Result<(), DriverError> {
        self.fulfill_request(MotionRequest::Calibrate)
    }

    /// Cancel the running motion at its next step boundary
    ///
    /// Returns `false` (no-op) when nothing is running.
    pub fn cancel_current_request(&self) -> bool {
        self.with_state(|s| {
            if !s.is_motor_running {
                return false;
            }
            s.stop_requested = true;
            self.command.signal(Command::Sync);
            true
        })
    }

    /// Cancel the running motion if this driver has the given index
    pub fn interrupt_for_index(&self, index: u8) -> bool {
        index == self.index && self.cancel_current_request()
    }

    /// Replace the calibration parameters
    ///
    /// The current position is clamped to the new range. Both are
    /// persisted by the step loop.
    pub fn update_calib_params(&self, params: CalibrationParams) -> Result<(), DriverError> {
        if !params.is_valid() {
            return Err(DriverError::InvalidCalibration);
        }
        self.with_state(|s| {
            if s.is_motor_running {
                return Err(DriverError::Busy);
            }
            s.calibration = Some(params);
            s.current_step = s.current_step.min(params.full_rotation_step_count);
            s.expected_step = s.current_step;
            s.calibration_dirty = true;
            s.position_dirty = true;
            self.command.signal(Command::Sync);
            Ok(())
        })
    }

    /// Force the current position without motion
    ///
    /// Clears an error status. Not allowed while running.
    pub fn reset_steps(&self, step: u32) -> Result<(), DriverError> {
        self.with_state(|s| {
            if s.is_motor_running {
                return Err(DriverError::Busy);
            }
            s.current_step = s.full().map_or(step, |full| step.min(full));
            s.expected_step = s.current_step;
            s.apply(DriverEvent::Resynced);
            s.position_dirty = true;
            self.command.signal(Command::Sync);
            Ok(())
        })
    }

    /// Current status
    pub fn get_status(&self) -> DriverStatus {
        self.with_state(|s| s.status)
    }

    /// Current position as a percentage
    pub fn get_percentage(&self) -> Result<u8, DriverError> {
        self.with_state(|s| {
            s.full()
                .map(|full| step_to_percent(s.current_step, full))
                .ok_or(DriverError::Uncalibrated)
        })
    }

    /// Current and expected step
    pub fn get_steps(&self) -> StepReport {
        self.with_state(|s| StepReport {
            current: s.current_step,
            expected: s.expected_step,
        })
    }

    /// Learned calibration, if any
    pub fn calibration(&self) -> Option<CalibrationParams> {
        self.with_state(|s| s.calibration)
    }

    /// Copy of every shared field
    pub fn snapshot(&self) -> DriverSnapshot {
        self.with_state(|s| s.snapshot())
    }
}
