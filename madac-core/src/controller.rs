//! Request arbitration
//!
//! Interaction sources produce [`SourcedIntent`]s. The controller decides
//! which source is authoritative and forwards accepted intents to the
//! motor driver, where cancel-and-replace happens.

use embassy_sync::blocking_mutex::raw::RawMutex;

use crate::driver::{DriverError, MotorDriver};
use crate::motion::MotionRequest;

/// Maintenance mode expires after this much inactivity (5 minutes)
pub const MODE_EXPIRE_MS: u64 = 300_000;

/// Origin of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RequestSource {
    /// Physical buttons on the device
    Manual,
    /// Voice assistant
    Voice,
    /// Network app
    Network,
}

impl RequestSource {
    /// Higher value wins while a motion runs
    pub fn priority(self) -> u8 {
        match self {
            RequestSource::Manual => 3,
            RequestSource::Voice => 2,
            RequestSource::Network => 1,
        }
    }
}

/// Normalised intent of an interaction source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Intent {
    /// Move to a target or calibrate
    Move(MotionRequest),
    /// Cancel the running motion
    Stop,
    /// Declare the current physical position without moving
    Resync(u32),
}

/// Intent tagged with its source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SourcedIntent {
    pub source: RequestSource,
    pub intent: Intent,
}

impl SourcedIntent {
    /// Tag an intent with its source
    pub const fn new(source: RequestSource, intent: Intent) -> Self {
        Self { source, intent }
    }
}

/// Device operation mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OperationMode {
    /// Normal use, every source accepted
    User,
    /// Calibration or re-synchronisation in progress, manual only
    Maintenance,
}

/// Result of dispatching an intent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Dispatch {
    /// Handed to the driver
    Forwarded,
    /// A higher-priority source owns the running motion
    Preempted,
    /// Not allowed from this source or in this mode
    NotAllowed,
    /// Stop with nothing running
    NothingToStop,
    /// The driver rejected the request
    Rejected(DriverError),
}

/// Request arbiter for one driver
#[derive(Debug, Clone)]
pub struct Controller {
    /// Source of the motion currently running
    owner: Option<RequestSource>,
    mode: OperationMode,
    /// Last maintenance activity (ms)
    mode_activity_ms: u64,
}

impl Default for Controller {
    fn default() -> Self {
        Self::new()
    }
}

impl Controller {
    /// Create a controller in user mode
    pub const fn new() -> Self {
        Self {
            owner: None,
            mode: OperationMode::User,
            mode_activity_ms: 0,
        }
    }

    /// Current operation mode
    pub fn mode(&self) -> OperationMode {
        self.mode
    }

    /// Source owning the running motion, if any
    pub fn owner(&self) -> Option<RequestSource> {
        self.owner
    }

    /// Leave maintenance mode after inactivity
    ///
    /// Returns `true` when the mode changed.
    pub fn tick(&mut self, now_ms: u64) -> bool {
        if self.mode == OperationMode::Maintenance
            && now_ms.saturating_sub(self.mode_activity_ms) >= MODE_EXPIRE_MS
        {
            self.mode = OperationMode::User;
            return true;
        }
        false
    }

    /// Decide whether `request` may act on the driver
    pub fn arbitrate(&self, request: &SourcedIntent, driver_running: bool) -> Dispatch {
        let maintenance_intent = matches!(
            request.intent,
            Intent::Move(MotionRequest::Calibrate) | Intent::Resync(_)
        );

        if maintenance_intent && request.source != RequestSource::Manual {
            return Dispatch::NotAllowed;
        }
        if self.mode == OperationMode::Maintenance && request.source != RequestSource::Manual {
            return Dispatch::NotAllowed;
        }

        match self.owner {
            Some(owner) if driver_running && owner.priority() > request.source.priority() => {
                Dispatch::Preempted
            }
            _ => Dispatch::Forwarded,
        }
    }

    /// Arbitrate and forward an intent to the driver
    pub fn dispatch<M: RawMutex>(
        &mut self,
        driver: &MotorDriver<M>,
        request: SourcedIntent,
        now_ms: u64,
    ) -> Dispatch {
        self.tick(now_ms);

        let running = driver.get_status().is_running();
        if !running {
            self.owner = None;
        }

        match self.arbitrate(&request, running) {
            Dispatch::Forwarded => {}
            other => return other,
        }

        if request.source == RequestSource::Manual && self.mode == OperationMode::Maintenance {
            self.mode_activity_ms = now_ms;
        }

        let result = match request.intent {
            Intent::Move(motion) => driver.fulfill_request(motion).map(|()| {
                self.owner = Some(request.source);
                if motion.is_calibration() {
                    self.enter_maintenance(now_ms);
                }
            }),
            Intent::Stop => {
                if !driver.cancel_current_request() {
                    return Dispatch::NothingToStop;
                }
                self.owner = None;
                Ok(())
            }
            Intent::Resync(step) => driver
                .reset_steps(step)
                .map(|()| self.enter_maintenance(now_ms)),
        };

        match result {
            Ok(()) => Dispatch::Forwarded,
            Err(e) => Dispatch::Rejected(e),
        }
    }

    fn enter_maintenance(&mut self, now_ms: u64) {
        self.mode = OperationMode::Maintenance;
        self.mode_activity_ms = now_ms;
    }
}
