//! Step loop
//!
//! The handler is the only owner of the stepper capability, the end-stop
//! sensor and the store. Each iteration plans under the shared state lock
//! (cancellation, the newest command, safety checks), drives the pins with
//! the lock released, and commits the new position under the lock again.
//! Status notifications and storage writes happen after the lock is
//! released.

use heapless::Vec;

use embassy_sync::blocking_mutex::raw::RawMutex;

use crate::config::{CalibrationParams, MotionConfig};
use crate::safety::{EndStopVerdict, MotionMonitor, SafetyStatus};
use crate::state::{DriverEvent, DriverStatus, Fault};
use crate::traits::{
    BlindStore, Direction, EndStop, StatusObserver, StepTimer, StepperCapability, StepperError,
};

use super::shared::{Command, DriverState, MotorDriver};

/// Status transitions recorded during one iteration
const MAX_TRANSITIONS: usize = 4;

/// Outcome of one step loop iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LoopState {
    /// Nothing to do; park until the next command
    Idle,
    /// A motion was adopted; restart step pacing
    Started,
    /// A motion is in progress
    Stepping,
    /// The handler was stopped and nothing is running
    Exit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CalibrationPhase {
    /// Travel towards 0% until the end-stop fires
    Seek,
    /// Travel towards 100% counting steps until the end-stop fires again
    Measure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ActiveMotion {
    Travel { target: u32 },
    Calibrate { phase: CalibrationPhase, steps: u32 },
}

/// Pulse planned under the lock and emitted after it is released
#[derive(Debug, Clone, Copy)]
struct Pulse {
    /// Physical direction
    forward: bool,
    /// Sample the end-stop before pulsing
    sense: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PulseOutcome {
    Stepped,
    /// The end-stop fired; no pulse was emitted
    EndStop,
    /// The stage refused to enable, turn or step
    Failed,
}

/// Notifications collected under the lock
#[derive(Default)]
struct Notes {
    transitions: Vec<(DriverStatus, DriverStatus), MAX_TRANSITIONS>,
    settled_at: Option<u32>,
}

impl Notes {
    fn record(&mut self, change: Option<(DriverStatus, DriverStatus)>) {
        if let Some(change) = change {
            let _ = self.transitions.push(change);
        }
    }
}

/// Step loop for one motor driver
///
/// Created with borrowed access to a [`MotorDriver`]; callers keep using
/// the driver while [`run`](Handler::run) executes on its own task.
pub struct Handler<'d, M, S, E, P, O>
where
    M: RawMutex,
    S: StepperCapability,
    E: EndStop,
    P: BlindStore,
    O: StatusObserver,
{
    driver: &'d MotorDriver<M>,
    stepper: S,
    endstop: E,
    store: P,
    observer: O,
    config: MotionConfig,
    monitor: MotionMonitor,
    active: Option<ActiveMotion>,
    stage_enabled: bool,
    /// Physical direction last written to the stage
    heading: Option<bool>,
    /// Last status delivered to the observer
    reported: DriverStatus,
}

impl<'d, M, S, E, P, O> Handler<'d, M, S, E, P, O>
where
    M: RawMutex,
    S: StepperCapability,
    E: EndStop,
    P: BlindStore,
    O: StatusObserver,
{
    /// Create a handler for `driver`
    pub fn new(
        driver: &'d MotorDriver<M>,
        stepper: S,
        endstop: E,
        store: P,
        observer: O,
        config: MotionConfig,
    ) -> Self {
        Self {
            driver,
            stepper,
            endstop,
            store,
            observer,
            monitor: MotionMonitor::new(&config),
            config,
            active: None,
            stage_enabled: false,
            heading: None,
            reported: DriverStatus::Idle,
        }
    }

    /// Load calibration and position from the store into the driver
    ///
    /// Load errors are reported to the observer and treated as absent.
    pub async fn initialize(&mut self) {
        let index = self.driver.index();

        let calibration = match self.store.load_calibration().await {
            Ok(calibration) => calibration,
            Err(e) => {
                self.observer.persist_failed(index, e);
                None
            }
        };
        let position = match self.store.load_position().await {
            Ok(position) => position,
            Err(e) => {
                self.observer.persist_failed(index, e);
                None
            }
        };

        self.driver.initialize_driver(calibration, position);
        self.reported = self.driver.get_status();
    }

    /// Store used for persistence
    pub fn store(&self) -> &P {
        &self.store
    }

    /// Status observer
    pub fn observer(&self) -> &O {
        &self.observer
    }

    /// Run the step loop until `stop_handler` is called
    ///
    /// Waits for `start_handler` first. Step emission is paced by `timer`;
    /// while idle the loop parks on the command slot.
    pub async fn run<T: StepTimer>(&mut self, timer: &mut T) {
        self.driver.started.wait().await;

        let mut incoming = None;
        loop {
            let state = self.poll(timer.now_ms(), incoming.take());
            self.flush().await;

            match state {
                LoopState::Idle => incoming = Some(self.driver.command.wait().await),
                LoopState::Started => {
                    timer.restart();
                    timer.next().await;
                }
                LoopState::Stepping => timer.next().await,
                LoopState::Exit => break,
            }
        }

        self.release_stage();
        self.driver.exited.signal(());
    }

    /// Run one iteration of the step loop
    ///
    /// `incoming` is a command already taken from the slot; a newer one
    /// still in the slot replaces it.
    pub fn poll(&mut self, now_ms: u64, incoming: Option<Command>) -> LoopState {
        let driver = self.driver;
        let mut notes = Notes::default();

        let (pulse, started) =
            driver.with_state(|s| self.prepare(s, now_ms, incoming, &mut notes));

        let outcome = pulse.map(|pulse| self.emit(pulse));

        let state = driver.with_state(|s| {
            if let Some(outcome) = outcome {
                self.commit(s, outcome, now_ms, &mut notes);
            }
            self.reported = s.status;

            match (self.active.is_some(), started) {
                (true, true) => LoopState::Started,
                (true, false) => LoopState::Stepping,
                (false, _) if !s.keep_handler_running => LoopState::Exit,
                (false, _) => LoopState::Idle,
            }
        });

        if self.active.is_none() {
            self.release_stage();
        }

        let index = driver.index();
        for (from, to) in notes.transitions {
            self.observer.status_changed(index, from, to);
        }
        if let Some(step) = notes.settled_at {
            self.observer.position_settled(index, step);
        }

        state
    }

    /// Write dirty calibration and position to the store
    async fn flush(&mut self) {
        let (calibration, position) = self.driver.with_state(|s| {
            let calibration = if core::mem::take(&mut s.calibration_dirty) {
                s.calibration
            } else {
                None
            };
            let position = core::mem::take(&mut s.position_dirty).then_some(s.current_step);
            (calibration, position)
        });

        let index = self.driver.index();
        if let Some(params) = calibration {
            if let Err(e) = self.store.save_calibration(params).await {
                self.observer.persist_failed(index, e);
            }
        }
        if let Some(step) = position {
            if let Err(e) = self.store.save_position(step).await {
                self.observer.persist_failed(index, e);
            }
        }
    }

    /// Observe cancellation, adopt the newest command and plan the next pulse
    ///
    /// Returns the pulse to emit and whether a motion was adopted.
    fn prepare(
        &mut self,
        s: &mut DriverState,
        now_ms: u64,
        incoming: Option<Command>,
        notes: &mut Notes,
    ) -> (Option<Pulse>, bool) {
        if s.status != self.reported {
            notes.record(Some((self.reported, s.status)));
        }

        let command = self.driver.command.try_take().or(incoming);
        let replaces = matches!(command, Some(Command::Travel(_) | Command::Calibrate));

        if s.stop_requested || (replaces && self.active.is_some()) {
            s.stop_requested = false;
            self.settle(s, DriverEvent::Cancelled, notes);
        }

        let started = match command {
            Some(Command::Travel(target)) => self.adopt_travel(s, target, now_ms, notes),
            Some(Command::Calibrate) => self.adopt_calibration(s, now_ms, notes),
            _ => false,
        };

        let pulse = if self.active.is_some() {
            self.plan(s, now_ms, notes)
        } else {
            None
        };
        (pulse, started)
    }

    fn adopt_travel(
        &mut self,
        s: &mut DriverState,
        target: u32,
        now_ms: u64,
        notes: &mut Notes,
    ) -> bool {
        if !s.driver_enabled {
            notes.record(s.apply(DriverEvent::Cancelled));
            s.is_motor_running = false;
            return false;
        }

        s.expected_step = target;
        s.blind_traversal_requested = false;

        let Some(direction) = Direction::between(s.current_step, target) else {
            notes.record(s.apply(DriverEvent::Arrived));
            s.is_motor_running = false;
            return false;
        };

        s.direction = direction;
        s.is_motor_running = true;
        s.last_motor_start_ms = now_ms;
        notes.record(s.apply(DriverEvent::MotionAccepted));
        self.monitor.motion_started(now_ms);
        self.endstop.clear();
        self.active = Some(ActiveMotion::Travel { target });
        true
    }

    fn adopt_calibration(&mut self, s: &mut DriverState, now_ms: u64, notes: &mut Notes) -> bool {
        if !s.driver_enabled {
            notes.record(s.apply(DriverEvent::Cancelled));
            s.is_motor_running = false;
            s.blind_traversal_requested = false;
            return false;
        }

        s.direction = Direction::Reverse;
        s.blind_traversal_requested = true;
        s.is_motor_running = true;
        s.last_motor_start_ms = now_ms;
        notes.record(s.apply(DriverEvent::CalibrationAccepted));
        self.monitor.motion_started(now_ms);
        self.endstop.clear();
        self.active = Some(ActiveMotion::Calibrate {
            phase: CalibrationPhase::Seek,
            steps: 0,
        });
        true
    }

    /// Settle on timeout, arrival or the calibration ceiling, or plan a pulse
    fn plan(&mut self, s: &mut DriverState, now_ms: u64, notes: &mut Notes) -> Option<Pulse> {
        if let SafetyStatus::Fault(fault) = self.monitor.check(now_ms) {
            self.settle(s, DriverEvent::FaultDetected(fault), notes);
            return None;
        }

        let (direction, sense) = match self.active? {
            ActiveMotion::Travel { target } => {
                if s.current_step == target {
                    self.settle(s, DriverEvent::Arrived, notes);
                    return None;
                }
                (s.direction, true)
            }
            ActiveMotion::Calibrate { steps, .. } if steps >= self.config.calibration_ceiling_steps => {
                self.settle(s, DriverEvent::FaultDetected(Fault::CalibrationFailed), notes);
                return None;
            }
            ActiveMotion::Calibrate {
                phase: CalibrationPhase::Seek,
                ..
            } => (Direction::Reverse, true),
            ActiveMotion::Calibrate {
                phase: CalibrationPhase::Measure,
                steps,
            } => {
                // The end-stop that marked zero is still active until released
                let released = steps > 0 && steps >= self.config.release_steps;
                (Direction::Forward, released)
            }
        };

        Some(Pulse {
            forward: (direction == Direction::Forward) != self.inverted(s),
            sense,
        })
    }

    /// Drive the pins for one planned pulse
    fn emit(&mut self, pulse: Pulse) -> PulseOutcome {
        if self.engage(pulse.forward).is_err() {
            return PulseOutcome::Failed;
        }
        if pulse.sense && self.endstop.is_triggered() {
            return PulseOutcome::EndStop;
        }
        match self.stepper.step() {
            Ok(()) => PulseOutcome::Stepped,
            Err(_) => PulseOutcome::Failed,
        }
    }

    /// Apply the result of the pulse to the shared state
    fn commit(&mut self, s: &mut DriverState, outcome: PulseOutcome, now_ms: u64, notes: &mut Notes) {
        let Some(active) = self.active else {
            return;
        };
        if outcome == PulseOutcome::Failed {
            self.settle(s, DriverEvent::FaultDetected(Fault::Hardware), notes);
            return;
        }

        match (active, outcome) {
            (ActiveMotion::Travel { target }, PulseOutcome::EndStop) => {
                let event = match self
                    .monitor
                    .classify_end_stop(s.current_step, target, s.full())
                {
                    EndStopVerdict::Arrived => DriverEvent::Arrived,
                    EndStopVerdict::Stalled => DriverEvent::FaultDetected(Fault::Stall),
                };
                self.settle(s, event, notes);
            }
            (ActiveMotion::Travel { target }, _) => {
                // Travel never passes its target, so neither bound is crossed
                s.current_step = match s.direction {
                    Direction::Forward => s.current_step + 1,
                    Direction::Reverse => s.current_step - 1,
                };
                if s.current_step == target {
                    self.settle(s, DriverEvent::Arrived, notes);
                }
            }
            (
                ActiveMotion::Calibrate {
                    phase: CalibrationPhase::Seek,
                    ..
                },
                PulseOutcome::EndStop,
            ) => {
                // Zero reference found
                s.current_step = 0;
                s.direction = Direction::Forward;
                s.last_motor_start_ms = now_ms;
                self.endstop.clear();
                self.monitor.motion_started(now_ms);
                self.active = Some(ActiveMotion::Calibrate {
                    phase: CalibrationPhase::Measure,
                    steps: 0,
                });
            }
            (
                ActiveMotion::Calibrate {
                    phase: CalibrationPhase::Seek,
                    steps,
                },
                _,
            ) => {
                s.current_step = match s.current_step.checked_sub(1) {
                    Some(step) => step,
                    // Below the believed zero the stored reference is stale;
                    // positions re-base at 0 until the end-stop fires
                    None => 0,
                };
                self.active = Some(ActiveMotion::Calibrate {
                    phase: CalibrationPhase::Seek,
                    steps: steps + 1,
                });
            }
            (
                ActiveMotion::Calibrate {
                    phase: CalibrationPhase::Measure,
                    steps,
                },
                PulseOutcome::EndStop,
            ) => {
                s.calibration = Some(CalibrationParams::new(steps, self.inverted(s)));
                s.current_step = steps;
                s.expected_step = steps;
                s.calibration_dirty = true;
                self.settle(s, DriverEvent::Calibrated, notes);
            }
            (
                ActiveMotion::Calibrate {
                    phase: CalibrationPhase::Measure,
                    steps,
                },
                _,
            ) => {
                s.current_step = steps + 1;
                self.active = Some(ActiveMotion::Calibrate {
                    phase: CalibrationPhase::Measure,
                    steps: steps + 1,
                });
            }
        }
    }

    /// Finish the active motion, or drop an accepted one that never started
    ///
    /// The stage is powered down at the end of the iteration.
    fn settle(&mut self, s: &mut DriverState, event: DriverEvent, notes: &mut Notes) {
        let finished = self.active.take();
        self.monitor.motion_settled();

        let calibration_aborted = matches!(finished, Some(ActiveMotion::Calibrate { .. }))
            && event != DriverEvent::Calibrated;
        if calibration_aborted {
            // The prior range, if any, is still in force
            if let Some(full) = s.full() {
                s.current_step = s.current_step.min(full);
            }
            s.expected_step = s.current_step;
        }

        notes.record(s.apply(event));
        s.is_motor_running = false;
        s.blind_traversal_requested = false;

        if finished.is_some() {
            s.position_dirty = true;
            notes.settled_at = Some(s.current_step);
        }
    }

    fn inverted(&self, s: &DriverState) -> bool {
        s.calibration
            .map(|c| c.direction_inverted)
            .unwrap_or(self.config.direction_inverted)
    }

    /// Power the stage and set the physical direction
    fn engage(&mut self, forward: bool) -> Result<(), StepperError> {
        if !self.stage_enabled {
            self.stepper.enable()?;
            self.stage_enabled = true;
        }
        if self.heading != Some(forward) {
            self.stepper.set_direction(forward)?;
            self.heading = Some(forward);
        }
        Ok(())
    }

    fn release_stage(&mut self) {
        if self.stage_enabled {
            // Nothing useful to do if the stage refuses to power down
            let _ = self.stepper.disable();
            self.stage_enabled = false;
            self.heading = None;
        }
    }
}

impl<M, S, E, P, O> Drop for Handler<'_, M, S, E, P, O>
where
    M: RawMutex,
    S: StepperCapability,
    E: EndStop,
    P: BlindStore,
    O: StatusObserver,
{
    fn drop(&mut self) {
        self.release_stage();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::RefCell;
    use core::future::Future;

    use embassy_futures::block_on;
    use embassy_futures::join::join;
    use embassy_futures::yield_now;
    use embassy_sync::blocking_mutex::raw::NoopRawMutex;

    use crate::motion::MotionRequest;
    use crate::traits::StoreError;
    use crate::driver::{DriverError, DriverSnapshot};
    use madac_hal::FlashError;

    /// Physical blind shared by the fake stepper and the fake end-stop
    struct Blind {
        position: u32,
        limit: u32,
        jam_at: Option<u32>,
        forward: bool,
        enabled: bool,
        pulses: u32,
        max_position: u32,
        fail_step: bool,
        silent: bool,
    }

    impl Blind {
        fn at(position: u32) -> RefCell<Self> {
            RefCell::new(Self {
                position,
                limit: 4800,
                jam_at: None,
                forward: true,
                enabled: false,
                pulses: 0,
                max_position: position,
                fail_step: false,
                silent: false,
            })
        }

        /// Pushing against a limit or a jam
        fn blocked(&self) -> bool {
            if self.forward {
                self.position >= self.limit || Some(self.position) == self.jam_at
            } else {
                self.position == 0
            }
        }
    }

    struct SimStepper<'a>(&'a RefCell<Blind>);

    impl StepperCapability for SimStepper<'_> {
        fn enable(&mut self) -> Result<(), StepperError> {
            self.0.borrow_mut().enabled = true;
            Ok(())
        }

        fn disable(&mut self) -> Result<(), StepperError> {
            self.0.borrow_mut().enabled = false;
            Ok(())
        }

        fn set_direction(&mut self, forward: bool) -> Result<(), StepperError> {
            self.0.borrow_mut().forward = forward;
            Ok(())
        }

        fn step(&mut self) -> Result<(), StepperError> {
            let mut b = self.0.borrow_mut();
            if b.fail_step {
                return Err(StepperError::DriverFault);
            }
            if !b.enabled {
                return Err(StepperError::Pin);
            }
            b.pulses += 1;
            if !b.blocked() {
                if b.forward {
                    b.position += 1;
                } else {
                    b.position -= 1;
                }
            }
            b.max_position = b.max_position.max(b.position);
            Ok(())
        }
    }

    struct SimEndStop<'a>(&'a RefCell<Blind>);

    impl EndStop for SimEndStop<'_> {
        fn is_triggered(&mut self) -> bool {
            let b = self.0.borrow();
            !b.silent && b.blocked()
        }
    }

    #[derive(Default)]
    struct MemStore {
        calibration: Option<CalibrationParams>,
        position: Option<u32>,
        writes: u32,
        fail: bool,
    }

    impl BlindStore for MemStore {
        async fn load_calibration(&mut self) -> Result<Option<CalibrationParams>, StoreError> {
            Ok(self.calibration)
        }

        async fn save_calibration(&mut self, params: CalibrationParams) -> Result<(), StoreError> {
            if self.fail {
                return Err(StoreError::Flash(FlashError::Full));
            }
            self.writes += 1;
            self.calibration = Some(params);
            Ok(())
        }

        async fn load_position(&mut self) -> Result<Option<u32>, StoreError> {
            Ok(self.position)
        }

        async fn save_position(&mut self, step: u32) -> Result<(), StoreError> {
            if self.fail {
                return Err(StoreError::Flash(FlashError::Full));
            }
            self.writes += 1;
            self.position = Some(step);
            Ok(())
        }
    }

    #[derive(Default)]
    struct Recorder {
        transitions: Vec<(DriverStatus, DriverStatus), 32>,
        settled: Vec<u32, 32>,
        persist_failures: u32,
    }

    impl StatusObserver for Recorder {
        fn status_changed(&mut self, _index: u8, from: DriverStatus, to: DriverStatus) {
            let _ = self.transitions.push((from, to));
        }

        fn position_settled(&mut self, _index: u8, step: u32) {
            let _ = self.settled.push(step);
        }

        fn persist_failed(&mut self, _index: u8, _error: StoreError) {
            self.persist_failures += 1;
        }
    }

    struct FakeTimer {
        now_us: u64,
        interval_us: u64,
        restarts: u32,
    }

    impl StepTimer for FakeTimer {
        async fn next(&mut self) {
            self.now_us += self.interval_us;
            yield_now().await;
        }

        fn restart(&mut self) {
            self.restarts += 1;
        }

        fn now_ms(&self) -> u64 {
            self.now_us / 1000
        }
    }

    type Driver = MotorDriver<NoopRawMutex>;
    type SimHandler<'a> = Handler<'a, NoopRawMutex, SimStepper<'a>, SimEndStop<'a>, MemStore, Recorder>;

    fn config() -> MotionConfig {
        MotionConfig {
            step_interval_us: 1000,
            max_traversal_ms: 60_000,
            calibration_ceiling_steps: 20_000,
            release_steps: 50,
            ..MotionConfig::new()
        }
    }

    fn handler<'a>(
        driver: &'a Driver,
        blind: &'a RefCell<Blind>,
        store: MemStore,
        config: MotionConfig,
    ) -> SimHandler<'a> {
        let mut handler = Handler::new(
            driver,
            SimStepper(blind),
            SimEndStop(blind),
            store,
            Recorder::default(),
            config,
        );
        block_on(handler.initialize());
        driver.enable_driver(true);
        driver.start_handler();
        handler
    }

    fn calibrated_store(position: u32) -> MemStore {
        MemStore {
            calibration: Some(CalibrationParams::new(4800, false)),
            position: Some(position),
            ..MemStore::default()
        }
    }

    fn run(handler: &mut SimHandler<'_>, script: impl Future<Output = ()>) -> FakeTimer {
        let mut timer = FakeTimer {
            now_us: 0,
            interval_us: 1000,
            restarts: 0,
        };
        block_on(async {
            join(handler.run(&mut timer), script).await;
        });
        timer
    }

    async fn wait_until(driver: &Driver, f: impl Fn(&DriverSnapshot) -> bool) {
        for _ in 0..1_000_000 {
            if f(&driver.snapshot()) {
                return;
            }
            yield_now().await;
        }
        panic!("condition not reached");
    }

    async fn settled(driver: &Driver) {
        wait_until(driver, |s| !s.is_motor_running && !s.status.is_running()).await;
    }

    #[test]
    fn test_move_to_percentage() {
        let driver = Driver::new(0);
        let blind = Blind::at(0);
        let mut h = handler(&driver, &blind, calibrated_store(0), config());

        let timer = run(&mut h, async {
            driver.fulfill_request(MotionRequest::Percentage(50)).unwrap();
            assert_eq!(driver.get_status(), DriverStatus::Moving);
            settled(&driver).await;
            driver.stop_handler().await;
        });

        assert_eq!(driver.get_steps().current, 2400);
        assert_eq!(driver.get_percentage(), Ok(50));
        assert_eq!(driver.get_status(), DriverStatus::Idle);
        assert_eq!(blind.borrow().pulses, 2400);
        assert_eq!(blind.borrow().position, 2400);
        assert!(!blind.borrow().enabled);
        assert_eq!(h.store().position, Some(2400));
        assert_eq!(timer.restarts, 1);
        assert_eq!(
            h.observer().transitions.as_slice(),
            &[
                (DriverStatus::Idle, DriverStatus::Moving),
                (DriverStatus::Moving, DriverStatus::Idle)
            ]
        );
        assert_eq!(h.observer().settled.as_slice(), &[2400]);
    }

    #[test]
    fn test_request_current_position_moves_nothing() {
        let driver = Driver::new(0);
        let blind = Blind::at(2400);
        let mut h = handler(&driver, &blind, calibrated_store(2400), config());

        run(&mut h, async {
            driver.fulfill_request(MotionRequest::Percentage(50)).unwrap();
            assert_eq!(driver.get_status(), DriverStatus::Idle);
            driver.stop_handler().await;
        });

        assert_eq!(blind.borrow().pulses, 0);
        assert!(h.observer().transitions.is_empty());
        assert_eq!(h.store().writes, 0);
    }

    #[test]
    fn test_cancel_stops_between_start_and_target() {
        let driver = Driver::new(0);
        let blind = Blind::at(0);
        let mut h = handler(&driver, &blind, calibrated_store(0), config());

        run(&mut h, async {
            driver.fulfill_request(MotionRequest::Percentage(100)).unwrap();
            wait_until(&driver, |s| s.current_step >= 1000).await;
            assert!(driver.cancel_current_request());
            settled(&driver).await;

            let steps = driver.get_steps();
            assert!(steps.current > 0 && steps.current < 4800);
            assert_eq!(steps.expected, 4800);
            assert_eq!(driver.get_status(), DriverStatus::Idle);
            assert!(!driver.snapshot().stop_requested);
            driver.stop_handler().await;
        });

        let current = driver.get_steps().current;
        assert_eq!(blind.borrow().pulses, current);
        assert_eq!(h.store().position, Some(current));
        assert!(!blind.borrow().enabled);
    }

    #[test]
    fn test_second_request_replaces_first() {
        let driver = Driver::new(0);
        let blind = Blind::at(0);
        let mut h = handler(&driver, &blind, calibrated_store(0), config());

        run(&mut h, async {
            driver.fulfill_request(MotionRequest::Percentage(100)).unwrap();
            wait_until(&driver, |s| s.current_step >= 500).await;
            driver.fulfill_request(MotionRequest::Percentage(10)).unwrap();
            wait_until(&driver, |s| s.expected_step == 480).await;
            settled(&driver).await;
            driver.stop_handler().await;
        });

        assert_eq!(driver.get_steps().current, 480);
        assert_eq!(blind.borrow().position, 480);
        assert!(blind.borrow().max_position < 4800);
        assert_eq!(h.store().position, Some(480));
        assert_eq!(
            h.observer().transitions.as_slice(),
            &[
                (DriverStatus::Idle, DriverStatus::Moving),
                (DriverStatus::Moving, DriverStatus::Idle),
                (DriverStatus::Idle, DriverStatus::Moving),
                (DriverStatus::Moving, DriverStatus::Idle)
            ]
        );
    }

    #[test]
    fn test_request_replaced_before_adoption() {
        let driver = Driver::new(0);
        let blind = Blind::at(0);
        let mut h = handler(&driver, &blind, calibrated_store(0), config());

        run(&mut h, async {
            // Both land before the step loop runs
            driver.fulfill_request(MotionRequest::Percentage(100)).unwrap();
            driver.fulfill_request(MotionRequest::Steps(100)).unwrap();
            settled(&driver).await;
            driver.stop_handler().await;
        });

        assert_eq!(driver.get_steps().current, 100);
        assert_eq!(blind.borrow().max_position, 100);
    }

    #[test]
    fn test_calibration_learns_range() {
        let driver = Driver::new(0);
        let blind = Blind::at(3000);
        let mut h = handler(&driver, &blind, MemStore::default(), config());
        assert_eq!(driver.get_percentage(), Err(DriverError::Uncalibrated));

        run(&mut h, async {
            driver.calibrate().unwrap();
            assert_eq!(driver.get_status(), DriverStatus::Calibrating);
            assert!(driver.snapshot().blind_traversal_requested);
            settled(&driver).await;
            driver.stop_handler().await;
        });

        assert_eq!(driver.calibration(), Some(CalibrationParams::new(4800, false)));
        assert_eq!(driver.get_steps().current, 4800);
        assert_eq!(driver.get_percentage(), Ok(100));
        assert!(!driver.snapshot().blind_traversal_requested);
        assert_eq!(h.store().calibration, Some(CalibrationParams::new(4800, false)));
        assert_eq!(h.store().position, Some(4800));
        assert_eq!(
            h.observer().transitions.as_slice(),
            &[
                (DriverStatus::Idle, DriverStatus::Calibrating),
                (DriverStatus::Calibrating, DriverStatus::Idle)
            ]
        );
    }

    #[test]
    fn test_calibration_failure_keeps_prior() {
        let driver = Driver::new(0);
        let blind = Blind::at(500_000);
        blind.borrow_mut().limit = 1_000_000;
        let mut h = handler(&driver, &blind, calibrated_store(2400), config());

        run(&mut h, async {
            driver.calibrate().unwrap();
            settled(&driver).await;
            driver.stop_handler().await;
        });

        assert_eq!(
            driver.get_status(),
            DriverStatus::Error(Fault::CalibrationFailed)
        );
        assert_eq!(driver.calibration(), Some(CalibrationParams::new(4800, false)));
        assert_eq!(h.store().calibration, Some(CalibrationParams::new(4800, false)));
        assert_eq!(blind.borrow().pulses, 20_000);
        assert!(!blind.borrow().enabled);
    }

    #[test]
    fn test_calibration_ceiling_keeps_position_in_range() {
        let driver = Driver::new(0);
        let blind = Blind::at(0);
        blind.borrow_mut().limit = 1_000_000;
        let mut h = handler(&driver, &blind, calibrated_store(0), config());

        run(&mut h, async {
            driver.calibrate().unwrap();
            settled(&driver).await;
            driver.stop_handler().await;
        });

        assert_eq!(
            driver.get_status(),
            DriverStatus::Error(Fault::CalibrationFailed)
        );
        assert_eq!(driver.get_steps().current, 4800);
        assert_eq!(driver.get_steps().expected, 4800);
        assert_eq!(driver.get_percentage(), Ok(100));
        assert_eq!(h.store().position, Some(4800));
        assert_eq!(h.observer().settled.as_slice(), &[4800]);
    }

    #[test]
    fn test_calibration_cancelled_past_prior_range() {
        let driver = Driver::new(0);
        let blind = Blind::at(3000);
        blind.borrow_mut().limit = 6000;
        let mut h = handler(&driver, &blind, calibrated_store(3000), config());

        run(&mut h, async {
            driver.calibrate().unwrap();
            wait_until(&driver, |s| {
                s.status == DriverStatus::Calibrating
                    && s.direction == Direction::Forward
                    && s.current_step >= 5500
            })
            .await;
            assert!(driver.cancel_current_request());
            settled(&driver).await;
            driver.stop_handler().await;
        });

        assert_eq!(driver.get_status(), DriverStatus::Idle);
        assert_eq!(driver.calibration(), Some(CalibrationParams::new(4800, false)));
        assert_eq!(driver.get_steps().current, 4800);
        assert_eq!(driver.get_steps().expected, 4800);
        assert_eq!(driver.get_percentage(), Ok(100));
        assert_eq!(h.store().position, Some(4800));
        assert_eq!(h.store().calibration, Some(CalibrationParams::new(4800, false)));
    }

    #[test]
    fn test_seek_below_believed_zero_rebases() {
        let driver = Driver::new(0);
        let blind = Blind::at(3000);
        let mut h = handler(&driver, &blind, calibrated_store(1000), config());

        run(&mut h, async {
            driver.calibrate().unwrap();
            wait_until(&driver, |s| {
                assert!(s.current_step <= 1000);
                blind.borrow().pulses >= 2000
            })
            .await;
            assert_eq!(driver.get_steps().current, 0);
            assert!(driver.cancel_current_request());
            settled(&driver).await;
            driver.stop_handler().await;
        });

        assert_eq!(driver.get_status(), DriverStatus::Idle);
        assert_eq!(driver.get_steps().current, 0);
        assert_eq!(driver.get_steps().expected, 0);
        assert_eq!(driver.get_percentage(), Ok(0));
        assert_eq!(h.store().position, Some(0));
    }

    #[test]
    fn test_request_replaces_calibration_while_seeking() {
        let driver = Driver::new(0);
        let blind = Blind::at(3000);
        let mut h = handler(&driver, &blind, calibrated_store(3000), config());

        run(&mut h, async {
            driver.calibrate().unwrap();
            wait_until(&driver, |s| {
                s.status == DriverStatus::Calibrating && s.current_step <= 2000
            })
            .await;
            driver.fulfill_request(MotionRequest::Percentage(50)).unwrap();
            wait_until(&driver, |s| s.expected_step == 2400).await;
            settled(&driver).await;
            driver.stop_handler().await;
        });

        assert_eq!(driver.get_status(), DriverStatus::Idle);
        assert_eq!(driver.calibration(), Some(CalibrationParams::new(4800, false)));
        assert_eq!(driver.get_steps().current, 2400);
        assert_eq!(blind.borrow().position, 2400);
        assert!(!driver.snapshot().blind_traversal_requested);
        assert_eq!(h.store().position, Some(2400));
        assert_eq!(
            h.observer().transitions.as_slice(),
            &[
                (DriverStatus::Idle, DriverStatus::Calibrating),
                (DriverStatus::Calibrating, DriverStatus::Idle),
                (DriverStatus::Idle, DriverStatus::Moving),
                (DriverStatus::Moving, DriverStatus::Idle)
            ]
        );
    }

    #[test]
    fn test_cancel_calibration_while_measuring() {
        let driver = Driver::new(0);
        let blind = Blind::at(3000);
        let mut h = handler(&driver, &blind, calibrated_store(3000), config());

        run(&mut h, async {
            driver.calibrate().unwrap();
            wait_until(&driver, |s| {
                s.status == DriverStatus::Calibrating
                    && s.direction == Direction::Forward
                    && s.current_step >= 1000
            })
            .await;
            assert!(driver.cancel_current_request());
            settled(&driver).await;
            driver.stop_handler().await;
        });

        let current = driver.get_steps().current;
        assert_eq!(driver.get_status(), DriverStatus::Idle);
        assert_eq!(driver.calibration(), Some(CalibrationParams::new(4800, false)));
        assert!(current >= 1000 && current < 4800);
        assert_eq!(driver.get_steps().expected, current);
        assert_eq!(blind.borrow().position, current);
        assert!(!driver.snapshot().blind_traversal_requested);
        assert_eq!(h.store().position, Some(current));
        assert_eq!(
            h.observer().transitions.as_slice(),
            &[
                (DriverStatus::Idle, DriverStatus::Calibrating),
                (DriverStatus::Calibrating, DriverStatus::Idle)
            ]
        );
    }

    #[test]
    fn test_pins_driven_outside_state_lock() {
        struct LockCheck<'a> {
            driver: &'a Driver,
            blind: &'a RefCell<Blind>,
        }

        impl StepperCapability for LockCheck<'_> {
            fn enable(&mut self) -> Result<(), StepperError> {
                self.driver.get_status();
                SimStepper(self.blind).enable()
            }

            fn disable(&mut self) -> Result<(), StepperError> {
                self.driver.get_status();
                SimStepper(self.blind).disable()
            }

            fn set_direction(&mut self, forward: bool) -> Result<(), StepperError> {
                self.driver.get_status();
                SimStepper(self.blind).set_direction(forward)
            }

            fn step(&mut self) -> Result<(), StepperError> {
                // Re-entering the state lock panics on a held RefCell borrow
                self.driver.get_status();
                SimStepper(self.blind).step()
            }
        }

        let driver = Driver::new(0);
        let blind = Blind::at(0);
        let mut h = Handler::new(
            &driver,
            LockCheck {
                driver: &driver,
                blind: &blind,
            },
            SimEndStop(&blind),
            calibrated_store(0),
            Recorder::default(),
            config(),
        );
        block_on(h.initialize());
        driver.enable_driver(true);
        driver.start_handler();
        driver.fulfill_request(MotionRequest::Steps(20)).unwrap();

        let mut now = 0;
        while h.poll(now, None) != LoopState::Idle {
            now += 1;
        }

        assert_eq!(driver.get_steps().current, 20);
        assert_eq!(blind.borrow().position, 20);
        assert!(!blind.borrow().enabled);
    }

    #[test]
    fn test_stall_faults_and_stops_stepping() {
        let driver = Driver::new(0);
        let blind = Blind::at(0);
        blind.borrow_mut().jam_at = Some(1000);
        let mut h = handler(&driver, &blind, calibrated_store(0), config());

        run(&mut h, async {
            driver.fulfill_request(MotionRequest::Percentage(100)).unwrap();
            settled(&driver).await;
            assert_eq!(driver.get_status(), DriverStatus::Error(Fault::Stall));

            let pulses = blind.borrow().pulses;
            for _ in 0..100 {
                yield_now().await;
            }
            assert_eq!(blind.borrow().pulses, pulses);

            assert_eq!(
                driver.fulfill_request(MotionRequest::Percentage(0)),
                Err(DriverError::Faulted(Fault::Stall))
            );
            driver.stop_handler().await;
        });

        assert_eq!(driver.get_steps().current, 1000);
        assert_eq!(h.store().position, Some(1000));
    }

    #[test]
    fn test_stall_near_target_counts_as_arrival() {
        let driver = Driver::new(0);
        let blind = Blind::at(0);
        // 100 steps short of the top, inside the 5% allowance
        blind.borrow_mut().jam_at = Some(4700);
        let mut h = handler(&driver, &blind, calibrated_store(0), config());

        run(&mut h, async {
            driver.fulfill_request(MotionRequest::Percentage(100)).unwrap();
            settled(&driver).await;
            driver.stop_handler().await;
        });

        assert_eq!(driver.get_status(), DriverStatus::Idle);
        assert_eq!(driver.get_steps().current, 4700);
    }

    #[test]
    fn test_timeout_without_sensor() {
        let driver = Driver::new(0);
        let blind = Blind::at(0);
        {
            let mut b = blind.borrow_mut();
            b.jam_at = Some(10);
            b.silent = true;
        }
        let config = MotionConfig {
            max_traversal_ms: 50,
            ..config()
        };
        let mut h = handler(&driver, &blind, calibrated_store(0), config);

        run(&mut h, async {
            driver.fulfill_request(MotionRequest::Percentage(100)).unwrap();
            settled(&driver).await;
            driver.stop_handler().await;
        });

        assert_eq!(driver.get_status(), DriverStatus::Error(Fault::Timeout));
        let current = driver.get_steps().current;
        assert!(current > 10 && current < 4800);
        assert_eq!(blind.borrow().position, 10);
    }

    #[test]
    fn test_hardware_fault() {
        let driver = Driver::new(0);
        let blind = Blind::at(0);
        blind.borrow_mut().fail_step = true;
        let mut h = handler(&driver, &blind, calibrated_store(0), config());

        run(&mut h, async {
            driver.fulfill_request(MotionRequest::Percentage(20)).unwrap();
            settled(&driver).await;
            driver.stop_handler().await;
        });

        assert_eq!(driver.get_status(), DriverStatus::Error(Fault::Hardware));
        assert_eq!(driver.get_steps().current, 0);
        assert!(!blind.borrow().enabled);
    }

    #[test]
    fn test_recover_after_fault_with_reset() {
        let driver = Driver::new(0);
        let blind = Blind::at(0);
        blind.borrow_mut().jam_at = Some(1000);
        let mut h = handler(&driver, &blind, calibrated_store(0), config());

        run(&mut h, async {
            driver.fulfill_request(MotionRequest::Percentage(100)).unwrap();
            settled(&driver).await;

            blind.borrow_mut().jam_at = None;
            driver.reset_steps(1000).unwrap();
            assert_eq!(driver.get_status(), DriverStatus::Idle);
            driver.fulfill_request(MotionRequest::Steps(1200)).unwrap();
            settled(&driver).await;
            driver.stop_handler().await;
        });

        assert_eq!(driver.get_status(), DriverStatus::Idle);
        assert_eq!(driver.get_steps().current, 1200);
        assert_eq!(blind.borrow().position, 1200);
    }

    #[test]
    fn test_stop_handler_cancels_motion() {
        let driver = Driver::new(0);
        let blind = Blind::at(0);
        let mut h = handler(&driver, &blind, calibrated_store(0), config());

        run(&mut h, async {
            driver.fulfill_request(MotionRequest::Percentage(100)).unwrap();
            wait_until(&driver, |s| s.current_step >= 100).await;
            driver.stop_handler().await;

            let snap = driver.snapshot();
            assert!(!snap.keep_handler_running);
            assert!(!snap.is_motor_running);
            assert_eq!(snap.status, DriverStatus::Idle);
            assert_eq!(
                driver.fulfill_request(MotionRequest::Percentage(0)),
                Err(DriverError::HandlerStopped)
            );
        });

        assert!(!blind.borrow().enabled);
        assert_eq!(h.store().position, Some(driver.get_steps().current));
    }

    #[test]
    fn test_disable_cancels_motion() {
        let driver = Driver::new(0);
        let blind = Blind::at(0);
        let mut h = handler(&driver, &blind, calibrated_store(0), config());

        run(&mut h, async {
            driver.fulfill_request(MotionRequest::Percentage(100)).unwrap();
            wait_until(&driver, |s| s.current_step >= 10).await;
            driver.enable_driver(false);
            settled(&driver).await;
            assert!(!blind.borrow().enabled);
            assert_eq!(
                driver.fulfill_request(MotionRequest::Percentage(0)),
                Err(DriverError::Disabled)
            );
            driver.stop_handler().await;
        });

        assert_eq!(driver.get_status(), DriverStatus::Idle);
    }

    #[test]
    fn test_restart_restores_position() {
        let driver = Driver::new(0);
        let blind = Blind::at(2400);
        let _h = handler(&driver, &blind, calibrated_store(2400), config());

        assert_eq!(driver.get_percentage(), Ok(50));
        assert_eq!(blind.borrow().pulses, 0);
    }

    #[test]
    fn test_reset_steps_persisted_by_handler() {
        let driver = Driver::new(0);
        let blind = Blind::at(0);
        let mut h = handler(&driver, &blind, calibrated_store(2400), config());

        run(&mut h, async {
            driver.reset_steps(100).unwrap();
            driver.stop_handler().await;
        });

        assert_eq!(h.store().position, Some(100));
    }

    #[test]
    fn test_persist_failure_reported() {
        let driver = Driver::new(0);
        let blind = Blind::at(0);
        let store = MemStore {
            fail: true,
            ..calibrated_store(0)
        };
        let mut h = handler(&driver, &blind, store, config());

        run(&mut h, async {
            driver.fulfill_request(MotionRequest::Steps(10)).unwrap();
            settled(&driver).await;
            driver.fulfill_request(MotionRequest::Steps(0)).unwrap();
            settled(&driver).await;
            driver.stop_handler().await;
        });

        assert_eq!(driver.get_steps().current, 0);
        assert_eq!(h.observer().persist_failures, 2);
    }

    #[test]
    fn test_inverted_direction() {
        let driver = Driver::new(0);
        let blind = Blind::at(4800);
        let store = MemStore {
            calibration: Some(CalibrationParams::new(4800, true)),
            position: Some(0),
            ..MemStore::default()
        };
        let mut h = handler(&driver, &blind, store, config());

        run(&mut h, async {
            driver.fulfill_request(MotionRequest::Percentage(10)).unwrap();
            settled(&driver).await;
            driver.stop_handler().await;
        });

        assert_eq!(driver.get_steps().current, 480);
        assert_eq!(blind.borrow().position, 4320);
    }

    #[test]
    fn test_handler_restarts_after_stop() {
        let driver = Driver::new(0);
        let blind = Blind::at(0);
        let mut h = handler(&driver, &blind, calibrated_store(0), config());

        run(&mut h, async {
            driver.stop_handler().await;
        });

        driver.start_handler();
        run(&mut h, async {
            driver.fulfill_request(MotionRequest::Steps(20)).unwrap();
            settled(&driver).await;
            driver.stop_handler().await;
        });

        assert_eq!(driver.get_steps().current, 20);
    }

    #[test]
    fn test_drop_releases_stage() {
        let driver = Driver::new(0);
        let blind = Blind::at(0);
        let mut h = handler(&driver, &blind, calibrated_store(0), config());

        driver.fulfill_request(MotionRequest::Steps(10)).unwrap();
        assert_eq!(h.poll(0, None), LoopState::Started);
        assert!(blind.borrow().enabled);

        drop(h);
        assert!(!blind.borrow().enabled);
    }
}
