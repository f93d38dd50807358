//! Hardware abstraction traits
//!
//! These traits define the interface between the motor-control logic
//! and hardware-specific implementations. The handler owns one value of
//! each and is the only code that drives them.

pub mod endstop;
pub mod observer;
pub mod stepper;
pub mod store;
pub mod timer;

pub use endstop::{EndStop, NoEndStop};
pub use observer::{NullObserver, StatusObserver};
pub use stepper::{Direction, StepperCapability, StepperError};
pub use store::{BlindStore, StoreError};
pub use timer::StepTimer;
