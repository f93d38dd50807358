//! Motor driver
//!
//! [`MotorDriver`] is the caller-side handle: requests, cancellation and
//! queries. [`Handler`] is the step loop that owns the stepper capability
//! and runs on its own task. They share state through a blocking mutex and
//! a single-slot command signal.

pub mod group;
pub mod handler;
pub mod shared;

pub use group::DriverGroup;
pub use handler::{Handler, LoopState};
pub use shared::{Command, DriverError, DriverSnapshot, MotorDriver, StepReport};
