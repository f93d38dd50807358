//! Driver status state machine
//!
//! The status is a pure function of the previous status and a
//! [`DriverEvent`]; the motor driver applies events under its lock.

pub mod events;
pub mod status;

pub use events::DriverEvent;
pub use status::{DriverStatus, Fault};
