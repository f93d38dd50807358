//! Embassy async tasks
//!
//! Each task runs independently and communicates via channels/signals.

pub mod buttons;
pub mod controller;
pub mod indicator;
pub mod motor;
pub mod tmc;

pub use buttons::{buttons_task, Button};
pub use controller::controller_task;
pub use indicator::indicator_task;
pub use motor::{motor_task, BlindHandler, BlindStepper, GuardedStepper};
pub use tmc::tmc_task;
