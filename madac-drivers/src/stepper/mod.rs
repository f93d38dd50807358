//! Stepper driver implementations

pub mod step_dir;
pub mod tmc2209;

pub use step_dir::{StepDirStepper, StepTiming};
pub use tmc2209::{DrvStatus, Tmc2209Bus, Tmc2209Driver, Tmc2209Error};
