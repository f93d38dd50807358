//! Board-agnostic core logic for the blinds actuator firmware
//!
//! This crate contains all application logic that does not depend on
//! specific hardware implementations:
//!
//! - Hardware abstraction traits (stepper capability, end-stop, step timer,
//!   persistent store, status observer)
//! - Driver status state machine
//! - Motor driver: request fulfillment, cancellation and the step loop
//! - Calibration traversal
//! - Safety monitoring (traversal timeout, stall allowance)
//! - Persisted record formats
//! - Request arbitration and interaction normalisation
//! - Configuration types and the `machine.toml` parser

#![no_std]
#![deny(unsafe_code)]

pub mod config;
pub mod controller;
pub mod driver;
pub mod interaction;
pub mod motion;
pub mod persist;
pub mod safety;
pub mod state;
pub mod traits;
