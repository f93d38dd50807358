//! Hardware driver implementations
//!
//! This crate provides concrete implementations of the traits defined
//! in madac-core for the actuator hardware:
//!
//! - Step/dir stepper capability over `embedded-hal` pins
//! - TMC2209 UART configuration and status readout
//! - StallGuard DIAG end-stop with debounce
//! - Status LED patterns

#![no_std]
#![deny(unsafe_code)]

pub mod endstop;
pub mod indicator;
pub mod stepper;
