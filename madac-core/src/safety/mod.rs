//! Safety monitoring
//!
//! Bounds every motion in time and decides whether an end-stop report
//! is an arrival or a stall.

pub mod monitor;

pub use monitor::*;
