//! End-stop sensor implementations

pub mod diag;

pub use diag::{DiagConfig, DiagEndStop};
