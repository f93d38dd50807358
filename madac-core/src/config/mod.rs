//! Configuration types
//!
//! Board-agnostic configuration structures, the persisted calibration
//! record and the `machine.toml` parser.

pub mod calibration;
pub mod machine;
pub mod parse;

pub use calibration::*;
pub use machine::*;
pub use parse::{parse_config, ParseError};
