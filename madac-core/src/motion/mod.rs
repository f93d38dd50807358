//! Motion request types and position conversions

pub mod request;

pub use request::*;
