//! Interaction sources
//!
//! Each source is reduced to an [`Intent`](crate::controller::Intent)
//! before it reaches the controller.

pub mod manual;
pub mod voice;

pub use manual::{ButtonClassifier, ManualPush};
pub use voice::VoiceRequest;
