//! MaD blinds Hardware Abstraction Layer
//!
//! This crate defines the hardware abstraction traits shared between the
//! board-agnostic core and chip-specific HALs. Only persistent storage lives
//! here; pins and delays come from `embedded-hal`.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │  Application (madac-firmware)           │
//! └─────────────────────────────────────────┘
//!                     │
//!                     ▼
//! ┌─────────────────────────────────────────┐
//! │  madac-hal (this crate - traits)        │
//! └─────────────────────────────────────────┘
//!                     │
//!                     ▼
//!             ┌───────────────┐
//!             │ madac-hal-    │
//!             │    rp2040     │
//!             └───────────────┘
//! ```

#![no_std]
#![deny(unsafe_code)]

pub mod flash;

pub use flash::{FlashError, FlashStorage, StorageKey, MAX_ITEM_SIZE};
