//! HAL Common Library
//!
//! Shared vocabulary for every crate of the HAL core workspace: the numeric
//! limits baked into the shared memory layout, the value and object type
//! enums, and configuration loading.
//!
//! # Module Structure
//!
//! - [`consts`] - Layout limits and version codes (single source of truth)
//! - [`types`] - Value types, pin/parameter directions, object kinds
//! - [`config`] - Configuration loading traits and types
//! - [`prelude`] - Common re-exports for convenience
//!
//! # Usage
//!
//! Add to your `Cargo.toml` with alias for shorter imports:
//! ```toml
//! [dependencies]
//! hal = { package = "hal_common", path = "../hal_common" }
//! ```
//!
//! Then import:
//! ```rust
//! use hal_common::consts::HAL_NAME_LEN;
//! use hal_common::types::{HalType, HalValue};
//! ```

pub mod config;
pub mod consts;
pub mod prelude;
pub mod types;
