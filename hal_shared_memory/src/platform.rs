//! Platform-specific mapping and scheduling helpers.

pub mod linux;

pub use linux::*;
