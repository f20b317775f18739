//! Prelude module for common re-exports.
//!
//! ```rust
//! use hal_common::prelude::*;
//! ```

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{
    ArenaConfig, ConfigError, ConfigLoader, HalConfig, LogLevel, SchedulerConfig, SharedConfig,
};

// ─── Layout Constants ───────────────────────────────────────────────
pub use crate::consts::{HAL_NAME_LEN, HAL_VER, MAX_EPSILON};

// ─── Types ──────────────────────────────────────────────────────────
pub use crate::types::{
    CompState, CompType, FunctSignature, HalData, HalType, HalValue, ObjectKind, ParamDir,
    PinDir, PinFlags,
};
