//! # HAL Core
//!
//! Runtime object model of the hardware abstraction layer: independently
//! built control modules register typed pins, parameters and periodic
//! functions in one shared arena, and configuration wires them together and
//! schedules them, without recompiling anything.
//!
//! # Module Structure
//!
//! - [`core`] - `Hal` handle: create, attach and detach an arena
//! - [`guard`] - machine-wide lock and the [`HalGuard`] that holds it
//! - [`registry`] - generic named-object registry
//! - [`component`], [`instance`] - modules and their instances
//! - [`pin`], [`signal`], [`param`] - data ports and linking
//! - [`funct`], [`thread`], [`executor`] - functions and periodic threads
//! - [`vtable`], [`ring`] - shared function tables and ring segments
//! - [`accessor`] - lock-free typed value access for component code
//! - [`change`], [`snapshot`] - change detection and registry listing
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────── arena (hal_<name>) ─────────────────────────────┐
//! │ MasterRegion: magic, version, lock word, lock level, base period, epsilon[],    │
//! │               ring bitmap, heap state, per-kind free lists                      │
//! │   objects ──► Component ◄─owner─ Pin ──data_ptr──► Signal.data │ Pin.dummy      │
//! │           ──► Instance  ◄─owner─ Param, Funct                                   │
//! │           ──► Thread ──funct_list──► FunctEntry ──► Funct                       │
//! └─────────────────────────────────────────────────────────────────────────────────┘
//!          ▲ offsets only                                ▲ offsets only
//!   ┌──────┴──────┐                                ┌──────┴──────┐
//!   │ process A   │  callbacks, ctors, vtables     │ process B   │
//!   │ Hal::create │  live in the exporting process │ Hal::attach │
//!   └─────────────┘                                └─────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use hal::config::HalConfig;
//! use hal::types::{CompType, HalType, PinDir};
//! use hal_core::Hal;
//!
//! # fn main() -> hal_core::HalResult<()> {
//! let hal = Hal::create(&HalConfig::default())?;
//! let (pin, sig) = {
//!     let mut g = hal.lock();
//!     let comp = g.register_component("foo", CompType::User)?;
//!     let pin = g.create_pin(comp, "foo.bar", HalType::Float, PinDir::Out)?;
//!     let sig = g.create_signal("baz", HalType::Float)?;
//!     g.link_pin(pin, sig)?;
//!     (pin, sig)
//! };
//! hal.pin::<f64>(pin)?.set(3.5);
//! assert_eq!(hal.signal::<f64>(sig)?.get(), 3.5);
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod accessor;
pub mod change;
pub mod component;
pub mod core;
pub mod error;
pub mod executor;
pub mod funct;
pub mod guard;
pub mod instance;
pub mod master;
pub mod object;
pub mod param;
pub mod pin;
pub mod registry;
pub mod ring;
pub mod signal;
pub mod snapshot;
pub mod thread;
pub mod vtable;

#[cfg(test)]
pub(crate) mod test_support;

pub use crate::accessor::{Param, Pin, Signal};
pub use crate::change::value_changed;
pub use crate::component::ComponentInfo;
pub use crate::core::{Hal, arena_path};
pub use crate::error::{HalError, HalResult};
pub use crate::funct::{FunctArgs, FunctCallback, FunctInfo};
pub use crate::guard::HalGuard;
pub use crate::instance::{InstanceCtor, InstanceDtor, InstanceInfo};
pub use crate::master::LockLevel;
pub use crate::object::{
    CompHandle, CompRecord, FunctHandle, FunctRecord, Handle, InstHandle, InstRecord,
    ObjectHeader, ObjectRef, ParamHandle, ParamRecord, PinHandle, PinRecord, Record, RingHandle,
    RingRecord, SigRecord, SignalHandle, ThreadHandle, ThreadRecord, VtableHandle, VtableRecord,
};
pub use crate::param::ParamInfo;
pub use crate::pin::PinInfo;
pub use crate::ring::RingInfo;
pub use crate::signal::SignalInfo;
pub use crate::snapshot::{HalSnapshot, ObjectInfo};
pub use crate::thread::ThreadInfo;
pub use hal::types::ObjectKind;
pub use hal_shared_memory::RingBuffer;

/// Initialize tracing from the shared configuration section.
///
/// `RUST_LOG` directives still apply on top of the configured level. If a
/// global subscriber is already installed it stays in place.
pub fn init_tracing(shared: &hal::config::SharedConfig) {
    use hal::config::LogLevel;
    use tracing::Level;
    use tracing_subscriber::{EnvFilter, fmt};

    let level = match shared.log_level {
        LogLevel::Trace => Level::TRACE,
        LogLevel::Debug => Level::DEBUG,
        LogLevel::Info => Level::INFO,
        LogLevel::Warn => Level::WARN,
        LogLevel::Error => Level::ERROR,
    };
    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        tracing::debug!("Keeping the installed tracing subscriber: {}", e);
    }
}
