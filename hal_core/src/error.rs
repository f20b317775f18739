//! HAL core error type.

use hal_shared_memory::ShmError;
use thiserror::Error;

/// Errors returned by HAL core operations.
///
/// Every expected failure is one of these; lookups that miss return `None`
/// instead.
#[derive(Error, Debug)]
pub enum HalError {
    /// Arena was built by an incompatible HAL; attach refused
    #[error("HAL version mismatch: expected {expected:#x}, found {found:#x}")]
    VersionMismatch {
        /// Version this process was built for
        expected: u32,
        /// Version found in the arena
        found: u32,
    },

    /// Shared arena exhausted
    #[error("Out of HAL memory: requested {requested} bytes, {available} available")]
    OutOfMemory {
        /// Requested size
        requested: usize,
        /// Free bytes left
        available: usize,
    },

    /// Name already taken by an object of any kind
    #[error("Duplicate name: {0}")]
    DuplicateName(String),

    /// Name exceeds the bounded length
    #[error("Invalid name '{name}': length {len}, max {max}")]
    NameTooLong {
        /// Offending name
        name: String,
        /// Its length in bytes
        len: usize,
        /// Maximum accepted length
        max: usize,
    },

    /// Handle is stale or names no live object
    #[error("Object not found: {0}")]
    NotFound(String),

    /// Pin and signal (or value and object) types differ
    #[error("Type mismatch on {name}: expected {expected}, found {found}")]
    TypeMismatch {
        /// Object name
        name: String,
        /// Type required
        expected: hal::types::HalType,
        /// Type supplied
        found: hal::types::HalType,
    },

    /// Pin is already linked to another signal
    #[error("Pin {pin} is already linked to {signal}")]
    AlreadyLinked {
        /// Pin name
        pin: String,
        /// Name of the signal it is linked to
        signal: String,
    },

    /// Signal already has a driver the new pin would conflict with
    #[error("Signal {signal} already has a writer; cannot link {pin}")]
    WriterConflict {
        /// Signal name
        signal: String,
        /// Pin name
        pin: String,
    },

    /// Component has no constructor (not instantiable from this process)
    #[error("Component {0} has no constructor")]
    NoConstructor(String),

    /// Userland function cannot be added to a thread
    #[error("Function {0} cannot be scheduled")]
    NotSchedulable(String),

    /// Legacy function cannot be called out of band
    #[error("Function {0} cannot be called directly")]
    NotCallable(String),

    /// Parameter is read-only from outside its owner
    #[error("Parameter {0} is read-only")]
    ReadOnly(String),

    /// Operation forbidden by the current lock level
    #[error("HAL locked against {0}")]
    Locked(&'static str),

    /// Thread function lists are frozen while threads run
    #[error("Threads are running")]
    SchedulerRunning,

    /// Object is still referenced
    #[error("{name} is busy ({refs} references)")]
    Busy {
        /// Object name
        name: String,
        /// Outstanding references
        refs: u32,
    },

    /// A fixed capacity has been reached
    #[error("Limit reached: {resource} (max {limit})")]
    Exhausted {
        /// What ran out
        resource: &'static str,
        /// Its capacity
        limit: usize,
    },

    /// Argument out of range or inconsistent
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Shared memory failure
    #[error(transparent)]
    Shm(ShmError),

    /// Configuration failure
    #[error(transparent)]
    Config(#[from] hal::config::ConfigError),
}

impl From<ShmError> for HalError {
    fn from(e: ShmError) -> Self {
        match e {
            ShmError::OutOfMemory {
                requested,
                available,
            } => HalError::OutOfMemory {
                requested,
                available,
            },
            other => HalError::Shm(other),
        }
    }
}

/// Result type for HAL core operations
pub type HalResult<T> = Result<T, HalError>;
