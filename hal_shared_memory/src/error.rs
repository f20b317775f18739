//! Error types for shared memory operations

use thiserror::Error;

/// Errors that can occur during shared memory operations
#[derive(Error, Debug)]
pub enum ShmError {
    /// Segment already exists
    #[error("Segment already exists: {name}")]
    AlreadyExists {
        /// Segment name
        name: String,
    },

    /// Segment not found
    #[error("Segment not found: {name}")]
    NotFound {
        /// Segment name
        name: String,
    },

    /// Invalid segment or record size
    #[error("Invalid size: {size} bytes")]
    InvalidSize {
        /// Attempted size in bytes
        size: usize,
    },

    /// Segment does not start with the expected magic
    #[error("Segment {name} has an invalid header")]
    BadMagic {
        /// Segment name
        name: String,
    },

    /// Heap exhausted
    #[error("Out of shared memory: requested {requested} bytes, {available} available")]
    OutOfMemory {
        /// Requested payload size
        requested: usize,
        /// Free bytes left in the heap (possibly fragmented)
        available: usize,
    },

    /// Pointer handed to `free` was not a live heap allocation
    #[error("Invalid free of offset {offset:#x}")]
    InvalidFree {
        /// Offending payload offset
        offset: u32,
    },

    /// Offset range does not fit inside the segment
    #[error("Offset {offset:#x} (+{len}) out of bounds")]
    OutOfBounds {
        /// Start offset
        offset: u32,
        /// Length of the access
        len: usize,
    },

    /// Ring has no room for the record
    #[error("Ring full: record needs {needed} bytes, {free} free")]
    RingFull {
        /// Bytes the record occupies including framing
        needed: usize,
        /// Bytes currently free
        free: usize,
    },

    /// Memory alignment error
    #[error("Memory alignment error: address {address:#x} not aligned to {alignment}")]
    AlignmentError {
        /// Memory address
        address: usize,
        /// Required alignment
        alignment: usize,
    },

    /// Permission denied
    #[error("Permission denied accessing segment: {name}")]
    PermissionDenied {
        /// Segment name
        name: String,
    },

    /// IO error
    #[error("IO error: {source}")]
    Io {
        /// Source IO error
        #[from]
        source: std::io::Error,
    },

    /// Nix system call error
    #[error("System call error: {source}")]
    Nix {
        /// Source nix error
        #[from]
        source: nix::Error,
    },
}

/// Result type for shared memory operations
pub type ShmResult<T> = Result<T, ShmError>;
