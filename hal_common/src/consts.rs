//! HAL core constants.
//!
//! These values are part of the shared memory layout. Every process that
//! attaches to a HAL arena must be compiled against the same values, which is
//! why any change here must be accompanied by a bump of [`HAL_VER`].

use static_assertions::const_assert;

/// Version code of the shared memory layout.
///
/// Stored in the master region at creation and compared on every attach.
/// Increment whenever any structure placed in the arena changes.
pub const HAL_VER: u32 = 0x0000_000C;

/// Magic bytes at the start of a HAL arena: `"HALCORE\0"`.
pub const HAL_MAGIC: [u8; 8] = *b"HALCORE\0";

/// Maximum length of an object name, excluding the terminating NUL.
pub const HAL_NAME_LEN: usize = 47;

/// Number of canned epsilon values for floating point change detection.
pub const MAX_EPSILON: usize = 5;

/// Default epsilon, stored in slot 0 of the epsilon table.
pub const DEFAULT_EPSILON: f64 = 0.00001;

/// Maximum number of auxiliary ring segments.
pub const HAL_MAX_RINGS: usize = 255;

/// Maximum number of function entries a single thread runs per period.
pub const MAX_FUNCTS_PER_THREAD: usize = 128;

/// CPU cache line size in bytes.
pub const CACHE_LINE_SIZE: usize = 64;

/// Smallest HAL arena accepted (64 KiB).
pub const ARENA_MIN_SIZE: usize = 64 * 1024;

/// Largest HAL arena accepted (1 GiB). Offsets are 32 bit.
pub const ARENA_MAX_SIZE: usize = 1_073_741_824;

/// Default HAL arena size (1 MiB).
pub const ARENA_DEFAULT_SIZE: usize = 1024 * 1024;

/// Page size assumed for arena sizing.
pub const PAGE_SIZE: usize = 4096;

/// Default directory holding the arena and ring segment files.
pub const DEFAULT_SHM_DIR: &str = "/dev/shm";

/// Default arena name.
pub const DEFAULT_ARENA_NAME: &str = "hal";

const_assert!(HAL_MAX_RINGS <= 256);
const_assert!(ARENA_MAX_SIZE <= u32::MAX as usize);
const_assert!(ARENA_MIN_SIZE % PAGE_SIZE == 0);
const_assert!(ARENA_DEFAULT_SIZE % PAGE_SIZE == 0);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_fits_in_cache_line_with_terminator() {
        assert!(HAL_NAME_LEN + 1 <= CACHE_LINE_SIZE);
    }

    #[test]
    fn arena_bounds_are_consistent() {
        assert!(ARENA_MIN_SIZE < ARENA_DEFAULT_SIZE);
        assert!(ARENA_DEFAULT_SIZE < ARENA_MAX_SIZE);
    }

    #[test]
    fn magic_is_nul_terminated() {
        assert_eq!(HAL_MAGIC[7], 0);
    }
}
