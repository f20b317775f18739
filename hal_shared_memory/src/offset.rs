//! Arena-relative offsets.
//!
//! Every reference stored inside a shared segment is a [`ShmOff`]: a byte
//! position relative to the segment base. Each process maps the segment at its
//! own address, so only offsets are meaningful across processes. Offset 0 is the
//! segment header and doubles as the null offset.

use std::fmt;

/// Byte offset from the base of a shared segment.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ShmOff(u32);

impl ShmOff {
    /// The null offset; never the location of an allocation.
    pub const NULL: ShmOff = ShmOff(0);

    /// Wrap a raw offset.
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Convert from `usize`. Returns `None` if it does not fit in 32 bits.
    pub fn from_usize(raw: usize) -> Option<Self> {
        u32::try_from(raw).ok().map(Self)
    }

    /// Raw value.
    pub const fn get(self) -> u32 {
        self.0
    }

    /// Raw value as `usize`.
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }

    /// Whether this is the null offset.
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Offset `bytes` further into the segment.
    pub const fn add(self, bytes: usize) -> Self {
        Self(self.0 + bytes as u32)
    }

    /// Offset `bytes` closer to the segment base.
    pub const fn sub(self, bytes: usize) -> Self {
        Self(self.0 - bytes as u32)
    }
}

impl fmt::Display for ShmOff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Round `value` up to a multiple of `align` (power of two).
pub const fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_offset() {
        assert!(ShmOff::NULL.is_null());
        assert!(!ShmOff::new(64).is_null());
        assert_eq!(ShmOff::default(), ShmOff::NULL);
    }

    #[test]
    fn arithmetic() {
        let off = ShmOff::new(128);
        assert_eq!(off.add(16).get(), 144);
        assert_eq!(off.sub(64).as_usize(), 64);
        assert!(ShmOff::from_usize(usize::MAX).is_none());
    }

    #[test]
    fn alignment() {
        assert_eq!(align_up(0, 16), 0);
        assert_eq!(align_up(1, 16), 16);
        assert_eq!(align_up(16, 16), 16);
        assert_eq!(align_up(17, 8), 24);
    }
}
