//! Fixed-size id bitmap stored in shared memory.

use hal::consts::HAL_MAX_RINGS;

const WORDS: usize = (HAL_MAX_RINGS + 1).div_ceil(64);

/// Allocation bitmap for ids `1..=HAL_MAX_RINGS`. Bit 0 is never handed out
/// so an id of 0 can mean "none".
///
/// Plain words, not atomics: the bitmap sits in the master region and is
/// only touched under the HAL lock.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IdBitmap {
    words: [u64; WORDS],
}

impl IdBitmap {
    /// Claim the lowest free id.
    pub fn alloc(&mut self) -> Option<u32> {
        for (word_idx, word) in self.words.iter_mut().enumerate() {
            // Mask out bit 0 so id 0 looks taken
            let taken = if word_idx == 0 { *word | 1 } else { *word };
            if taken == u64::MAX {
                continue;
            }
            let bit = (!taken).trailing_zeros() as usize;
            let id = word_idx * 64 + bit;
            if id > HAL_MAX_RINGS {
                return None;
            }
            *word |= 1u64 << bit;
            return Some(id as u32);
        }
        None
    }

    /// Release `id`. Out-of-range ids are ignored.
    pub fn free(&mut self, id: u32) {
        let id = id as usize;
        if id == 0 || id > HAL_MAX_RINGS {
            return;
        }
        self.words[id / 64] &= !(1u64 << (id % 64));
    }

    /// Whether `id` is allocated.
    pub fn is_set(&self, id: u32) -> bool {
        let id = id as usize;
        id != 0 && id <= HAL_MAX_RINGS && self.words[id / 64] & (1u64 << (id % 64)) != 0
    }

    /// Number of allocated ids.
    pub fn count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }
}
