//! First-fit heap carved out of a shared segment.
//!
//! The heap state lives inside the segment itself (embedded in the HAL master
//! region) so every process sees the same allocator. Blocks are kept on an
//! address-ordered free list; allocation carves from the tail of the first
//! block large enough, and `free` coalesces with both neighbours.
//!
//! ```text
//!  start                                                        end
//!  ┌────────┬──────────────┬────────┬───────────┬────────┬──────┐
//!  │hdr│free│hdr│ payload  │hdr│free│hdr│payload│hdr│ ...       │
//!  └────────┴──────────────┴────────┴───────────┴────────┴──────┘
//! ```
//!
//! All calls require exclusive access to the heap state, i.e. the HAL lock.

use crate::error::{ShmError, ShmResult};
use crate::offset::{ShmOff, align_up};
use crate::segment::ShmSegment;
use static_assertions::const_assert_eq;

/// Allocation granularity and payload alignment.
pub const HEAP_ALIGN: usize = 16;

const HEADER_SIZE: usize = std::mem::size_of::<BlockHeader>();
const MIN_SPLIT: usize = HEADER_SIZE + HEAP_ALIGN;
const USED_MAGIC: u32 = 0x4855_5345; // "HUSE"
const FREE_MAGIC: u32 = 0x4846_5245; // "HFRE"

#[repr(C)]
struct BlockHeader {
    /// Block size including this header
    size: u32,
    /// Next free block (free blocks only)
    next: ShmOff,
    magic: u32,
    _pad: u32,
}

const_assert_eq!(std::mem::size_of::<BlockHeader>(), HEAP_ALIGN);

/// Allocator state, stored in shared memory.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct HeapState {
    /// First free block (address ordered)
    free_head: ShmOff,
    /// First byte managed by the heap
    start: ShmOff,
    /// One past the last managed byte
    end: u32,
    /// Free bytes (headers included)
    avail: u32,
    /// Allocated bytes (headers included)
    used: u32,
    /// Live allocation count
    allocations: u32,
}

#[inline]
fn block(seg: &ShmSegment, off: ShmOff) -> *mut BlockHeader {
    seg.to_ptr(off) as *mut BlockHeader
}

impl HeapState {
    /// Lay out an empty heap over `[start, end)` of `seg`.
    pub fn init(seg: &ShmSegment, start: usize, end: usize) -> ShmResult<Self> {
        let start = align_up(start, HEAP_ALIGN);
        let end = end & !(HEAP_ALIGN - 1);
        if end <= start + MIN_SPLIT || end > seg.size() {
            return Err(ShmError::InvalidSize {
                size: end.saturating_sub(start),
            });
        }
        let start_off = ShmOff::new(start as u32);
        let size = (end - start) as u32;

        // SAFETY: range checked above; heap is being formatted, nobody else
        // references it yet.
        unsafe {
            let b = block(seg, start_off);
            (*b).size = size;
            (*b).next = ShmOff::NULL;
            (*b).magic = FREE_MAGIC;
        }

        Ok(Self {
            free_head: start_off,
            start: start_off,
            end: end as u32,
            avail: size,
            used: 0,
            allocations: 0,
        })
    }

    /// Allocate `size` zeroed bytes, 16-byte aligned.
    pub fn alloc(&mut self, seg: &ShmSegment, size: usize) -> ShmResult<ShmOff> {
        let mut need = align_up(size.max(1), HEAP_ALIGN) + HEADER_SIZE;
        if need > u32::MAX as usize {
            return Err(self.out_of_memory(size));
        }

        let mut prev = ShmOff::NULL;
        let mut cur = self.free_head;

        // SAFETY: free list offsets were written by this allocator under the
        // HAL lock and point at block headers inside [start, end).
        unsafe {
            while !cur.is_null() {
                let b = block(seg, cur);
                let bsize = (*b).size as usize;
                if bsize >= need {
                    let found = if bsize - need >= MIN_SPLIT {
                        // Carve from the tail; the free block stays linked
                        (*b).size = (bsize - need) as u32;
                        cur.add(bsize - need)
                    } else {
                        need = bsize;
                        if prev.is_null() {
                            self.free_head = (*b).next;
                        } else {
                            (*block(seg, prev)).next = (*b).next;
                        }
                        cur
                    };

                    let hdr = block(seg, found);
                    (*hdr).size = need as u32;
                    (*hdr).next = ShmOff::NULL;
                    (*hdr).magic = USED_MAGIC;
                    let payload = found.add(HEADER_SIZE);
                    std::ptr::write_bytes(seg.to_ptr(payload), 0, need - HEADER_SIZE);

                    self.avail -= need as u32;
                    self.used += need as u32;
                    self.allocations += 1;
                    return Ok(payload);
                }
                prev = cur;
                cur = (*b).next;
            }
        }

        Err(self.out_of_memory(size))
    }

    /// Return an allocation to the heap.
    pub fn free(&mut self, seg: &ShmSegment, payload: ShmOff) -> ShmResult<()> {
        let invalid = ShmError::InvalidFree {
            offset: payload.get(),
        };
        if payload.as_usize() < self.start.as_usize() + HEADER_SIZE
            || payload.get() >= self.end
            || payload.as_usize() % HEAP_ALIGN != 0
        {
            return Err(invalid);
        }
        let off = payload.sub(HEADER_SIZE);

        // SAFETY: `off` is inside the heap range and aligned; its magic is
        // checked before anything else is trusted.
        unsafe {
            let b = block(seg, off);
            if (*b).magic != USED_MAGIC {
                return Err(invalid);
            }
            let size = (*b).size;
            (*b).magic = FREE_MAGIC;

            let mut prev = ShmOff::NULL;
            let mut cur = self.free_head;
            while !cur.is_null() && cur < off {
                prev = cur;
                cur = (*block(seg, cur)).next;
            }

            (*b).next = cur;
            if prev.is_null() {
                self.free_head = off;
            } else {
                (*block(seg, prev)).next = off;
            }

            if !cur.is_null() && off.get() + (*b).size == cur.get() {
                let n = block(seg, cur);
                (*b).size += (*n).size;
                (*b).next = (*n).next;
                (*n).magic = 0;
            }
            if !prev.is_null() {
                let p = block(seg, prev);
                if prev.get() + (*p).size == off.get() {
                    (*p).size += (*b).size;
                    (*p).next = (*b).next;
                    (*b).magic = 0;
                }
            }

            self.avail += size;
            self.used -= size;
            self.allocations -= 1;
        }
        Ok(())
    }

    /// Free bytes, headers included.
    pub fn avail(&self) -> usize {
        self.avail as usize
    }

    /// Allocated bytes, headers included.
    pub fn used(&self) -> usize {
        self.used as usize
    }

    /// Number of live allocations.
    pub fn allocations(&self) -> usize {
        self.allocations as usize
    }

    /// Size of the largest free block's payload.
    pub fn largest_free(&self, seg: &ShmSegment) -> usize {
        let mut best = 0usize;
        let mut cur = self.free_head;
        // SAFETY: see `alloc`.
        unsafe {
            while !cur.is_null() {
                let b = block(seg, cur);
                best = best.max((*b).size as usize);
                cur = (*b).next;
            }
        }
        best.saturating_sub(HEADER_SIZE)
    }

    fn out_of_memory(&self, requested: usize) -> ShmError {
        ShmError::OutOfMemory {
            requested,
            available: self.avail as usize,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn segment(dir: &tempfile::TempDir, size: usize) -> ShmSegment {
        ShmSegment::create(&dir.path().join("hal_heap"), size).unwrap()
    }

    #[test]
    fn alloc_is_aligned_and_zeroed() {
        let dir = tempfile::tempdir().unwrap();
        let seg = segment(&dir, 8192);
        let mut heap = HeapState::init(&seg, 64, 8192).unwrap();

        let a = heap.alloc(&seg, 10).unwrap();
        assert_eq!(a.as_usize() % HEAP_ALIGN, 0);
        let bytes = unsafe { seg.bytes_mut(a, 10).unwrap() };
        assert!(bytes.iter().all(|b| *b == 0));
        bytes.fill(0xAA);

        heap.free(&seg, a).unwrap();
        let b = heap.alloc(&seg, 10).unwrap();
        let bytes = unsafe { seg.bytes(b, 10).unwrap() };
        assert!(bytes.iter().all(|b| *b == 0));
    }

    #[test]
    fn free_coalesces_back_to_one_block() {
        let dir = tempfile::tempdir().unwrap();
        let seg = segment(&dir, 8192);
        let mut heap = HeapState::init(&seg, 64, 8192).unwrap();
        let initial = heap.avail();

        let blocks: Vec<_> = (0..8).map(|i| heap.alloc(&seg, 16 * (i + 1)).unwrap()).collect();
        assert_eq!(heap.allocations(), 8);
        for off in blocks.iter().step_by(2) {
            heap.free(&seg, *off).unwrap();
        }
        for off in blocks.iter().skip(1).step_by(2) {
            heap.free(&seg, *off).unwrap();
        }

        assert_eq!(heap.avail(), initial);
        assert_eq!(heap.used(), 0);
        assert_eq!(heap.largest_free(&seg), initial - HEADER_SIZE);
    }

    #[test]
    fn exhaustion_reports_out_of_memory() {
        let dir = tempfile::tempdir().unwrap();
        let seg = segment(&dir, 4096);
        let mut heap = HeapState::init(&seg, 64, 4096).unwrap();

        let result = heap.alloc(&seg, 8192);
        assert!(matches!(result, Err(ShmError::OutOfMemory { requested: 8192, .. })));

        while heap.alloc(&seg, 64).is_ok() {}
        assert!(heap.alloc(&seg, 64).is_err());
    }

    #[test]
    fn double_free_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let seg = segment(&dir, 4096);
        let mut heap = HeapState::init(&seg, 64, 4096).unwrap();

        let a = heap.alloc(&seg, 32).unwrap();
        heap.free(&seg, a).unwrap();
        assert!(matches!(heap.free(&seg, a), Err(ShmError::InvalidFree { .. })));
        assert!(heap.free(&seg, ShmOff::new(8)).is_err());
    }

    proptest! {
        #[test]
        fn accounting_survives_any_alloc_free_order(
            sizes in proptest::collection::vec(1usize..512, 1..40),
            seed in any::<u64>(),
        ) {
            let dir = tempfile::tempdir().unwrap();
            let seg = segment(&dir, 64 * 1024);
            let mut heap = HeapState::init(&seg, 64, 64 * 1024).unwrap();
            let total = heap.avail();

            let mut live: Vec<ShmOff> = sizes.iter().map(|s| heap.alloc(&seg, *s).unwrap()).collect();
            prop_assert_eq!(heap.avail() + heap.used(), total);

            // Deterministic shuffle from the seed
            let mut state = seed | 1;
            while !live.is_empty() {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                let idx = (state % live.len() as u64) as usize;
                let off = live.swap_remove(idx);
                heap.free(&seg, off).unwrap();
                prop_assert_eq!(heap.avail() + heap.used(), total);
            }
            prop_assert_eq!(heap.avail(), total);
            prop_assert_eq!(heap.allocations(), 0);
        }
    }
}
