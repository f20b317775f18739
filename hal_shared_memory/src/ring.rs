//! Single-producer single-consumer record ring in its own segment.
//!
//! Layout: a cache-line aligned [`RingHeader`] at offset 0 followed by the
//! data area. Every record is an 8-byte frame holding the payload length,
//! then the payload padded to 8 bytes. A record never wraps; when it does not
//! fit before the end of the data area the producer writes a wrap marker and
//! starts again at the beginning.
//!
//! `head` is owned by the producer and `tail` by the consumer. Both count
//! bytes monotonically; positions are taken modulo the capacity.

use crate::error::{ShmError, ShmResult};
use crate::offset::{ShmOff, align_up};
use crate::segment::ShmSegment;
use hal::consts::{CACHE_LINE_SIZE, PAGE_SIZE};
use static_assertions::const_assert_eq;
use std::path::Path;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use tracing::debug;

/// Magic at the start of every ring segment: `"HRNG"`.
pub const RING_MAGIC: u32 = 0x4852_4E47;

const FRAME_SIZE: usize = 8;
const WRAP_MARKER: u32 = u32::MAX;

/// Header at offset 0 of a ring segment.
#[repr(C, align(64))]
pub struct RingHeader {
    magic: u32,
    /// Data area capacity in bytes
    size: u32,
    /// Opaque flags chosen at creation
    flags: u32,
    /// Live attachments
    refcount: AtomicU32,
    /// Producer position
    head: AtomicU64,
    /// Consumer position
    tail: AtomicU64,
    /// Writes rejected for lack of space
    overruns: AtomicU64,
    /// Reads attempted on an empty ring
    underruns: AtomicU64,
}

const_assert_eq!(std::mem::size_of::<RingHeader>(), CACHE_LINE_SIZE);

const DATA_OFFSET: usize = std::mem::size_of::<RingHeader>();

/// Segment size needed for a ring with `size` bytes of data.
pub fn ring_segment_size(size: usize) -> usize {
    align_up(DATA_OFFSET + align_up(size, FRAME_SIZE), PAGE_SIZE)
}

/// Format a freshly created segment as an empty ring.
///
/// The whole space after the header becomes data area, so the capacity may
/// exceed the requested size.
pub fn ring_format(seg: &ShmSegment, flags: u32) -> ShmResult<usize> {
    let capacity = (seg.size() - DATA_OFFSET) & !(FRAME_SIZE - 1);
    if capacity < 2 * FRAME_SIZE || capacity > u32::MAX as usize {
        return Err(ShmError::InvalidSize { size: seg.size() });
    }
    // SAFETY: the segment is new and at least a page long; nobody else has
    // mapped it yet.
    let hdr = unsafe { seg.get_mut::<RingHeader>(ShmOff::NULL) };
    hdr.size = capacity as u32;
    hdr.flags = flags;
    hdr.refcount.store(0, Ordering::Relaxed);
    hdr.head.store(0, Ordering::Relaxed);
    hdr.tail.store(0, Ordering::Relaxed);
    hdr.overruns.store(0, Ordering::Relaxed);
    hdr.underruns.store(0, Ordering::Relaxed);
    std::sync::atomic::fence(Ordering::Release);
    hdr.magic = RING_MAGIC;
    Ok(capacity)
}

fn header(seg: &ShmSegment) -> ShmResult<&RingHeader> {
    seg.check(ShmOff::NULL, DATA_OFFSET)?;
    // SAFETY: header fits; fields other than the atomics are written once
    // at format time.
    let hdr = unsafe { seg.get::<RingHeader>(ShmOff::NULL) };
    if hdr.magic != RING_MAGIC || hdr.size as usize + DATA_OFFSET > seg.size() {
        return Err(ShmError::BadMagic {
            name: seg.path().display().to_string(),
        });
    }
    Ok(hdr)
}

/// Current attachment count of a mapped ring segment.
pub fn ring_refcount(seg: &ShmSegment) -> ShmResult<u32> {
    Ok(header(seg)?.refcount.load(Ordering::Acquire))
}

/// An attached ring. Dropping it releases the attachment.
pub struct RingBuffer {
    seg: ShmSegment,
    capacity: usize,
}

impl RingBuffer {
    /// Map the ring segment at `path` and take an attachment.
    pub fn attach(path: &Path) -> ShmResult<Self> {
        let seg = ShmSegment::attach(path)?;
        Self::from_segment(seg)
    }

    /// Take an attachment on an already mapped ring segment.
    pub fn from_segment(seg: ShmSegment) -> ShmResult<Self> {
        let hdr = header(&seg)?;
        let capacity = hdr.size as usize;
        let refs = hdr.refcount.fetch_add(1, Ordering::AcqRel) + 1;
        debug!("Attached ring {} (refcount {})", seg.path().display(), refs);
        Ok(Self { seg, capacity })
    }

    fn hdr(&self) -> &RingHeader {
        // SAFETY: validated in `from_segment`; the mapping lives as long as self.
        unsafe { self.seg.get::<RingHeader>(ShmOff::NULL) }
    }

    #[inline]
    fn data(&self, pos: usize) -> *mut u8 {
        self.seg.to_ptr(ShmOff::new((DATA_OFFSET + pos) as u32))
    }

    /// Data area capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Flags given at creation.
    pub fn flags(&self) -> u32 {
        self.hdr().flags
    }

    /// Bytes currently free.
    pub fn free_space(&self) -> usize {
        let hdr = self.hdr();
        let head = hdr.head.load(Ordering::Relaxed);
        let tail = hdr.tail.load(Ordering::Acquire);
        self.capacity - (head - tail) as usize
    }

    /// Whether no record is waiting.
    pub fn is_empty(&self) -> bool {
        let hdr = self.hdr();
        hdr.head.load(Ordering::Acquire) == hdr.tail.load(Ordering::Relaxed)
    }

    /// Writes rejected so far.
    pub fn overruns(&self) -> u64 {
        self.hdr().overruns.load(Ordering::Relaxed)
    }

    /// Reads on an empty ring so far.
    pub fn underruns(&self) -> u64 {
        self.hdr().underruns.load(Ordering::Relaxed)
    }

    /// Current attachment count.
    pub fn refcount(&self) -> u32 {
        self.hdr().refcount.load(Ordering::Acquire)
    }

    /// Append one record. Producer side only.
    pub fn write(&self, data: &[u8]) -> ShmResult<()> {
        let hdr = self.hdr();
        let needed = FRAME_SIZE + align_up(data.len(), FRAME_SIZE);
        if needed > self.capacity || data.len() >= WRAP_MARKER as usize {
            return Err(ShmError::InvalidSize { size: data.len() });
        }

        let head = hdr.head.load(Ordering::Relaxed);
        let tail = hdr.tail.load(Ordering::Acquire);
        let free = self.capacity - (head - tail) as usize;
        let pos = (head % self.capacity as u64) as usize;
        let to_end = self.capacity - pos;
        let skip = if needed > to_end { to_end } else { 0 };

        if skip + needed > free {
            hdr.overruns.fetch_add(1, Ordering::Relaxed);
            return Err(ShmError::RingFull { needed, free });
        }

        // SAFETY: [pos, pos + needed) (or the wrap marker and [0, needed)) is
        // free space owned by the producer until `head` is published.
        unsafe {
            let mut at = pos;
            if skip > 0 {
                (self.data(pos) as *mut u32).write(WRAP_MARKER);
                at = 0;
            }
            (self.data(at) as *mut u32).write(data.len() as u32);
            std::ptr::copy_nonoverlapping(data.as_ptr(), self.data(at + FRAME_SIZE), data.len());
        }
        hdr.head
            .store(head + (skip + needed) as u64, Ordering::Release);
        Ok(())
    }

    /// Peek at the oldest record without consuming it. Consumer side only.
    pub fn read(&self) -> Option<&[u8]> {
        let (pos, len) = self.front()?;
        // SAFETY: the record was published by the producer's release store
        // and stays put until `shift` moves `tail` past it.
        Some(unsafe { std::slice::from_raw_parts(self.data(pos + FRAME_SIZE), len) })
    }

    /// Consume the oldest record. Returns `false` if the ring was empty.
    pub fn shift(&self) -> bool {
        let Some((pos, len)) = self.front() else {
            return false;
        };
        let hdr = self.hdr();
        let tail = hdr.tail.load(Ordering::Relaxed);
        let cur = (tail % self.capacity as u64) as usize;
        debug_assert_eq!(cur, pos);
        hdr.tail.store(
            tail + (FRAME_SIZE + align_up(len, FRAME_SIZE)) as u64,
            Ordering::Release,
        );
        true
    }

    /// Position and length of the front record, skipping a wrap marker.
    fn front(&self) -> Option<(usize, usize)> {
        let hdr = self.hdr();
        let head = hdr.head.load(Ordering::Acquire);
        let mut tail = hdr.tail.load(Ordering::Relaxed);
        if head == tail {
            hdr.underruns.fetch_add(1, Ordering::Relaxed);
            return None;
        }
        let mut pos = (tail % self.capacity as u64) as usize;
        // SAFETY: [tail, head) holds published frames.
        let mut len = unsafe { (self.data(pos) as *const u32).read() };
        if len == WRAP_MARKER {
            tail += (self.capacity - pos) as u64;
            hdr.tail.store(tail, Ordering::Release);
            pos = 0;
            len = unsafe { (self.data(0) as *const u32).read() };
        }
        Some((pos, len as usize))
    }
}

impl Drop for RingBuffer {
    fn drop(&mut self) {
        let refs = self.hdr().refcount.fetch_sub(1, Ordering::AcqRel) - 1;
        debug!("Detached ring {} (refcount {})", self.seg.path().display(), refs);
    }
}

impl std::fmt::Debug for RingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingBuffer")
            .field("path", &self.seg.path())
            .field("capacity", &self.capacity)
            .finish()
    }
}
