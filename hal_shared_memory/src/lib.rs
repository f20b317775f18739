//! # HAL Shared Memory
//!
//! Memory plumbing underneath the HAL core: named file-backed segments, the
//! offset addressing used for every cross-process reference, the first-fit
//! heap that lives inside the arena, intrusive offset lists, and the
//! single-producer single-consumer ring segments.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────── process A ────────────┐   ┌──────────── process B ────────────┐
//! │ ShmSegment  base = 0x7f00_0000    │   │ ShmSegment  base = 0x7e40_0000    │
//! │   to_ptr(off) = base + off        │   │   to_ptr(off) = base + off        │
//! └────────────────┬──────────────────┘   └────────────────┬──────────────────┘
//!                  │             same file               │
//!                  ▼                                       ▼
//!        ┌─────────────────────────────────────────────────────────┐
//!        │ master region │ HeapState-managed blocks ...            │
//!        │ (offset 0)    │ records, pin cells, signal data         │
//!        └─────────────────────────────────────────────────────────┘
//! ```
//!
//! Nothing stored in a segment is a process address. Structures hold
//! [`ShmOff`] values and each process converts them with its own mapping.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use hal_shared_memory::{HeapState, ShmSegment};
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let seg = ShmSegment::create(Path::new("/dev/shm/hal_demo"), 64 * 1024)?;
//! let mut heap = HeapState::init(&seg, 4096, seg.size())?;
//! let off = heap.alloc(&seg, 128)?;
//! heap.free(&seg, off)?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Thread Safety
//!
//! - **ShmSegment**: `Send + Sync`; synchronization is up to what lives inside
//! - **HeapState** and the list functions: caller must hold the HAL lock
//! - **RingBuffer**: one producer and one consumer at a time

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod bitmap;
pub mod error;
pub mod heap;
pub mod list;
pub mod offset;
pub mod platform;
pub mod ring;
pub mod segment;

pub use bitmap::IdBitmap;
pub use error::{ShmError, ShmResult};
pub use heap::{HEAP_ALIGN, HeapState};
pub use list::{
    ListIter, ListLinks, list_add_after, list_add_before, list_empty, list_init, list_next,
    list_prev, list_remove,
};
pub use offset::{ShmOff, align_up};
pub use ring::{RING_MAGIC, RingBuffer, RingHeader, ring_format, ring_refcount, ring_segment_size};
pub use segment::ShmSegment;
