//! Registry side of the auxiliary ring segments.
//!
//! Each ring is its own segment file, `<shm_dir>/hal_<arena>_ring_<id>`,
//! with its id taken from the bitmap in the master region. The arena keeps a
//! named `RingRecord` so rings are found by name like any other object.

use hal::consts::HAL_MAX_RINGS;
use hal_shared_memory::{RingBuffer, ShmSegment, ring_format, ring_refcount, ring_segment_size};
use serde::Serialize;
use std::path::PathBuf;
use tracing::{info, warn};

use crate::error::{HalError, HalResult};
use crate::guard::HalGuard;
use crate::master::LockLevel;
use crate::object::{RingHandle, RingRecord};

/// Snapshot of a ring.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RingInfo {
    /// Ring name
    pub name: String,
    /// Unique object id
    pub id: i32,
    /// Bitmap slot, part of the segment file name
    pub ring_id: u32,
    /// Data capacity in bytes
    pub size: usize,
    /// Creation flags
    pub flags: u32,
    /// Current attachments
    pub refcount: u32,
}

impl HalGuard<'_> {
    fn ring_file(&self, ring_id: u32) -> PathBuf {
        let arena = &self.hal.config.arena;
        arena
            .shm_dir
            .join(format!("hal_{}_ring_{}", arena.name, ring_id))
    }

    /// Create a ring segment with at least `size` bytes of data space.
    pub fn ring_new(&mut self, name: &str, size: usize, flags: u32) -> HalResult<RingHandle> {
        self.master().check_unlocked(LockLevel::LOAD, "load")?;
        if size == 0 || size > u32::MAX as usize / 2 {
            return Err(HalError::InvalidArgument(format!("ring size {size}")));
        }
        self.check_name(name)?;
        let ring_id = self.master().rings.alloc().ok_or(HalError::Exhausted {
            resource: "rings",
            limit: HAL_MAX_RINGS,
        })?;

        let path = self.ring_file(ring_id);
        let capacity = match ShmSegment::create(&path, ring_segment_size(size)) {
            Ok(mut seg) => {
                // The file outlives this mapping; ring_delete removes it
                seg.set_owner(false);
                match ring_format(&seg, flags) {
                    Ok(capacity) => capacity,
                    Err(e) => {
                        self.abandon_ring(ring_id);
                        return Err(e.into());
                    }
                }
            }
            Err(e) => {
                self.master().rings.free(ring_id);
                return Err(e.into());
            }
        };

        match self.create_object::<RingRecord>(name, 0) {
            Ok((h, rec)) => {
                rec.ring_id = ring_id;
                rec.size = capacity as u32;
                rec.flags = flags;
                info!("Created ring {} ({} bytes, {})", name, capacity, path.display());
                Ok(h)
            }
            Err(e) => {
                self.abandon_ring(ring_id);
                Err(e)
            }
        }
    }

    fn abandon_ring(&mut self, ring_id: u32) {
        let path = self.ring_file(ring_id);
        if let Err(e) = ShmSegment::unlink(&path) {
            warn!("Failed to remove ring segment {}: {}", path.display(), e);
        }
        self.master().rings.free(ring_id);
    }

    /// Segment file of a ring.
    pub fn ring_path(&self, ring: RingHandle) -> HalResult<PathBuf> {
        Ok(self.ring_file(self.resolve(ring)?.ring_id))
    }

    /// Attach to a ring by name. The attachment ends when the buffer drops.
    pub fn ring_attach(&self, name: &str) -> HalResult<RingBuffer> {
        let ring = self
            .find::<RingRecord>(name)
            .ok_or_else(|| HalError::NotFound(name.to_string()))?;
        Ok(RingBuffer::attach(&self.ring_path(ring)?)?)
    }

    /// Delete a ring and its segment file. Refused with `Busy` while attached.
    pub fn ring_delete(&mut self, ring: RingHandle) -> HalResult<()> {
        let rec = self.resolve(ring)?;
        let name = rec.hdr.name().to_string();
        let ring_id = rec.ring_id;
        let path = self.ring_file(ring_id);
        match ShmSegment::attach(&path) {
            Ok(seg) => {
                let refs = ring_refcount(&seg)?;
                if refs > 0 {
                    return Err(HalError::Busy { name, refs });
                }
            }
            Err(e) => warn!("Ring segment {} unreadable: {}", path.display(), e),
        }
        self.destroy_object(ring)?;
        self.abandon_ring(ring_id);
        info!("Deleted ring {}", name);
        Ok(())
    }

    /// Snapshot of a ring.
    pub fn ring_info(&self, ring: RingHandle) -> HalResult<RingInfo> {
        let rec = self.resolve(ring)?;
        let refcount = ShmSegment::attach(&self.ring_file(rec.ring_id))
            .and_then(|seg| ring_refcount(&seg))
            .unwrap_or(0);
        Ok(RingInfo {
            name: rec.hdr.name().to_string(),
            id: rec.hdr.id,
            ring_id: rec.ring_id,
            size: rec.size as usize,
            flags: rec.flags,
            refcount,
        })
    }
}
