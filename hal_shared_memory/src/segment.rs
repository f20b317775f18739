//! Named shared memory segments and the offset-addressing layer.
//!
//! A [`ShmSegment`] is one file-backed mapping. The same file mapped by two
//! processes (or twice by one process) generally lands at two different base
//! addresses; [`ShmSegment::to_ptr`] and [`ShmSegment::to_off`] translate
//! between the per-mapping address and the stable [`ShmOff`].

use crate::error::{ShmError, ShmResult};
use crate::offset::ShmOff;
use crate::platform::{LinuxMemoryConfig, attach_segment_mmap, create_segment_mmap};
use hal::consts::{CACHE_LINE_SIZE, PAGE_SIZE};
use memmap2::MmapMut;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, AtomicU64};
use tracing::{debug, warn};

/// One mapping of a named shared memory segment.
pub struct ShmSegment {
    /// Backing file path
    path: PathBuf,
    /// Process-local base address of the mapping
    base: NonNull<u8>,
    /// Mapped size in bytes
    size: usize,
    /// Remove the backing file when this mapping is dropped
    owner: bool,
    /// Keeps the mapping alive; all access goes through `base`
    _mmap: MmapMut,
}

// SAFETY: the mapping is plain shared memory. Concurrent access is
// coordinated by the structures placed inside it (HAL lock, atomics).
unsafe impl Send for ShmSegment {}
unsafe impl Sync for ShmSegment {}

impl ShmSegment {
    /// Create a new zero-filled segment and take ownership of its file.
    pub fn create(path: &Path, size: usize) -> ShmResult<Self> {
        validate_segment_size(size)?;

        let config = LinuxMemoryConfig::default();
        let mut mmap = create_segment_mmap(path, size, &config)?;
        let base = NonNull::new(mmap.as_mut_ptr()).ok_or(ShmError::InvalidSize { size })?;
        validate_memory_alignment(base.as_ptr() as usize)?;

        debug!("Created segment {} ({} bytes)", path.display(), size);
        Ok(Self {
            path: path.to_path_buf(),
            base,
            size,
            owner: true,
            _mmap: mmap,
        })
    }

    /// Map an existing segment.
    pub fn attach(path: &Path) -> ShmResult<Self> {
        let mut mmap = attach_segment_mmap(path)?;
        let size = mmap.len();
        validate_segment_size(size)?;
        let base = NonNull::new(mmap.as_mut_ptr()).ok_or(ShmError::InvalidSize { size })?;
        validate_memory_alignment(base.as_ptr() as usize)?;

        debug!("Attached segment {} ({} bytes)", path.display(), size);
        Ok(Self {
            path: path.to_path_buf(),
            base,
            size,
            owner: false,
            _mmap: mmap,
        })
    }

    /// Remove a segment file without mapping it.
    pub fn unlink(path: &Path) -> ShmResult<()> {
        std::fs::remove_file(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ShmError::NotFound {
                name: path.display().to_string(),
            },
            _ => ShmError::Io { source: e },
        })
    }

    /// Keep or drop ownership of the backing file.
    pub fn set_owner(&mut self, owner: bool) {
        self.owner = owner;
    }

    /// Backing file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Mapped size in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Process-local base address.
    pub fn base(&self) -> *mut u8 {
        self.base.as_ptr()
    }

    /// Convert an offset to a process-local address.
    ///
    /// Pure arithmetic; the result is only meaningful in this process and must
    /// never be stored in the segment.
    #[inline]
    pub fn to_ptr(&self, off: ShmOff) -> *mut u8 {
        debug_assert!(off.as_usize() < self.size);
        self.base.as_ptr().wrapping_add(off.as_usize())
    }

    /// Convert a process-local address inside this mapping to an offset.
    #[inline]
    pub fn to_off(&self, ptr: *const u8) -> ShmOff {
        debug_assert!(self.contains(ptr));
        ShmOff::new((ptr as usize - self.base.as_ptr() as usize) as u32)
    }

    /// Whether `ptr` lies in `[base, base + size)`.
    #[inline]
    pub fn contains(&self, ptr: *const u8) -> bool {
        let addr = ptr as usize;
        let base = self.base.as_ptr() as usize;
        addr >= base && addr < base + self.size
    }

    /// Check that `[off, off + len)` fits in the segment.
    #[inline]
    pub fn check(&self, off: ShmOff, len: usize) -> ShmResult<()> {
        match off.as_usize().checked_add(len) {
            Some(end) if end <= self.size => Ok(()),
            _ => Err(ShmError::OutOfBounds {
                offset: off.get(),
                len,
            }),
        }
    }

    /// Shared reference to a `T` placed at `off`.
    ///
    /// # Safety
    /// `off` must be in bounds, aligned for `T`, and hold an initialized `T`
    /// (all-zero must be a valid `T`). No `&mut` to the same bytes may be live.
    #[inline]
    pub unsafe fn get<T>(&self, off: ShmOff) -> &T {
        debug_assert!(self.check(off, std::mem::size_of::<T>()).is_ok());
        unsafe { &*(self.to_ptr(off) as *const T) }
    }

    /// Exclusive reference to a `T` placed at `off`.
    ///
    /// # Safety
    /// As for [`get`](Self::get), and the caller must guarantee exclusive
    /// access, which for HAL structures means holding the HAL lock.
    #[inline]
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn get_mut<T>(&self, off: ShmOff) -> &mut T {
        debug_assert!(self.check(off, std::mem::size_of::<T>()).is_ok());
        unsafe { &mut *(self.to_ptr(off) as *mut T) }
    }

    /// Atomic 64-bit cell at `off`, or `None` if out of bounds or misaligned.
    #[inline]
    pub fn atomic_u64(&self, off: ShmOff) -> Option<&AtomicU64> {
        if off.is_null() || off.get() % 8 != 0 || self.check(off, 8).is_err() {
            return None;
        }
        // SAFETY: in bounds and aligned; atomics tolerate concurrent access.
        Some(unsafe { &*(self.to_ptr(off) as *const AtomicU64) })
    }

    /// Atomic 32-bit cell at `off`, or `None` if out of bounds or misaligned.
    #[inline]
    pub fn atomic_u32(&self, off: ShmOff) -> Option<&AtomicU32> {
        if off.is_null() || off.get() % 4 != 0 || self.check(off, 4).is_err() {
            return None;
        }
        // SAFETY: in bounds and aligned; atomics tolerate concurrent access.
        Some(unsafe { &*(self.to_ptr(off) as *const AtomicU32) })
    }

    /// Byte view of `[off, off + len)`.
    ///
    /// # Safety
    /// No other process or thread may write the range while the slice lives.
    pub unsafe fn bytes(&self, off: ShmOff, len: usize) -> ShmResult<&[u8]> {
        self.check(off, len)?;
        Ok(unsafe { std::slice::from_raw_parts(self.to_ptr(off), len) })
    }

    /// Mutable byte view of `[off, off + len)`.
    ///
    /// # Safety
    /// The caller must have exclusive access to the range while the slice lives.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn bytes_mut(&self, off: ShmOff, len: usize) -> ShmResult<&mut [u8]> {
        self.check(off, len)?;
        Ok(unsafe { std::slice::from_raw_parts_mut(self.to_ptr(off), len) })
    }
}

impl Drop for ShmSegment {
    fn drop(&mut self) {
        if self.owner {
            match std::fs::remove_file(&self.path) {
                Ok(()) => debug!("Removed segment {}", self.path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to remove segment {}: {}", self.path.display(), e),
            }
        }
    }
}

impl std::fmt::Debug for ShmSegment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShmSegment")
            .field("path", &self.path)
            .field("base", &self.base)
            .field("size", &self.size)
            .field("owner", &self.owner)
            .finish()
    }
}

/// Validate segment size constraints
pub fn validate_segment_size(size: usize) -> ShmResult<()> {
    if size < PAGE_SIZE || size > u32::MAX as usize || size % PAGE_SIZE != 0 {
        return Err(ShmError::InvalidSize { size });
    }
    Ok(())
}

/// Validate memory alignment
pub fn validate_memory_alignment(address: usize) -> ShmResult<()> {
    if address % CACHE_LINE_SIZE != 0 {
        return Err(ShmError::AlignmentError {
            address,
            alignment: CACHE_LINE_SIZE,
        });
    }
    Ok(())
}
