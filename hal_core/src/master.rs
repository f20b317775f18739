//! The master region at offset 0 of the HAL arena.

use bitflags::bitflags;
use hal::config::SchedulerConfig;
use hal::consts::{CACHE_LINE_SIZE, DEFAULT_EPSILON, HAL_MAGIC, HAL_VER, MAX_EPSILON};
use hal::types::ObjectKind;
use hal_shared_memory::{
    HeapState, IdBitmap, ListLinks, ShmError, ShmOff, ShmSegment, align_up, list_init,
};
use static_assertions::const_assert;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::error::{HalError, HalResult};

bitflags! {
    /// Operations the HAL refuses while the corresponding bit is set.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct LockLevel: u8 {
        /// Component, pin, parameter and function registration
        const LOAD = 0x01;
        /// Linking, signal creation and thread function lists
        const CONFIG = 0x02;
        /// Parameter writes from outside the owner
        const PARAMS = 0x04;
        /// Starting and stopping threads
        const RUN = 0x08;
        /// Everything
        const ALL = Self::LOAD.bits() | Self::CONFIG.bits() | Self::PARAMS.bits() | Self::RUN.bits();
    }
}

/// Machine-wide state, one per arena.
#[repr(C, align(64))]
pub(crate) struct MasterRegion {
    pub(crate) magic: [u8; 8],
    pub(crate) version: u32,
    /// 0 when free, otherwise the pid of the holder
    pub(crate) lock: AtomicU32,
    pub(crate) next_id: i32,
    pub(crate) lock_level: u8,
    pub(crate) exact_base_period: u8,
    pub(crate) threads_running: AtomicU32,
    pub(crate) creator_pid: u32,
    pub(crate) base_period: i64,
    /// Sentinel of the list of all named objects
    pub(crate) objects: ListLinks,
    /// Per-kind free lists of deleted records, indexed by kind discriminant
    pub(crate) free_objects: [ShmOff; ObjectKind::COUNT],
    pub(crate) free_entries: ShmOff,
    pub(crate) epsilon: [f64; MAX_EPSILON],
    pub(crate) rings: IdBitmap,
    pub(crate) heap: HeapState,
}

const_assert!(std::mem::size_of::<MasterRegion>() % CACHE_LINE_SIZE == 0);

/// Offset of the object list sentinel.
pub(crate) const OBJECTS_OFF: ShmOff =
    ShmOff::new(std::mem::offset_of!(MasterRegion, objects) as u32);

/// First byte handed to the heap.
pub(crate) const HEAP_START: usize = align_up(std::mem::size_of::<MasterRegion>(), CACHE_LINE_SIZE);

impl MasterRegion {
    /// Format a fresh (zero-filled) arena.
    ///
    /// # Safety
    /// The segment must be newly created and not yet visible to anyone else.
    pub(crate) unsafe fn format(
        seg: &ShmSegment,
        sched: &SchedulerConfig,
        creator_pid: u32,
    ) -> HalResult<()> {
        let heap = HeapState::init(seg, HEAP_START, seg.size())?;
        let m = unsafe { seg.get_mut::<MasterRegion>(ShmOff::NULL) };

        m.lock.store(0, Ordering::Relaxed);
        m.threads_running.store(0, Ordering::Relaxed);
        m.next_id = 1;
        m.lock_level = LockLevel::empty().bits();
        m.exact_base_period = sched.exact_base_period as u8;
        m.creator_pid = creator_pid;
        m.base_period = sched.base_period_ns;
        m.free_objects = [ShmOff::NULL; ObjectKind::COUNT];
        m.free_entries = ShmOff::NULL;
        m.epsilon = [DEFAULT_EPSILON; MAX_EPSILON];
        for (slot, value) in m.epsilon.iter_mut().zip(&sched.epsilon) {
            *slot = *value;
        }
        m.rings = IdBitmap::default();
        m.heap = heap;
        unsafe { list_init(seg, OBJECTS_OFF) };

        // Publish last so an early attacher sees either nothing or a whole master
        m.version = HAL_VER;
        std::sync::atomic::fence(Ordering::Release);
        m.magic = HAL_MAGIC;
        Ok(())
    }

    /// Check the magic and layout version of a mapped arena.
    pub(crate) fn validate(seg: &ShmSegment) -> HalResult<()> {
        seg.check(ShmOff::NULL, HEAP_START)?;
        // SAFETY: in bounds; only plain fields written once at format time are read.
        let m = unsafe { seg.get::<MasterRegion>(ShmOff::NULL) };
        std::sync::atomic::fence(Ordering::Acquire);
        if m.magic != HAL_MAGIC {
            return Err(ShmError::BadMagic {
                name: seg.path().display().to_string(),
            }
            .into());
        }
        if m.version != HAL_VER {
            return Err(HalError::VersionMismatch {
                expected: HAL_VER,
                found: m.version,
            });
        }
        Ok(())
    }

    pub(crate) fn lock_level(&self) -> LockLevel {
        LockLevel::from_bits_truncate(self.lock_level)
    }

    /// Fail with `Locked` if any bit of `level` is set.
    pub(crate) fn check_unlocked(&self, level: LockLevel, what: &'static str) -> HalResult<()> {
        if self.lock_level().intersects(level) {
            return Err(HalError::Locked(what));
        }
        Ok(())
    }

    pub(crate) fn threads_running(&self) -> bool {
        self.threads_running.load(Ordering::Acquire) != 0
    }
}
