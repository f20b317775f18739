//! The machine-wide HAL lock and its scoped guard.
//!
//! The lock is a single word in the master region holding the pid of the
//! holder (0 when free). [`HalGuard`] is the only way to mutate the arena; it
//! releases the lock when dropped, on every exit path.

use hal_shared_memory::ShmOff;
use hal_shared_memory::platform::{is_process_alive, yield_now};
use std::sync::atomic::Ordering;
use tracing::warn;

use crate::core::Hal;
use crate::error::HalResult;
use crate::master::{LockLevel, MasterRegion};
use crate::object::{Handle, Record};

const SPIN_BEFORE_YIELD: u32 = 100;

/// Scoped ownership of the HAL lock.
///
/// All mutating operations are methods on the guard. Dropping it releases
/// the lock.
pub struct HalGuard<'a> {
    pub(crate) hal: &'a Hal,
}

impl<'a> HalGuard<'a> {
    /// Spin until the lock is ours.
    pub(crate) fn acquire(hal: &'a Hal) -> Self {
        let word = &hal.master_ref().lock;
        let mut spins = 0u32;
        while word
            .compare_exchange_weak(0, hal.pid, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            spins += 1;
            if spins < SPIN_BEFORE_YIELD {
                std::hint::spin_loop();
            } else {
                yield_now();
            }
        }
        Self { hal }
    }

    /// Take the lock if it is free.
    pub(crate) fn try_acquire(hal: &'a Hal) -> Option<Self> {
        hal.master_ref()
            .lock
            .compare_exchange(0, hal.pid, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| Self { hal })
    }

    /// The `Hal` this guard locks.
    pub fn hal(&self) -> &'a Hal {
        self.hal
    }

    #[inline]
    pub(crate) fn seg(&self) -> &'a hal_shared_memory::ShmSegment {
        &self.hal.seg
    }

    /// Master region, exclusively ours while the guard lives.
    #[inline]
    #[allow(clippy::mut_from_ref)]
    pub(crate) fn master(&self) -> &'a mut MasterRegion {
        // SAFETY: the master sits at offset 0 of a validated arena and the
        // guard holds the lock.
        unsafe { self.seg().get_mut::<MasterRegion>(ShmOff::NULL) }
    }

    /// Structure of type `T` at `off`.
    ///
    /// # Safety
    /// `off` must hold a `T` written by this crate. The caller must not keep
    /// two overlapping references alive.
    #[inline]
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn at<T>(&self, off: ShmOff) -> &'a mut T {
        unsafe { self.seg().get_mut::<T>(off) }
    }

    /// Resolve a handle to its live record.
    #[allow(clippy::mut_from_ref)]
    pub(crate) fn resolve<R: Record>(&self, h: Handle<R>) -> HalResult<&'a mut R> {
        let off = self.resolve_off(h.off, h.generation, h.id, R::KIND, std::mem::size_of::<R>())?;
        // SAFETY: header checked live and of kind R by `resolve_off`.
        Ok(unsafe { self.at::<R>(off) })
    }

    /// Current lock level.
    pub fn lock_level(&self) -> LockLevel {
        self.master().lock_level()
    }

    /// Replace the lock level.
    pub fn set_lock_level(&mut self, level: LockLevel) {
        self.master().lock_level = level.bits();
    }
}

impl Drop for HalGuard<'_> {
    fn drop(&mut self) {
        self.hal.master_ref().lock.store(0, Ordering::Release);
    }
}

impl Hal {
    /// Acquire the machine-wide lock, blocking until it is free.
    pub fn lock(&self) -> HalGuard<'_> {
        HalGuard::acquire(self)
    }

    /// Acquire the lock only if nobody holds it.
    pub fn try_lock(&self) -> Option<HalGuard<'_>> {
        HalGuard::try_acquire(self)
    }

    /// Pid currently holding the lock, if any.
    pub fn lock_holder(&self) -> Option<u32> {
        match self.master_ref().lock.load(Ordering::Acquire) {
            0 => None,
            pid => Some(pid),
        }
    }

    /// Break the lock if its holder has died. Returns the dead pid.
    pub fn recover_lock(&self) -> Option<u32> {
        let word = &self.master_ref().lock;
        let holder = word.load(Ordering::Acquire);
        if holder == 0 || is_process_alive(holder) {
            return None;
        }
        word.compare_exchange(holder, 0, Ordering::AcqRel, Ordering::Relaxed)
            .ok()?;
        warn!("Broke HAL lock held by dead process {}", holder);
        Some(holder)
    }
}
