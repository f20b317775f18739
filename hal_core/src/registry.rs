//! Generic object registry over the master object list.
//!
//! One list holds every named object regardless of kind, so name uniqueness
//! and lookups are a single walk. Ids come from a monotonic counter and are
//! never reused; record storage is recycled through per-kind free lists.

use hal::consts::HAL_NAME_LEN;
use hal::types::ObjectKind;
use hal_shared_memory::{ListIter, ShmOff, ShmSegment, list_add_before, list_remove};
use tracing::trace;

use crate::core::Hal;
use crate::error::{HalError, HalResult};
use crate::guard::HalGuard;
use crate::master::{HEAP_START, OBJECTS_OFF};
use crate::object::{Handle, ObjectHeader, ObjectRef, Record, name_buf};

/// Walk the object list and return the first object matching `pred`.
///
/// # Safety
/// The caller holds the lock, or accepts that a concurrent mutation may
/// produce a torn view or a missed object.
unsafe fn scan(
    seg: &ShmSegment,
    kind: Option<ObjectKind>,
    mut pred: impl FnMut(&ObjectHeader) -> bool,
) -> Option<ObjectRef> {
    for off in unsafe { ListIter::new(seg, OBJECTS_OFF) } {
        let hdr = unsafe { seg.get::<ObjectHeader>(off) };
        let Some(k) = hdr.kind() else { continue };
        if kind.is_some_and(|want| want != k) {
            continue;
        }
        if pred(hdr) {
            return Some(ObjectRef {
                off,
                generation: hdr.generation,
                id: hdr.id,
                kind: k,
            });
        }
    }
    None
}

impl<'a> HalGuard<'a> {
    /// Check that `off` holds the live object `(kind, id, generation)`.
    pub(crate) fn resolve_off(
        &self,
        off: ShmOff,
        generation: u32,
        id: i32,
        kind: ObjectKind,
        size: usize,
    ) -> HalResult<ShmOff> {
        let not_found = || HalError::NotFound(format!("{kind} #{id}"));
        if off.as_usize() < HEAP_START || off.get() % 8 != 0 || self.seg().check(off, size).is_err()
        {
            return Err(not_found());
        }
        let hdr = self.header(off);
        if !hdr.is_live() || hdr.kind != kind as u8 || hdr.generation != generation || hdr.id != id
        {
            return Err(not_found());
        }
        Ok(off)
    }

    #[inline]
    pub(crate) fn header(&self, off: ShmOff) -> &'a ObjectHeader {
        // SAFETY: offsets passed here come from the object list or from
        // `resolve_off`, both of which point at record headers.
        unsafe { self.seg().get::<ObjectHeader>(off) }
    }

    pub(crate) fn object_ref(&self, off: ShmOff) -> Option<ObjectRef> {
        let hdr = self.header(off);
        Some(ObjectRef {
            off,
            generation: hdr.generation,
            id: hdr.id,
            kind: hdr.kind()?,
        })
    }

    /// Resolve an untyped reference, returning its header.
    pub(crate) fn resolve_ref(&self, obj: ObjectRef) -> HalResult<&'a ObjectHeader> {
        let off = self.resolve_off(
            obj.off,
            obj.generation,
            obj.id,
            obj.kind,
            std::mem::size_of::<ObjectHeader>(),
        )?;
        Ok(self.header(off))
    }

    /// Reject names that are empty, too long, or already taken.
    pub(crate) fn check_name(&self, name: &str) -> HalResult<()> {
        if name.is_empty() {
            return Err(HalError::InvalidArgument("empty name".to_string()));
        }
        if name.contains('\0') {
            return Err(HalError::InvalidArgument(format!("name {name:?} contains NUL")));
        }
        if name.len() > HAL_NAME_LEN {
            return Err(HalError::NameTooLong {
                name: name.to_string(),
                len: name.len(),
                max: HAL_NAME_LEN,
            });
        }
        if self.find_by_name(None, name).is_some() {
            return Err(HalError::DuplicateName(name.to_string()));
        }
        Ok(())
    }

    /// Register a new object of record type `R`.
    ///
    /// The record comes back zeroed apart from its header.
    pub(crate) fn create_object<R: Record>(
        &mut self,
        name: &str,
        owner_id: i32,
    ) -> HalResult<(Handle<R>, &'a mut R)> {
        self.check_name(name)?;
        let seg = self.seg();
        let m = self.master();
        let size = std::mem::size_of::<R>();
        let id = m.next_id;
        let next_id = id.checked_add(1).ok_or(HalError::Exhausted {
            resource: "object ids",
            limit: i32::MAX as usize,
        })?;

        let free = &mut m.free_objects[R::KIND as usize];
        let (off, generation) = if free.is_null() {
            (m.heap.alloc(seg, size)?, 0)
        } else {
            let off = *free;
            let hdr = self.header(off);
            *free = hdr.links.next;
            let generation = hdr.generation;
            // SAFETY: recycled record of the same kind, so `size` bytes are ours.
            unsafe { std::ptr::write_bytes(seg.to_ptr(off), 0, size) };
            (off, generation)
        };

        m.next_id = next_id;

        // SAFETY: `off` holds a zeroed `R`, which starts with its header.
        let hdr = unsafe { self.at::<ObjectHeader>(off) };
        hdr.id = id;
        hdr.owner_id = owner_id;
        hdr.generation = generation;
        hdr.kind = R::KIND as u8;
        hdr.name = name_buf(name);
        hdr.live = 1;
        unsafe { list_add_before(seg, OBJECTS_OFF, off) };

        trace!("Registered {} {} (id {}) at {}", R::KIND, name, id, off);
        Ok((Handle::new(off, generation, id), unsafe { self.at::<R>(off) }))
    }

    /// Unlink an object and push its record onto the free list.
    ///
    /// Anything the object owns must already be gone.
    pub(crate) fn destroy_object<R: Record>(&mut self, h: Handle<R>) -> HalResult<()> {
        self.resolve(h)?;
        let seg = self.seg();
        let m = self.master();
        unsafe { list_remove(seg, h.off) };

        let hdr = unsafe { self.at::<ObjectHeader>(h.off) };
        trace!("Removed {} {} (id {})", R::KIND, hdr.name(), hdr.id);
        hdr.live = 0;
        hdr.generation = hdr.generation.wrapping_add(1);
        let free = &mut m.free_objects[R::KIND as usize];
        hdr.links.next = *free;
        *free = h.off;
        Ok(())
    }

    /// Find an object by name, optionally restricted to one kind.
    pub fn find_by_name(&self, kind: Option<ObjectKind>, name: &str) -> Option<ObjectRef> {
        // SAFETY: we hold the lock.
        unsafe { scan(self.seg(), kind, |h| h.name() == name) }
    }

    /// Find an object by id, optionally restricted to one kind.
    pub fn find_by_id(&self, kind: Option<ObjectKind>, id: i32) -> Option<ObjectRef> {
        // SAFETY: we hold the lock.
        unsafe { scan(self.seg(), kind, |h| h.id == id) }
    }

    /// Typed lookup by name.
    pub fn find<R: Record>(&self, name: &str) -> Option<Handle<R>> {
        self.find_by_name(Some(R::KIND), name)?.downcast()
    }

    /// Typed lookup by id.
    pub fn find_id<R: Record>(&self, id: i32) -> Option<Handle<R>> {
        self.find_by_id(Some(R::KIND), id)?.downcast()
    }

    /// Whether the object still exists.
    pub fn is_live(&self, obj: impl Into<ObjectRef>) -> bool {
        self.resolve_ref(obj.into()).is_ok()
    }

    /// Name of a live object.
    pub fn name_of(&self, obj: impl Into<ObjectRef>) -> Option<String> {
        self.resolve_ref(obj.into()).ok().map(|h| h.name().to_string())
    }

    /// Id of the owner of a live object (0 for none).
    pub fn owner_of(&self, obj: impl Into<ObjectRef>) -> Option<i32> {
        self.resolve_ref(obj.into()).ok().map(|h| h.owner_id)
    }

    /// All objects, in creation order, optionally of one kind.
    pub fn objects(&self, kind: Option<ObjectKind>) -> Vec<ObjectRef> {
        self.iter_objects()
            .filter_map(|off| self.object_ref(off))
            .filter(|o| kind.is_none_or(|k| k == o.kind))
            .collect()
    }

    /// All objects whose owner id is `owner_id`.
    pub fn owned_by(&self, owner_id: i32) -> Vec<ObjectRef> {
        self.iter_objects()
            .filter(|off| self.header(*off).owner_id == owner_id)
            .filter_map(|off| self.object_ref(off))
            .collect()
    }

    pub(crate) fn iter_objects(&self) -> ListIter<'a> {
        // SAFETY: the list is stable while we hold the lock and do not mutate it.
        unsafe { ListIter::new(self.seg(), OBJECTS_OFF) }
    }

    /// Delete any object through the operation for its kind.
    ///
    /// Deleting a stale reference is `NotFound`.
    pub fn delete_object(&mut self, obj: ObjectRef) -> HalResult<()> {
        self.resolve_ref(obj)?;
        match obj.kind {
            ObjectKind::Component => self.unregister_component(Handle::new(obj.off, obj.generation, obj.id)),
            ObjectKind::Instance => self.delete_instance(Handle::new(obj.off, obj.generation, obj.id)),
            ObjectKind::Pin => self.delete_pin(Handle::new(obj.off, obj.generation, obj.id)),
            ObjectKind::Signal => self.delete_signal(Handle::new(obj.off, obj.generation, obj.id)),
            ObjectKind::Param => self.delete_param(Handle::new(obj.off, obj.generation, obj.id)),
            ObjectKind::Funct => self.delete_funct(Handle::new(obj.off, obj.generation, obj.id)),
            ObjectKind::Thread => self.delete_thread(Handle::new(obj.off, obj.generation, obj.id)),
            ObjectKind::Vtable => self.remove_vtable(Handle::new(obj.off, obj.generation, obj.id)),
            ObjectKind::Ring => self.ring_delete(Handle::new(obj.off, obj.generation, obj.id)),
        }
    }
}

impl Hal {
    /// Locked lookup by name.
    pub fn find_by_name(&self, kind: Option<ObjectKind>, name: &str) -> Option<ObjectRef> {
        self.lock().find_by_name(kind, name)
    }

    /// Locked lookup by id.
    pub fn find_by_id(&self, kind: Option<ObjectKind>, id: i32) -> Option<ObjectRef> {
        self.lock().find_by_id(kind, id)
    }

    /// Locked typed lookup by name.
    pub fn find<R: Record>(&self, name: &str) -> Option<Handle<R>> {
        self.lock().find(name)
    }

    /// Lookup by name without taking the lock.
    ///
    /// # Safety
    /// The caller either holds the lock (through a guard on this or another
    /// `Hal`) or accepts observing the list mid-mutation: a torn walk may miss
    /// objects or, in the worst case, follow a link into a record being
    /// recycled. Nothing in this crate guards against misuse at runtime.
    pub unsafe fn find_unlocked(&self, kind: Option<ObjectKind>, name: &str) -> Option<ObjectRef> {
        unsafe { scan(&self.seg, kind, |h| h.name() == name) }
    }
}
