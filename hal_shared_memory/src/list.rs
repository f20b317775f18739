//! Intrusive circular doubly-linked lists addressed by offset.
//!
//! A list is a sentinel [`ListLinks`] (usually embedded in a header) plus a
//! [`ListLinks`] at the start of every element. An empty list is a sentinel
//! that points at itself. Mutation requires the HAL lock.

use crate::offset::ShmOff;
use crate::segment::ShmSegment;

/// Link pair embedded in list sentinels and elements.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListLinks {
    /// Next element (or the sentinel)
    pub next: ShmOff,
    /// Previous element (or the sentinel)
    pub prev: ShmOff,
}

#[inline]
unsafe fn links(seg: &ShmSegment, off: ShmOff) -> &mut ListLinks {
    unsafe { seg.get_mut::<ListLinks>(off) }
}

/// Make `head` an empty list.
///
/// # Safety
/// `head` must be a `ListLinks` in `seg` and the caller must hold the lock.
pub unsafe fn list_init(seg: &ShmSegment, head: ShmOff) {
    let l = unsafe { links(seg, head) };
    l.next = head;
    l.prev = head;
}

/// Whether the list at `head` has no elements.
///
/// # Safety
/// As for [`list_init`].
pub unsafe fn list_empty(seg: &ShmSegment, head: ShmOff) -> bool {
    unsafe { links(seg, head).next == head }
}

/// Insert `entry` directly after `pos`.
///
/// # Safety
/// `pos` must be linked into a valid list, `entry` must be unlinked, and the
/// caller must hold the lock.
pub unsafe fn list_add_after(seg: &ShmSegment, pos: ShmOff, entry: ShmOff) {
    unsafe {
        let next = links(seg, pos).next;
        {
            let e = links(seg, entry);
            e.prev = pos;
            e.next = next;
        }
        links(seg, next).prev = entry;
        links(seg, pos).next = entry;
    }
}

/// Insert `entry` directly before `pos`. With `pos` the sentinel this appends.
///
/// # Safety
/// As for [`list_add_after`].
pub unsafe fn list_add_before(seg: &ShmSegment, pos: ShmOff, entry: ShmOff) {
    unsafe {
        let prev = links(seg, pos).prev;
        list_add_after(seg, prev, entry);
    }
}

/// Unlink `entry` and leave it pointing at itself.
///
/// # Safety
/// `entry` must be linked into a valid list and the caller must hold the lock.
pub unsafe fn list_remove(seg: &ShmSegment, entry: ShmOff) {
    unsafe {
        let ListLinks { next, prev } = *links(seg, entry);
        links(seg, prev).next = next;
        links(seg, next).prev = prev;
        let e = links(seg, entry);
        e.next = entry;
        e.prev = entry;
    }
}

/// Successor of `entry`.
///
/// # Safety
/// `entry` must be a valid `ListLinks` in `seg`.
pub unsafe fn list_next(seg: &ShmSegment, entry: ShmOff) -> ShmOff {
    unsafe { seg.get::<ListLinks>(entry).next }
}

/// Predecessor of `entry`.
///
/// # Safety
/// `entry` must be a valid `ListLinks` in `seg`.
pub unsafe fn list_prev(seg: &ShmSegment, entry: ShmOff) -> ShmOff {
    unsafe { seg.get::<ListLinks>(entry).prev }
}

/// Forward iterator over element offsets, sentinel excluded.
///
/// The list must not change while the iterator is in use. Callers that
/// remove the current element should collect offsets first.
pub struct ListIter<'a> {
    seg: &'a ShmSegment,
    head: ShmOff,
    cur: ShmOff,
}

impl<'a> ListIter<'a> {
    /// Iterate the list at `head`.
    ///
    /// # Safety
    /// `head` must be a valid list sentinel that stays unchanged for the
    /// lifetime of the iterator.
    pub unsafe fn new(seg: &'a ShmSegment, head: ShmOff) -> Self {
        let cur = unsafe { list_next(seg, head) };
        Self { seg, head, cur }
    }
}

impl Iterator for ListIter<'_> {
    type Item = ShmOff;

    fn next(&mut self) -> Option<ShmOff> {
        if self.cur == self.head || self.cur.is_null() {
            return None;
        }
        let item = self.cur;
        // SAFETY: guaranteed by `ListIter::new`.
        self.cur = unsafe { list_next(self.seg, item) };
        Some(item)
    }
}
