//! Object records stored in the arena and the handles that refer to them.
//!
//! Every named object is a `#[repr(C)]` record whose first field is an
//! [`ObjectHeader`]. Records are linked into the master object list through
//! the header and, once deleted, into a per-kind free list for reuse. A reused
//! record keeps its generation counter, which is bumped on every delete, so a
//! [`Handle`] taken before the delete no longer resolves.

use hal::consts::HAL_NAME_LEN;
use hal::types::ObjectKind;
use hal_shared_memory::{ListLinks, ShmOff};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicI64, AtomicU8, AtomicU32, AtomicU64};

/// Bytes reserved for a name, NUL terminator included.
pub const NAME_BUF: usize = HAL_NAME_LEN + 1;

/// Header shared by every named object.
#[repr(C)]
pub struct ObjectHeader {
    /// Master list (or free list) linkage
    pub(crate) links: ListLinks,
    /// Unique id, never reused
    pub(crate) id: i32,
    /// Id of the owning component or instance, 0 for none
    pub(crate) owner_id: i32,
    /// Bumped on every delete
    pub(crate) generation: u32,
    /// `ObjectKind` discriminant
    pub(crate) kind: u8,
    /// 1 while registered
    pub(crate) live: u8,
    /// NUL padded name
    pub(crate) name: [u8; NAME_BUF],
}

impl ObjectHeader {
    /// Object name.
    pub fn name(&self) -> &str {
        let len = self.name.iter().position(|b| *b == 0).unwrap_or(NAME_BUF);
        std::str::from_utf8(&self.name[..len]).unwrap_or("")
    }

    pub(crate) fn kind(&self) -> Option<ObjectKind> {
        ObjectKind::from_u8(self.kind)
    }

    pub(crate) fn is_live(&self) -> bool {
        self.live == 1
    }
}

/// Encode a name into a header buffer. The caller has checked its length.
pub(crate) fn name_buf(name: &str) -> [u8; NAME_BUF] {
    let mut buf = [0u8; NAME_BUF];
    let len = name.len().min(HAL_NAME_LEN);
    buf[..len].copy_from_slice(&name.as_bytes()[..len]);
    buf
}

/// A record type that lives in the arena behind an [`ObjectHeader`].
///
/// # Safety
/// Implementors must be `#[repr(C)]` with an `ObjectHeader` as their first
/// field, and the all-zero bit pattern must be a valid value.
pub unsafe trait Record: Sized + 'static {
    /// Kind tag written into the header.
    const KIND: ObjectKind;
}

/// Registered module.
#[repr(C)]
pub struct CompRecord {
    pub(crate) hdr: ObjectHeader,
    pub(crate) comp_type: u8,
    pub(crate) state: u8,
    pub(crate) has_ctor: u8,
    pub(crate) has_dtor: u8,
    /// Process that registered the component
    pub(crate) pid: u32,
    pub(crate) last_update: i64,
    pub(crate) last_bound: i64,
    pub(crate) last_unbound: i64,
}

/// Named sub-object of an instantiable component.
#[repr(C)]
pub struct InstRecord {
    pub(crate) hdr: ObjectHeader,
    /// Private data blob, NULL when size is 0
    pub(crate) data: ShmOff,
    pub(crate) size: u32,
}

/// Typed data port.
#[repr(C)]
pub struct PinRecord {
    pub(crate) hdr: ObjectHeader,
    /// The pin's pointer variable: offset of the cell the owner reads/writes
    pub(crate) data_ptr: AtomicU32,
    /// Linked signal, NULL when unlinked
    pub(crate) signal: ShmOff,
    pub(crate) signal_gen: u32,
    pub(crate) ty: u8,
    pub(crate) dir: u8,
    pub(crate) flags: u8,
    pub(crate) eps_index: u8,
    /// Local storage used while unlinked
    pub(crate) dummy: AtomicU64,
}

/// Shared value cell.
#[repr(C)]
pub struct SigRecord {
    pub(crate) hdr: ObjectHeader,
    pub(crate) ty: u8,
    pub(crate) readers: u32,
    pub(crate) writers: u32,
    pub(crate) bidirs: u32,
    pub(crate) data: AtomicU64,
}

/// Typed value, not linkable.
#[repr(C)]
pub struct ParamRecord {
    pub(crate) hdr: ObjectHeader,
    pub(crate) ty: u8,
    pub(crate) dir: u8,
    pub(crate) data: AtomicU64,
}

/// Exported unit of work. The callable itself lives in the exporting process.
#[repr(C)]
pub struct FunctRecord {
    pub(crate) hdr: ObjectHeader,
    pub(crate) signature: u8,
    pub(crate) uses_fp: u8,
    pub(crate) reentrant: u8,
    pub(crate) maxtime_increased: AtomicU8,
    /// Number of thread entries pointing here
    pub(crate) users: u32,
    pub(crate) runtime: AtomicI64,
    pub(crate) maxtime: AtomicI64,
}

/// Periodic execution context.
#[repr(C)]
pub struct ThreadRecord {
    pub(crate) hdr: ObjectHeader,
    pub(crate) period: i64,
    pub(crate) priority: i32,
    /// -1 for no affinity
    pub(crate) cpu_id: i32,
    pub(crate) uses_fp: u8,
    pub(crate) runtime: AtomicI64,
    pub(crate) maxtime: AtomicI64,
    pub(crate) overruns: AtomicU64,
    pub(crate) cycles: AtomicU64,
    /// Sentinel of the ordered `FunctEntry` list
    pub(crate) funct_list: ListLinks,
}

/// Versioned function table handle.
#[repr(C)]
pub struct VtableRecord {
    pub(crate) hdr: ObjectHeader,
    pub(crate) version: i32,
    pub(crate) refcount: u32,
}

/// Auxiliary ring segment.
#[repr(C)]
pub struct RingRecord {
    pub(crate) hdr: ObjectHeader,
    pub(crate) ring_id: u32,
    pub(crate) size: u32,
    pub(crate) flags: u32,
}

/// One function placed in one thread. Not a named object.
#[repr(C)]
pub(crate) struct FunctEntry {
    pub(crate) links: ListLinks,
    pub(crate) funct: ShmOff,
    pub(crate) funct_gen: u32,
}

macro_rules! impl_record {
    ($($ty:ty => $kind:ident),* $(,)?) => {
        $(
            // SAFETY: repr(C), header first, all fields valid when zeroed.
            unsafe impl Record for $ty {
                const KIND: ObjectKind = ObjectKind::$kind;
            }
        )*
    };
}

impl_record! {
    CompRecord => Component,
    InstRecord => Instance,
    PinRecord => Pin,
    SigRecord => Signal,
    ParamRecord => Param,
    FunctRecord => Funct,
    ThreadRecord => Thread,
    VtableRecord => Vtable,
    RingRecord => Ring,
}

/// Typed generational reference to an object of record type `R`.
///
/// Stable across processes: it holds the record offset, not an address.
pub struct Handle<R> {
    pub(crate) off: ShmOff,
    pub(crate) generation: u32,
    pub(crate) id: i32,
    _kind: PhantomData<fn() -> R>,
}

impl<R> Handle<R> {
    pub(crate) fn new(off: ShmOff, generation: u32, id: i32) -> Self {
        Self {
            off,
            generation,
            id,
            _kind: PhantomData,
        }
    }

    /// Unique object id.
    pub fn id(&self) -> i32 {
        self.id
    }

    /// Record offset in the arena.
    pub fn offset(&self) -> ShmOff {
        self.off
    }
}

impl<R> Clone for Handle<R> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<R> Copy for Handle<R> {}

impl<R> PartialEq for Handle<R> {
    fn eq(&self, other: &Self) -> bool {
        self.off == other.off && self.generation == other.generation && self.id == other.id
    }
}

impl<R> Eq for Handle<R> {}

impl<R> Hash for Handle<R> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.off.hash(state);
        self.generation.hash(state);
        self.id.hash(state);
    }
}

impl<R: Record> fmt::Debug for Handle<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}@{}/{}", R::KIND, self.id, self.off, self.generation)
    }
}

/// Component handle.
pub type CompHandle = Handle<CompRecord>;
/// Instance handle.
pub type InstHandle = Handle<InstRecord>;
/// Pin handle.
pub type PinHandle = Handle<PinRecord>;
/// Signal handle.
pub type SignalHandle = Handle<SigRecord>;
/// Parameter handle.
pub type ParamHandle = Handle<ParamRecord>;
/// Function handle.
pub type FunctHandle = Handle<FunctRecord>;
/// Thread handle.
pub type ThreadHandle = Handle<ThreadRecord>;
/// Vtable handle.
pub type VtableHandle = Handle<VtableRecord>;
/// Ring handle.
pub type RingHandle = Handle<RingRecord>;

/// Untyped reference to an object of any kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectRef {
    pub(crate) off: ShmOff,
    pub(crate) generation: u32,
    pub(crate) id: i32,
    pub(crate) kind: ObjectKind,
}

impl ObjectRef {
    /// Unique object id.
    pub fn id(&self) -> i32 {
        self.id
    }

    /// Object kind.
    pub fn kind(&self) -> ObjectKind {
        self.kind
    }

    /// Typed handle, if the object is of kind `R`.
    pub fn downcast<R: Record>(self) -> Option<Handle<R>> {
        (self.kind == R::KIND).then(|| Handle::new(self.off, self.generation, self.id))
    }
}

impl<R: Record> From<Handle<R>> for ObjectRef {
    fn from(h: Handle<R>) -> Self {
        Self {
            off: h.off,
            generation: h.generation,
            id: h.id,
            kind: R::KIND,
        }
    }
}
