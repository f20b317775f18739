//! Serializable view of the whole registry for display and telemetry.

use hal::types::{HalValue, ObjectKind};
use serde::Serialize;

use crate::core::Hal;
use crate::object::{ParamRecord, PinRecord, SigRecord};

/// One object in a [`HalSnapshot`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObjectInfo {
    /// Unique id
    pub id: i32,
    /// Object kind
    pub kind: ObjectKind,
    /// Object name
    pub name: String,
    /// Owner id, 0 for none
    pub owner_id: i32,
    /// Current value of pins, signals and parameters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<HalValue>,
}

/// Consistent listing of every object, taken under the lock.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HalSnapshot {
    /// Layout version of the arena
    pub version: u32,
    /// Base period in ns, 0 if not yet set
    pub base_period: i64,
    /// Current lock level bits
    pub lock_level: u8,
    /// Threads are running
    pub threads_running: bool,
    /// Free heap bytes
    pub heap_available: usize,
    /// Used heap bytes
    pub heap_used: usize,
    /// Objects in creation order
    pub objects: Vec<ObjectInfo>,
}

impl Hal {
    /// Take a snapshot of the registry.
    pub fn snapshot(&self) -> HalSnapshot {
        let g = self.lock();
        let m = g.master();
        let objects = g
            .objects(None)
            .into_iter()
            .map(|obj| {
                let hdr = g.header(obj.off);
                let value = match obj.kind {
                    ObjectKind::Pin => obj
                        .downcast::<PinRecord>()
                        .and_then(|h| g.resolve(h).ok())
                        .map(|p| g.pin_value(p)),
                    ObjectKind::Signal => obj
                        .downcast::<SigRecord>()
                        .and_then(|h| g.resolve(h).ok())
                        .map(|s| s.value()),
                    ObjectKind::Param => obj
                        .downcast::<ParamRecord>()
                        .and_then(|h| g.resolve(h).ok())
                        .map(|p| p.value()),
                    _ => None,
                };
                ObjectInfo {
                    id: obj.id,
                    kind: obj.kind,
                    name: hdr.name().to_string(),
                    owner_id: hdr.owner_id,
                    value,
                }
            })
            .collect();

        HalSnapshot {
            version: m.version,
            base_period: m.base_period,
            lock_level: m.lock_level().bits(),
            threads_running: m.threads_running(),
            heap_available: m.heap.avail(),
            heap_used: m.heap.used(),
            objects,
        }
    }
}
