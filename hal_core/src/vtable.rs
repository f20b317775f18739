//! Named, versioned function tables shared between components.
//!
//! The arena only records the name, version, owner and reference count. The
//! table itself is an `Arc` held in the exporting process.

use hal::types::ObjectKind;
use std::any::Any;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{HalError, HalResult};
use crate::guard::HalGuard;
use crate::master::LockLevel;
use crate::object::{CompHandle, VtableHandle, VtableRecord};

impl HalGuard<'_> {
    /// Publish `table` under `name` and `version`, owned by `comp`.
    pub fn export_vtable(
        &mut self,
        name: &str,
        version: i32,
        comp: CompHandle,
        table: Arc<dyn Any + Send + Sync>,
    ) -> HalResult<VtableHandle> {
        self.master().check_unlocked(LockLevel::LOAD, "load")?;
        self.resolve(comp)?;
        let (h, rec) = self.create_object::<VtableRecord>(name, comp.id())?;
        rec.version = version;
        rec.refcount = 0;
        self.hal.local.vtables.write().insert(h.id(), table);
        info!("Exported vtable {} version {}", name, version);
        Ok(h)
    }

    /// Take a reference to the table `name` at exactly `version`.
    ///
    /// The table must have been exported by this process and be of type `T`.
    pub fn reference_vtable<T: Any + Send + Sync>(
        &mut self,
        name: &str,
        version: i32,
    ) -> HalResult<(VtableHandle, Arc<T>)> {
        let h = self
            .find_by_name(Some(ObjectKind::Vtable), name)
            .and_then(|o| o.downcast::<VtableRecord>())
            .ok_or_else(|| HalError::NotFound(name.to_string()))?;
        let rec = self.resolve(h)?;
        if rec.version != version {
            return Err(HalError::NotFound(format!(
                "{name} version {version} (exported: {})",
                rec.version
            )));
        }
        let table = self
            .hal
            .local
            .vtables
            .read()
            .get(&h.id())
            .cloned()
            .ok_or_else(|| HalError::NotFound(format!("{name} in this process")))?;
        let table = table.downcast::<T>().map_err(|_| {
            HalError::InvalidArgument(format!("{name} is not a {}", std::any::type_name::<T>()))
        })?;
        rec.refcount += 1;
        debug!("Referenced vtable {} ({} refs)", name, rec.refcount);
        Ok((h, table))
    }

    /// Drop a reference taken with [`reference_vtable`](Self::reference_vtable).
    pub fn unreference_vtable(&mut self, vtable: VtableHandle) -> HalResult<()> {
        let rec = self.resolve(vtable)?;
        if rec.refcount == 0 {
            return Err(HalError::InvalidArgument(format!(
                "{} is not referenced",
                rec.hdr.name()
            )));
        }
        rec.refcount -= 1;
        Ok(())
    }

    /// Withdraw a vtable. Refused with `Busy` while references remain.
    pub fn remove_vtable(&mut self, vtable: VtableHandle) -> HalResult<()> {
        let rec = self.resolve(vtable)?;
        if rec.refcount > 0 {
            return Err(HalError::Busy {
                name: rec.hdr.name().to_string(),
                refs: rec.refcount,
            });
        }
        let name = rec.hdr.name().to_string();
        self.destroy_object(vtable)?;
        self.hal.local.vtables.write().remove(&vtable.id());
        info!("Removed vtable {}", name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::new_hal;
    use hal::types::CompType;

    struct Kinematics {
        joints: usize,
        forward: fn(f64) -> f64,
    }

    fn table() -> Arc<dyn Any + Send + Sync> {
        Arc::new(Kinematics {
            joints: 3,
            forward: |x| x * 2.0,
        })
    }

    #[test]
    fn reference_counting_blocks_removal() {
        let (_dir, hal) = new_hal();
        let mut g = hal.lock();
        let comp = g.register_component("kins", CompType::Realtime).unwrap();
        let vt = g.export_vtable("trivkins", 2, comp, table()).unwrap();

        let (h, kins) = g.reference_vtable::<Kinematics>("trivkins", 2).unwrap();
        assert_eq!(h, vt);
        assert_eq!(kins.joints, 3);
        assert_eq!((kins.forward)(1.5), 3.0);
        assert!(matches!(
            g.remove_vtable(vt),
            Err(HalError::Busy { refs: 1, .. })
        ));

        g.unreference_vtable(vt).unwrap();
        assert!(g.unreference_vtable(vt).is_err());
        g.remove_vtable(vt).unwrap();
        assert!(matches!(
            g.reference_vtable::<Kinematics>("trivkins", 2),
            Err(HalError::NotFound(_))
        ));
    }

    #[test]
    fn version_and_type_must_match() {
        let (_dir, hal) = new_hal();
        let mut g = hal.lock();
        let comp = g.register_component("kins", CompType::Realtime).unwrap();
        g.export_vtable("tbl", 1, comp, table()).unwrap();
        assert!(matches!(
            g.reference_vtable::<Kinematics>("tbl", 2),
            Err(HalError::NotFound(_))
        ));
        assert!(matches!(
            g.reference_vtable::<u32>("tbl", 1),
            Err(HalError::InvalidArgument(_))
        ));
    }

    #[test]
    fn owner_unload_removes_unreferenced_vtables() {
        let (_dir, hal) = new_hal();
        let mut g = hal.lock();
        let comp = g.register_component("kins", CompType::Realtime).unwrap();
        g.export_vtable("gone", 1, comp, table()).unwrap();
        g.unregister_component(comp).unwrap();
        assert!(g.find_by_name(None, "gone").is_none());
        assert!(hal.local.vtables.read().is_empty());
    }
}
