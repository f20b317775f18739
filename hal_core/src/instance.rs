//! Instance lifecycle: construction through the owning component's
//! constructor and teardown through its destructor or the default one.

use hal_shared_memory::ShmOff;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{HalError, HalResult};
use crate::guard::HalGuard;
use crate::master::LockLevel;
use crate::object::{CompHandle, InstHandle, InstRecord};

/// Constructor of an instantiable component.
///
/// Runs with the HAL lock held; everything it creates should be owned by
/// `info.handle` so the instance teardown can find it.
pub type InstanceCtor =
    Arc<dyn Fn(&mut HalGuard<'_>, &InstanceInfo, &[&str]) -> HalResult<()> + Send + Sync>;

/// Destructor of an instantiable component. Runs with the HAL lock held.
pub type InstanceDtor = Arc<dyn Fn(&mut HalGuard<'_>, &InstanceInfo) -> HalResult<()> + Send + Sync>;

#[derive(Clone)]
pub(crate) struct InstanceHooks {
    pub(crate) ctor: InstanceCtor,
    pub(crate) dtor: Option<InstanceDtor>,
}

/// Identity of an instance, handed to constructors and destructors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceInfo {
    /// The instance
    pub handle: InstHandle,
    /// Its owning component
    pub comp: CompHandle,
    /// Instance name
    pub name: String,
    /// Private data blob, NULL when `size` is 0
    pub data: ShmOff,
    /// Blob size in bytes
    pub size: usize,
}

impl HalGuard<'_> {
    /// Create an instance of `comp` and run its constructor.
    ///
    /// A failing constructor leaves nothing behind: the instance and
    /// whatever the constructor had created are torn down again.
    pub fn create_instance(
        &mut self,
        comp: CompHandle,
        name: &str,
        size: usize,
        args: &[&str],
    ) -> HalResult<InstHandle> {
        self.master().check_unlocked(LockLevel::LOAD, "load")?;
        let comp_rec = self.resolve(comp)?;
        let comp_name = comp_rec.hdr.name().to_string();
        let hooks = match self.hal.local.hooks.read().get(&comp.id()) {
            Some(hooks) if comp_rec.has_ctor != 0 => hooks.clone(),
            _ => return Err(HalError::NoConstructor(comp_name)),
        };
        self.check_name(name)?;

        let data = if size > 0 {
            let seg = self.seg();
            self.master().heap.alloc(seg, size)?
        } else {
            ShmOff::NULL
        };
        let (handle, rec) = match self.create_object::<InstRecord>(name, comp.id()) {
            Ok(created) => created,
            Err(e) => {
                self.free_blob(data);
                return Err(e);
            }
        };
        rec.data = data;
        rec.size = size as u32;

        let info = InstanceInfo {
            handle,
            comp,
            name: name.to_string(),
            data,
            size,
        };
        if let Err(e) = (hooks.ctor)(self, &info, args) {
            warn!("Constructor of {} failed for {}: {}", comp_name, name, e);
            if let Err(cleanup) = self.teardown_instance(&info, None) {
                warn!("Cleanup of failed instance {} incomplete: {}", name, cleanup);
            }
            return Err(e);
        }

        info!("Created instance {} of {} ({} bytes)", name, comp_name, size);
        Ok(handle)
    }

    /// Delete an instance through its component's destructor, or the
    /// default teardown when none was supplied.
    ///
    /// A failing destructor is logged and the default teardown reclaims
    /// what it left behind.
    pub fn delete_instance(&mut self, inst: InstHandle) -> HalResult<()> {
        let info = self.instance_info(inst)?;
        self.check_teardown(&[inst.id()])?;
        let dtor = self
            .hal
            .local
            .hooks
            .read()
            .get(&info.comp.id())
            .and_then(|h| h.dtor.clone());
        self.teardown_instance(&info, dtor)?;
        info!("Deleted instance {}", info.name);
        Ok(())
    }

    fn teardown_instance(&mut self, info: &InstanceInfo, dtor: Option<InstanceDtor>) -> HalResult<()> {
        if let Some(dtor) = dtor {
            if let Err(e) = dtor(self, info) {
                warn!("Destructor of {} failed: {}", info.name, e);
            }
            // Whatever the destructor left behind is still ours to reclaim
            let leftovers = self.delete_owned(info.handle.id())?;
            if leftovers > 0 {
                debug!("Reclaimed {} objects left by destructor of {}", leftovers, info.name);
            }
        } else {
            self.delete_owned(info.handle.id())?;
        }

        self.destroy_object(info.handle)?;
        self.free_blob(info.data);
        Ok(())
    }

    fn free_blob(&mut self, data: ShmOff) {
        if data.is_null() {
            return;
        }
        let seg = self.seg();
        if let Err(e) = self.master().heap.free(seg, data) {
            warn!("Failed to free instance data at {}: {}", data, e);
        }
    }

    /// Identity and data blob of an instance.
    pub fn instance_info(&self, inst: InstHandle) -> HalResult<InstanceInfo> {
        let rec = self.resolve(inst)?;
        let comp = self
            .find_id(rec.hdr.owner_id)
            .ok_or_else(|| HalError::NotFound(format!("component #{}", rec.hdr.owner_id)))?;
        Ok(InstanceInfo {
            handle: inst,
            comp,
            name: rec.hdr.name().to_string(),
            data: rec.data,
            size: rec.size as usize,
        })
    }
}
