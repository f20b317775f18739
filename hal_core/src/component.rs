//! Component registration, state and remote liveness.

use hal::types::{CompState, CompType, ObjectKind};
use hal_shared_memory::platform::monotonic_now_ns;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{HalError, HalResult};
use crate::guard::HalGuard;
use crate::instance::{InstanceCtor, InstanceDtor, InstanceHooks};
use crate::master::LockLevel;
use crate::object::{
    CompHandle, CompRecord, FunctRecord, Handle, InstHandle, ObjectRef, VtableRecord,
};

/// Snapshot of a component's state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComponentInfo {
    /// Component name
    pub name: String,
    /// Unique id
    pub id: i32,
    /// Subtype
    pub comp_type: CompType,
    /// Lifecycle state
    pub state: CompState,
    /// Process that registered it
    pub pid: u32,
    /// Whether instances can be created
    pub instantiable: bool,
    /// Last liveness update (monotonic ns), remote components
    pub last_update: i64,
    /// Last bind (monotonic ns), remote components
    pub last_bound: i64,
    /// Last unbind (monotonic ns), remote components
    pub last_unbound: i64,
}

impl HalGuard<'_> {
    /// Register a component.
    ///
    /// Remote components start `Unbound`, all others `Initializing`.
    pub fn register_component(&mut self, name: &str, comp_type: CompType) -> HalResult<CompHandle> {
        self.register_with_hooks(name, comp_type, None)
    }

    /// Register an instantiable component with its constructor and an
    /// optional destructor.
    ///
    /// Only this process can create instances of it, since the constructor
    /// lives here.
    pub fn register_instantiable(
        &mut self,
        name: &str,
        ctor: InstanceCtor,
        dtor: Option<InstanceDtor>,
    ) -> HalResult<CompHandle> {
        self.register_with_hooks(name, CompType::Instantiable, Some(InstanceHooks { ctor, dtor }))
    }

    fn register_with_hooks(
        &mut self,
        name: &str,
        comp_type: CompType,
        hooks: Option<InstanceHooks>,
    ) -> HalResult<CompHandle> {
        self.master().check_unlocked(LockLevel::LOAD, "load")?;
        let pid = self.hal.pid;
        let (h, rec) = self.create_object::<CompRecord>(name, 0)?;
        rec.comp_type = comp_type as u8;
        rec.state = match comp_type {
            CompType::Remote => CompState::Unbound,
            _ => CompState::Initializing,
        } as u8;
        rec.pid = pid;
        if let Some(hooks) = hooks {
            rec.has_ctor = 1;
            rec.has_dtor = hooks.dtor.is_some() as u8;
            self.hal.local.hooks.write().insert(h.id(), hooks);
        }
        info!("Registered component {} ({:?}, id {})", name, comp_type, h.id());
        Ok(h)
    }

    /// Unregister a component: its instances go first, then everything it
    /// owns directly, then the component itself.
    ///
    /// Refused with nothing removed while one of its vtables is referenced
    /// or one of its functions is scheduled in running threads.
    pub fn unregister_component(&mut self, comp: CompHandle) -> HalResult<()> {
        let rec = self.resolve(comp)?;
        let name = rec.hdr.name().to_string();

        let instances = self.instances_of(comp);
        let mut owners = vec![comp.id()];
        owners.extend(instances.iter().map(Handle::id));
        self.check_teardown(&owners)?;

        for inst in instances {
            self.delete_instance(inst)?;
        }
        self.delete_owned(comp.id())?;

        self.destroy_object(comp)?;
        self.hal.local.forget(comp.id());
        info!("Unregistered component {}", name);
        Ok(())
    }

    /// Mark a component fully initialized.
    pub fn component_ready(&mut self, comp: CompHandle) -> HalResult<()> {
        let rec = self.resolve(comp)?;
        match CompState::from_u8(rec.state) {
            Some(CompState::Ready) => return Ok(()),
            Some(CompState::Unbound) => {
                return Err(HalError::InvalidArgument(format!(
                    "remote component {} is not bound",
                    rec.hdr.name()
                )));
            }
            _ => {}
        }
        rec.state = CompState::Ready as u8;
        debug!("Component {} ready", rec.hdr.name());
        Ok(())
    }

    /// Record that a remote peer bound to this component.
    pub fn bind_remote(&mut self, comp: CompHandle) -> HalResult<()> {
        let rec = self.remote(comp)?;
        rec.state = CompState::Bound as u8;
        rec.last_bound = monotonic_now_ns();
        rec.last_update = rec.last_bound;
        debug!("Remote component {} bound", rec.hdr.name());
        Ok(())
    }

    /// Record that the remote peer went away.
    pub fn unbind_remote(&mut self, comp: CompHandle) -> HalResult<()> {
        let rec = self.remote(comp)?;
        rec.state = CompState::Unbound as u8;
        rec.last_unbound = monotonic_now_ns();
        debug!("Remote component {} unbound", rec.hdr.name());
        Ok(())
    }

    /// Refresh a remote component's liveness timestamp.
    pub fn touch_remote(&mut self, comp: CompHandle) -> HalResult<()> {
        self.remote(comp)?.last_update = monotonic_now_ns();
        Ok(())
    }

    #[allow(clippy::mut_from_ref)]
    fn remote(&self, comp: CompHandle) -> HalResult<&mut CompRecord> {
        let rec = self.resolve(comp)?;
        if rec.comp_type != CompType::Remote as u8 {
            return Err(HalError::InvalidArgument(format!(
                "{} is not a remote component",
                rec.hdr.name()
            )));
        }
        Ok(rec)
    }

    /// Current component state.
    pub fn component_info(&self, comp: CompHandle) -> HalResult<ComponentInfo> {
        let rec = self.resolve(comp)?;
        Ok(ComponentInfo {
            name: rec.hdr.name().to_string(),
            id: rec.hdr.id,
            comp_type: CompType::from_u8(rec.comp_type).unwrap_or(CompType::User),
            state: CompState::from_u8(rec.state).unwrap_or(CompState::Initializing),
            pid: rec.pid,
            instantiable: rec.has_ctor != 0,
            last_update: rec.last_update,
            last_bound: rec.last_bound,
            last_unbound: rec.last_unbound,
        })
    }

    /// Instances created by a component, oldest first.
    pub fn instances_of(&self, comp: CompHandle) -> Vec<InstHandle> {
        self.owned_by(comp.id())
            .into_iter()
            .filter_map(|o| o.downcast())
            .collect()
    }

    /// The component that ultimately owns `obj`: itself if it is a component,
    /// its owner, or its owner's owner for objects owned by an instance.
    pub fn owning_component(&self, obj: impl Into<ObjectRef>) -> Option<CompHandle> {
        let mut cur = obj.into();
        for _ in 0..3 {
            self.resolve_ref(cur).ok()?;
            if let Some(comp) = cur.downcast() {
                return Some(comp);
            }
            let owner_id = self.header(cur.off).owner_id;
            cur = self.find_by_id(None, owner_id)?;
        }
        None
    }

    /// Pins owned by a component or any of its instances.
    pub fn count_pins(&self, comp: CompHandle) -> usize {
        self.count_kind(comp, ObjectKind::Pin)
    }

    /// Parameters owned by a component or any of its instances.
    pub fn count_params(&self, comp: CompHandle) -> usize {
        self.count_kind(comp, ObjectKind::Param)
    }

    fn count_kind(&self, comp: CompHandle, kind: ObjectKind) -> usize {
        let mut owners = vec![comp.id()];
        owners.extend(self.instances_of(comp).iter().map(Handle::id));
        self.objects(Some(kind))
            .into_iter()
            .filter(|o| owners.contains(&self.header(o.off).owner_id))
            .count()
    }

    /// Fail if deleting what `owners` own would stop partway.
    pub(crate) fn check_teardown(&self, owners: &[i32]) -> HalResult<()> {
        let running = self.master().threads_running();
        for obj in owners.iter().flat_map(|id| self.owned_by(*id)) {
            if let Some(vt) = obj.downcast::<VtableRecord>() {
                let rec = self.resolve(vt)?;
                if rec.refcount > 0 {
                    return Err(HalError::Busy {
                        name: rec.hdr.name().to_string(),
                        refs: rec.refcount,
                    });
                }
            } else if let Some(f) = obj.downcast::<FunctRecord>() {
                if running && self.resolve(f)?.users > 0 {
                    return Err(HalError::SchedulerRunning);
                }
            }
        }
        Ok(())
    }

    /// Delete every pin, parameter, function and vtable owned by `owner_id`.
    /// Returns how many objects were removed.
    pub(crate) fn delete_owned(&mut self, owner_id: i32) -> HalResult<usize> {
        let owned = self.owned_by(owner_id);
        let mut removed = 0;
        for obj in owned {
            match obj.kind {
                ObjectKind::Pin | ObjectKind::Param | ObjectKind::Funct | ObjectKind::Vtable => {
                    self.delete_object(obj)?;
                    removed += 1;
                }
                _ => {}
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use crate::test_support::new_hal;
    use crate::{FunctCallback, HalError};
    use hal::types::{CompState, CompType, HalType, ParamDir, PinDir};
    use std::sync::Arc;
    use std::sync::atomic::Ordering;

    #[test]
    fn local_component_lifecycle() {
        let (_dir, hal) = new_hal();
        let mut g = hal.lock();
        let comp = g.register_component("motion", CompType::Realtime).unwrap();
        assert_eq!(g.component_info(comp).unwrap().state, CompState::Initializing);
        g.component_ready(comp).unwrap();
        let info = g.component_info(comp).unwrap();
        assert_eq!(info.state, CompState::Ready);
        assert_eq!(info.pid, hal_shared_memory::platform::get_current_pid());
        assert!(g.bind_remote(comp).is_err());
    }

    #[test]
    fn remote_component_binding() {
        let (_dir, hal) = new_hal();
        let mut g = hal.lock();
        let comp = g.register_component("remote", CompType::Remote).unwrap();
        assert_eq!(g.component_info(comp).unwrap().state, CompState::Unbound);
        assert!(g.component_ready(comp).is_err());

        g.bind_remote(comp).unwrap();
        let bound = g.component_info(comp).unwrap();
        assert_eq!(bound.state, CompState::Bound);
        assert!(bound.last_bound > 0);

        g.touch_remote(comp).unwrap();
        g.component_ready(comp).unwrap();
        g.unbind_remote(comp).unwrap();
        let info = g.component_info(comp).unwrap();
        assert_eq!(info.state, CompState::Unbound);
        assert!(info.last_unbound >= info.last_bound);
    }

    #[test]
    fn unregister_removes_owned_objects() {
        let (_dir, hal) = new_hal();
        let mut g = hal.lock();
        let comp = g.register_component("io", CompType::User).unwrap();
        g.create_pin(comp, "io.in", HalType::Bit, PinDir::In).unwrap();
        g.create_param(comp, "io.scale", HalType::Float, ParamDir::Rw).unwrap();
        assert_eq!(g.count_pins(comp), 1);
        assert_eq!(g.count_params(comp), 1);

        g.unregister_component(comp).unwrap();
        assert!(g.find_by_name(None, "io.in").is_none());
        assert!(g.find_by_name(None, "io.scale").is_none());
        assert!(g.find_by_name(None, "io").is_none());
    }

    #[test]
    fn referenced_vtable_blocks_unregister_without_side_effects() {
        let (_dir, hal) = new_hal();
        let mut g = hal.lock();
        let comp = g.register_component("kins", CompType::Realtime).unwrap();
        let pin = g.create_pin(comp, "kins.pos", HalType::Float, PinDir::Out).unwrap();
        let vt = g.export_vtable("kins.vt", 1, comp, Arc::new(7u32)).unwrap();
        g.reference_vtable::<u32>("kins.vt", 1).unwrap();

        assert!(matches!(
            g.unregister_component(comp),
            Err(HalError::Busy { refs: 1, .. })
        ));
        assert!(g.is_live(comp));
        assert!(g.is_live(pin));
        assert!(g.is_live(vt));

        g.unreference_vtable(vt).unwrap();
        g.unregister_component(comp).unwrap();
        assert!(g.find_by_name(None, "kins.pos").is_none());
    }

    #[test]
    fn scheduled_function_blocks_unregister_while_running() {
        let (_dir, hal) = new_hal();
        let mut g = hal.lock();
        let comp = g.register_component("servo", CompType::Realtime).unwrap();
        let pin = g.create_pin(comp, "servo.cmd", HalType::S32, PinDir::In).unwrap();
        let f = g
            .export_funct(comp, "servo.update", FunctCallback::legacy(|_| {}), false, false)
            .unwrap();
        let t = g.create_thread("servo-thread", 1_000_000, 50, None).unwrap();
        g.add_funct_to_thread(f, t, -1).unwrap();

        g.master().threads_running.store(1, Ordering::Release);
        assert!(matches!(
            g.unregister_component(comp),
            Err(HalError::SchedulerRunning)
        ));
        assert!(g.is_live(pin) && g.is_live(f));

        g.master().threads_running.store(0, Ordering::Release);
        g.unregister_component(comp).unwrap();
        assert!(g.thread_functs(t).unwrap().is_empty());
    }

    #[test]
    fn load_lock_blocks_registration() {
        let (_dir, hal) = new_hal();
        let mut g = hal.lock();
        g.set_lock_level(crate::LockLevel::LOAD);
        assert!(matches!(
            g.register_component("late", CompType::User),
            Err(crate::HalError::Locked("load"))
        ));
    }
}
