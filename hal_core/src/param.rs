//! Parameters: typed, owned values that are never linked.

use hal::types::{HalType, HalValue, ParamDir};
use serde::Serialize;
use std::sync::atomic::Ordering;
use tracing::debug;

use crate::error::{HalError, HalResult};
use crate::guard::HalGuard;
use crate::master::LockLevel;
use crate::object::{ObjectRef, ParamHandle, ParamRecord};

/// Snapshot of a parameter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParamInfo {
    /// Parameter name
    pub name: String,
    /// Unique id
    pub id: i32,
    /// Owning component or instance id
    pub owner_id: i32,
    /// Data type
    pub ty: HalType,
    /// Access mode
    pub dir: ParamDir,
    /// Current value
    pub value: HalValue,
}

impl ParamRecord {
    pub(crate) fn ty(&self) -> HalType {
        HalType::from_u8(self.ty).unwrap_or(HalType::Bit)
    }

    pub(crate) fn dir(&self) -> ParamDir {
        ParamDir::from_u8(self.dir).unwrap_or(ParamDir::Ro)
    }

    pub(crate) fn value(&self) -> HalValue {
        HalValue::from_bits(self.ty(), self.data.load(Ordering::Relaxed))
    }
}

impl HalGuard<'_> {
    /// Create a parameter owned by a component or instance.
    pub fn create_param(
        &mut self,
        owner: impl Into<ObjectRef>,
        name: &str,
        ty: HalType,
        dir: ParamDir,
    ) -> HalResult<ParamHandle> {
        self.master().check_unlocked(LockLevel::LOAD, "load")?;
        let owner_id = self.owner_id(owner.into())?;
        let (h, rec) = self.create_object::<ParamRecord>(name, owner_id)?;
        rec.ty = ty as u8;
        rec.dir = dir as u8;
        rec.data.store(ty.zero().to_bits(), Ordering::Relaxed);
        debug!("Created param {} ({} {:?})", name, ty, dir);
        Ok(h)
    }

    /// Delete a parameter.
    pub fn delete_param(&mut self, param: ParamHandle) -> HalResult<()> {
        self.destroy_object(param)
    }

    /// Set a parameter from outside its owner.
    ///
    /// Read-only parameters are refused, as is any write while the
    /// `PARAMS` lock level is set. Owners write through
    /// [`Param`](crate::Param) instead.
    pub fn set_param(&mut self, param: ParamHandle, value: HalValue) -> HalResult<()> {
        self.master().check_unlocked(LockLevel::PARAMS, "params")?;
        let p = self.resolve(param)?;
        if p.dir() == ParamDir::Ro {
            return Err(HalError::ReadOnly(p.hdr.name().to_string()));
        }
        if value.hal_type() != p.ty() {
            return Err(HalError::TypeMismatch {
                name: p.hdr.name().to_string(),
                expected: p.ty(),
                found: value.hal_type(),
            });
        }
        p.data.store(value.to_bits(), Ordering::Relaxed);
        Ok(())
    }

    /// Snapshot of a parameter.
    pub fn param_info(&self, param: ParamHandle) -> HalResult<ParamInfo> {
        let p = self.resolve(param)?;
        Ok(ParamInfo {
            name: p.hdr.name().to_string(),
            id: p.hdr.id,
            owner_id: p.hdr.owner_id,
            ty: p.ty(),
            dir: p.dir(),
            value: p.value(),
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::test_support::new_hal;
    use crate::{HalError, LockLevel};
    use hal::types::{CompType, HalType, HalValue, ParamDir};

    #[test]
    fn write_rules() {
        let (_dir, hal) = new_hal();
        let mut g = hal.lock();
        let c = g.register_component("axis", CompType::Realtime).unwrap();
        let gain = g.create_param(c, "axis.gain", HalType::Float, ParamDir::Rw).unwrap();
        let fault = g.create_param(c, "axis.fault", HalType::Bit, ParamDir::Ro).unwrap();

        g.set_param(gain, HalValue::Float(2.5)).unwrap();
        assert_eq!(g.param_info(gain).unwrap().value, HalValue::Float(2.5));
        assert!(matches!(g.set_param(fault, HalValue::Bit(true)), Err(HalError::ReadOnly(_))));
        assert!(matches!(
            g.set_param(gain, HalValue::S32(2)),
            Err(HalError::TypeMismatch { .. })
        ));

        g.set_lock_level(LockLevel::PARAMS);
        assert!(matches!(
            g.set_param(gain, HalValue::Float(1.0)),
            Err(HalError::Locked("params"))
        ));
        assert_eq!(g.param_info(gain).unwrap().value, HalValue::Float(2.5));
    }

    #[test]
    fn delete_param() {
        let (_dir, hal) = new_hal();
        let mut g = hal.lock();
        let c = g.register_component("p", CompType::User).unwrap();
        let p = g.create_param(c, "p.x", HalType::S32, ParamDir::Rw).unwrap();
        g.delete_param(p).unwrap();
        assert!(g.find_by_name(None, "p.x").is_none());
        assert!(matches!(g.param_info(p), Err(HalError::NotFound(_))));
    }
}
