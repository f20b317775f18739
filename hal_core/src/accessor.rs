//! Typed, lock-free value access for component code.
//!
//! A [`Pin`] accessor holds the offset of its pin's pointer-variable cell and
//! follows it on every access, so it transparently reads the dummy storage or
//! the linked signal's storage. Accessors never take the HAL lock and are
//! what thread functions use in the cycle path.
//!
//! Every accessor remembers the generation of the record it was taken from.
//! Once the object is deleted the generation moves on and the accessor goes
//! stale: [`get`](Pin::get) returns the zero value, [`set`](Pin::set) does
//! nothing, and the `try_` variants report `NotFound`. A delete racing with
//! an access in flight is not detected; deleting objects whose functions are
//! running is a configuration error.

use hal::types::{HalData, HalType, ObjectKind};
use hal_shared_memory::{ShmOff, ShmSegment};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::core::Hal;
use crate::error::{HalError, HalResult};
use crate::guard::HalGuard;
use crate::object::{
    Handle, ObjectHeader, ParamHandle, ParamRecord, PinHandle, Record, SigRecord, SignalHandle,
};
use crate::pin::{cell_off, signal_data_off};

fn check_type<T: HalData>(name: &str, found: HalType) -> HalResult<()> {
    if T::TYPE != found {
        return Err(HalError::TypeMismatch {
            name: name.to_string(),
            expected: found,
            found: T::TYPE,
        });
    }
    Ok(())
}

/// Generation of the record an accessor was taken from.
#[derive(Clone, Copy)]
struct Stamp {
    cell: ShmOff,
    generation: u32,
    id: i32,
    kind: ObjectKind,
}

impl Stamp {
    fn of<R: Record>(h: Handle<R>) -> Self {
        Self {
            cell: h.off.add(std::mem::offset_of!(ObjectHeader, generation)),
            generation: h.generation,
            id: h.id,
            kind: R::KIND,
        }
    }

    #[inline]
    fn holds(&self, seg: &ShmSegment) -> bool {
        seg.atomic_u32(self.cell)
            .is_some_and(|g| g.load(Ordering::Acquire) == self.generation)
    }

    fn stale(&self) -> HalError {
        HalError::NotFound(format!("{} #{} (deleted)", self.kind, self.id))
    }
}

/// Read/write access to a pin's current storage.
pub struct Pin<T: HalData> {
    seg: Arc<ShmSegment>,
    stamp: Stamp,
    cell: ShmOff,
    _ty: PhantomData<T>,
}

impl<T: HalData> Pin<T> {
    fn target(&self) -> Option<&AtomicU64> {
        if !self.stamp.holds(&self.seg) {
            return None;
        }
        let data = self.seg.atomic_u32(self.cell)?.load(Ordering::Acquire);
        self.seg.atomic_u64(ShmOff::new(data))
    }

    /// Whether the pin still exists.
    pub fn is_valid(&self) -> bool {
        self.stamp.holds(&self.seg)
    }

    /// Current value, zero once the pin is deleted.
    #[inline]
    pub fn get(&self) -> T {
        T::from_bits(self.target().map_or(0, |c| c.load(Ordering::Relaxed)))
    }

    /// Write the value. Ignored once the pin is deleted.
    #[inline]
    pub fn set(&self, value: T) {
        if let Some(c) = self.target() {
            c.store(value.to_bits(), Ordering::Relaxed);
        }
    }

    /// Current value, or `NotFound` once the pin is deleted.
    pub fn try_get(&self) -> HalResult<T> {
        let c = self.target().ok_or_else(|| self.stamp.stale())?;
        Ok(T::from_bits(c.load(Ordering::Relaxed)))
    }

    /// Write the value, or fail with `NotFound` once the pin is deleted.
    pub fn try_set(&self, value: T) -> HalResult<()> {
        let c = self.target().ok_or_else(|| self.stamp.stale())?;
        c.store(value.to_bits(), Ordering::Relaxed);
        Ok(())
    }
}

/// Read access to a signal's storage.
///
/// Writes go through [`HalGuard::set_signal`], which checks for a driving pin.
pub struct Signal<T: HalData> {
    seg: Arc<ShmSegment>,
    stamp: Stamp,
    data: ShmOff,
    _ty: PhantomData<T>,
}

impl<T: HalData> Signal<T> {
    fn target(&self) -> Option<&AtomicU64> {
        if !self.stamp.holds(&self.seg) {
            return None;
        }
        self.seg.atomic_u64(self.data)
    }

    /// Whether the signal still exists.
    pub fn is_valid(&self) -> bool {
        self.stamp.holds(&self.seg)
    }

    /// Current value, zero once the signal is deleted.
    #[inline]
    pub fn get(&self) -> T {
        T::from_bits(self.target().map_or(0, |c| c.load(Ordering::Relaxed)))
    }

    /// Current value, or `NotFound` once the signal is deleted.
    pub fn try_get(&self) -> HalResult<T> {
        let c = self.target().ok_or_else(|| self.stamp.stale())?;
        Ok(T::from_bits(c.load(Ordering::Relaxed)))
    }
}

/// Owner-side access to a parameter. Writes skip the read-only and lock
/// level checks of [`HalGuard::set_param`].
pub struct Param<T: HalData> {
    seg: Arc<ShmSegment>,
    stamp: Stamp,
    data: ShmOff,
    _ty: PhantomData<T>,
}

impl<T: HalData> Param<T> {
    fn target(&self) -> Option<&AtomicU64> {
        if !self.stamp.holds(&self.seg) {
            return None;
        }
        self.seg.atomic_u64(self.data)
    }

    /// Whether the parameter still exists.
    pub fn is_valid(&self) -> bool {
        self.stamp.holds(&self.seg)
    }

    /// Current value, zero once the parameter is deleted.
    #[inline]
    pub fn get(&self) -> T {
        T::from_bits(self.target().map_or(0, |c| c.load(Ordering::Relaxed)))
    }

    /// Write the value. Ignored once the parameter is deleted.
    #[inline]
    pub fn set(&self, value: T) {
        if let Some(c) = self.target() {
            c.store(value.to_bits(), Ordering::Relaxed);
        }
    }

    /// Write the value, or fail with `NotFound` once the parameter is deleted.
    pub fn try_set(&self, value: T) -> HalResult<()> {
        let c = self.target().ok_or_else(|| self.stamp.stale())?;
        c.store(value.to_bits(), Ordering::Relaxed);
        Ok(())
    }
}

macro_rules! impl_debug {
    ($($ty:ident),*) => {
        $(
            impl<T: HalData + fmt::Debug> fmt::Debug for $ty<T> {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    f.debug_tuple(stringify!($ty)).field(&self.get()).finish()
                }
            }
        )*
    };
}

impl_debug!(Pin, Signal, Param);

impl HalGuard<'_> {
    /// Typed accessor for a pin. Fails with `TypeMismatch` if `T` is not the
    /// pin's type.
    pub fn pin<T: HalData>(&self, pin: PinHandle) -> HalResult<Pin<T>> {
        let p = self.resolve(pin)?;
        check_type::<T>(p.hdr.name(), p.ty())?;
        Ok(Pin {
            seg: self.hal.seg.clone(),
            stamp: Stamp::of(pin),
            cell: cell_off(pin.off),
            _ty: PhantomData,
        })
    }

    /// Typed accessor for a signal.
    pub fn signal<T: HalData>(&self, sig: SignalHandle) -> HalResult<Signal<T>> {
        let s: &SigRecord = self.resolve(sig)?;
        check_type::<T>(s.hdr.name(), s.ty())?;
        Ok(Signal {
            seg: self.hal.seg.clone(),
            stamp: Stamp::of(sig),
            data: signal_data_off(sig.off),
            _ty: PhantomData,
        })
    }

    /// Typed owner-side accessor for a parameter.
    pub fn param<T: HalData>(&self, param: ParamHandle) -> HalResult<Param<T>> {
        let p: &ParamRecord = self.resolve(param)?;
        check_type::<T>(p.hdr.name(), p.ty())?;
        Ok(Param {
            seg: self.hal.seg.clone(),
            stamp: Stamp::of(param),
            data: param.off.add(std::mem::offset_of!(ParamRecord, data)),
            _ty: PhantomData,
        })
    }
}

impl Hal {
    /// Typed accessor for a pin, taking the lock for the type check.
    pub fn pin<T: HalData>(&self, pin: PinHandle) -> HalResult<Pin<T>> {
        self.lock().pin(pin)
    }

    /// Typed accessor for a signal.
    pub fn signal<T: HalData>(&self, sig: SignalHandle) -> HalResult<Signal<T>> {
        self.lock().signal(sig)
    }

    /// Typed owner-side accessor for a parameter.
    pub fn param<T: HalData>(&self, param: ParamHandle) -> HalResult<Param<T>> {
        self.lock().param(param)
    }
}

#[cfg(test)]
mod tests {
    use crate::HalError;
    use crate::test_support::new_hal;
    use hal::types::{CompType, HalType, HalValue, ParamDir, PinDir};

    #[test]
    fn pin_accessor_follows_link_changes() {
        let (_dir, hal) = new_hal();
        let (pin, sig) = {
            let mut g = hal.lock();
            let c = g.register_component("acc", CompType::User).unwrap();
            let pin = g.create_pin(c, "acc.out", HalType::S32, PinDir::Out).unwrap();
            let sig = g.create_signal("acc.sig", HalType::S32).unwrap();
            (pin, sig)
        };
        let out = hal.pin::<i32>(pin).unwrap();
        let seen = hal.signal::<i32>(sig).unwrap();

        out.set(-4);
        assert_eq!(seen.get(), 0);
        hal.lock().link_pin(pin, sig).unwrap();
        assert_eq!(seen.get(), -4);
        out.set(11);
        assert_eq!(seen.get(), 11);
        hal.lock().unlink_pin(pin).unwrap();
        out.set(12);
        assert_eq!(seen.get(), 11);
        assert_eq!(out.get(), 12);
    }

    #[test]
    fn accessors_go_stale_when_their_record_is_reused() {
        let (_dir, hal) = new_hal();
        let mut g = hal.lock();
        let c = g.register_component("re", CompType::User).unwrap();
        let a = g.create_pin(c, "re.a", HalType::U32, PinDir::Out).unwrap();
        let old = g.pin::<u32>(a).unwrap();
        old.set(3);
        assert!(old.is_valid());

        g.delete_pin(a).unwrap();
        let b = g.create_pin(c, "re.b", HalType::U32, PinDir::Out).unwrap();
        assert_eq!(b.offset(), a.offset());
        let new = g.pin::<u32>(b).unwrap();

        assert!(!old.is_valid());
        old.set(5);
        assert_eq!(new.get(), 0);
        assert_eq!(old.get(), 0);
        assert!(matches!(old.try_set(5), Err(HalError::NotFound(_))));
        assert!(matches!(old.try_get(), Err(HalError::NotFound(_))));
        new.try_set(8).unwrap();
        assert_eq!(new.try_get().unwrap(), 8);
    }

    #[test]
    fn deleted_signal_and_param_accessors_are_stale() {
        let (_dir, hal) = new_hal();
        let mut g = hal.lock();
        let c = g.register_component("st", CompType::User).unwrap();
        let sig = g.create_signal("st.sig", HalType::S32).unwrap();
        let p = g.create_param(c, "st.k", HalType::S32, ParamDir::Rw).unwrap();
        let seen = g.signal::<i32>(sig).unwrap();
        let own = g.param::<i32>(p).unwrap();
        g.set_signal(sig, HalValue::S32(4)).unwrap();
        assert_eq!(seen.try_get().unwrap(), 4);

        g.delete_signal(sig).unwrap();
        g.delete_param(p).unwrap();
        let reused = g.create_param(c, "st.k2", HalType::S32, ParamDir::Rw).unwrap();
        assert!(!seen.is_valid() && !own.is_valid());
        assert!(matches!(seen.try_get(), Err(HalError::NotFound(_))));
        own.set(9);
        assert!(own.try_set(9).is_err());
        assert_eq!(g.param_info(reused).unwrap().value, HalValue::S32(0));
    }

    #[test]
    fn accessor_type_is_checked() {
        let (_dir, hal) = new_hal();
        let mut g = hal.lock();
        let c = g.register_component("t", CompType::User).unwrap();
        let pin = g.create_pin(c, "t.b", HalType::Bit, PinDir::In).unwrap();
        assert!(matches!(g.pin::<f64>(pin), Err(HalError::TypeMismatch { .. })));
        assert!(g.pin::<bool>(pin).is_ok());
    }

    #[test]
    fn param_owner_writes_bypass_read_only() {
        let (_dir, hal) = new_hal();
        let mut g = hal.lock();
        let c = g.register_component("ro", CompType::User).unwrap();
        let p = g.create_param(c, "ro.status", HalType::U64, ParamDir::Ro).unwrap();
        let own = g.param::<u64>(p).unwrap();
        own.set(1 << 40);
        assert_eq!(g.param_info(p).unwrap().value, HalValue::U64(1 << 40));
        assert_eq!(format!("{own:?}"), "Param(1099511627776)");
    }
}
