//! Pins and pin/signal linking.
//!
//! A pin's `data_ptr` cell plays the part of the owning component's pointer
//! variable: it holds the offset of the storage the component reads and
//! writes. Unlinked, that is the pin's own dummy cell; linked, the signal's
//! data cell. The component's accessor always goes through the cell and never
//! knows which storage it is using.

use hal::consts::MAX_EPSILON;
use hal::types::{HalType, HalValue, ObjectKind, PinDir, PinFlags};
use hal_shared_memory::ShmOff;
use serde::Serialize;
use std::mem::offset_of;
use std::sync::atomic::Ordering;
use tracing::debug;

use crate::error::{HalError, HalResult};
use crate::guard::HalGuard;
use crate::master::LockLevel;
use crate::object::{Handle, ObjectRef, PinHandle, PinRecord, SigRecord, SignalHandle};

/// Snapshot of a pin.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PinInfo {
    /// Pin name
    pub name: String,
    /// Unique id
    pub id: i32,
    /// Owning component or instance id
    pub owner_id: i32,
    /// Data type
    pub ty: HalType,
    /// Direction
    pub dir: PinDir,
    /// Linked signal name
    pub signal: Option<String>,
    /// Current value, from whichever storage is active
    pub value: HalValue,
    /// Epsilon table index used for change detection
    pub eps_index: u8,
    /// Change tracking disabled
    pub do_not_track: bool,
}

impl PinRecord {
    pub(crate) fn ty(&self) -> HalType {
        HalType::from_u8(self.ty).unwrap_or(HalType::Bit)
    }

    pub(crate) fn dir(&self) -> PinDir {
        PinDir::from_u8(self.dir).unwrap_or(PinDir::In)
    }
}

/// Offset of a pin's dummy cell.
pub(crate) fn dummy_off(pin: ShmOff) -> ShmOff {
    pin.add(offset_of!(PinRecord, dummy))
}

/// Offset of a pin's pointer-variable cell.
pub(crate) fn cell_off(pin: ShmOff) -> ShmOff {
    pin.add(offset_of!(PinRecord, data_ptr))
}

/// Offset of a signal's data cell.
pub(crate) fn signal_data_off(sig: ShmOff) -> ShmOff {
    sig.add(offset_of!(SigRecord, data))
}

impl HalGuard<'_> {
    /// Create a pin owned by a component or instance.
    ///
    /// The pin starts unlinked with a zero value in its dummy storage.
    pub fn create_pin(
        &mut self,
        owner: impl Into<ObjectRef>,
        name: &str,
        ty: HalType,
        dir: PinDir,
    ) -> HalResult<PinHandle> {
        self.master().check_unlocked(LockLevel::LOAD, "load")?;
        let owner_id = self.owner_id(owner.into())?;
        let (h, rec) = self.create_object::<PinRecord>(name, owner_id)?;
        rec.ty = ty as u8;
        rec.dir = dir as u8;
        rec.signal = ShmOff::NULL;
        rec.dummy.store(0, Ordering::Relaxed);
        rec.data_ptr.store(dummy_off(h.off).get(), Ordering::Release);
        debug!("Created pin {} ({} {:?})", name, ty, dir);
        Ok(h)
    }

    /// Owner must be a live component or instance.
    pub(crate) fn owner_id(&self, owner: ObjectRef) -> HalResult<i32> {
        if !matches!(owner.kind, ObjectKind::Component | ObjectKind::Instance) {
            return Err(HalError::InvalidArgument(format!(
                "{} #{} cannot own objects",
                owner.kind, owner.id
            )));
        }
        Ok(self.resolve_ref(owner)?.id)
    }

    /// Delete a pin, unlinking it first.
    pub fn delete_pin(&mut self, pin: PinHandle) -> HalResult<()> {
        let rec = self.resolve(pin)?;
        if !rec.signal.is_null() {
            self.unlink_unchecked(pin)?;
        }
        self.destroy_object(pin)
    }

    /// Link a pin to a signal of the same type.
    ///
    /// Linking to the signal it is already on is a no-op. An OUT pin cannot
    /// join a signal that already has a writer or bidirectional pin, and an
    /// IO pin cannot join one that has a writer.
    pub fn link_pin(&mut self, pin: PinHandle, sig: SignalHandle) -> HalResult<()> {
        self.master().check_unlocked(LockLevel::CONFIG, "config")?;
        let p = self.resolve(pin)?;
        let s = self.resolve(sig)?;

        if p.signal == sig.off && p.signal_gen == sig.generation {
            return Ok(());
        }
        if !p.signal.is_null() {
            let current = self.name_at(p.signal);
            return Err(HalError::AlreadyLinked {
                pin: p.hdr.name().to_string(),
                signal: current,
            });
        }
        if p.ty != s.ty {
            return Err(HalError::TypeMismatch {
                name: p.hdr.name().to_string(),
                expected: p.ty(),
                found: HalType::from_u8(s.ty).unwrap_or(HalType::Bit),
            });
        }
        let conflict = match p.dir() {
            PinDir::Out => s.writers > 0 || s.bidirs > 0,
            PinDir::Io => s.writers > 0,
            PinDir::In => false,
        };
        if conflict {
            return Err(HalError::WriterConflict {
                signal: s.hdr.name().to_string(),
                pin: p.hdr.name().to_string(),
            });
        }

        // First driver of a signal hands over its current value
        if p.dir() != PinDir::In && s.writers == 0 && s.bidirs == 0 {
            s.data
                .store(p.dummy.load(Ordering::Relaxed), Ordering::Relaxed);
        }
        match p.dir() {
            PinDir::In => s.readers += 1,
            PinDir::Out => s.writers += 1,
            PinDir::Io => s.bidirs += 1,
        }
        p.signal = sig.off;
        p.signal_gen = sig.generation;
        p.data_ptr
            .store(signal_data_off(sig.off).get(), Ordering::Release);

        debug!("Linked pin {} to signal {}", p.hdr.name(), s.hdr.name());
        Ok(())
    }

    /// Unlink a pin. It keeps the signal's current value in its dummy storage.
    ///
    /// Unlinking a pin that is not linked is a no-op.
    pub fn unlink_pin(&mut self, pin: PinHandle) -> HalResult<()> {
        self.master().check_unlocked(LockLevel::CONFIG, "config")?;
        self.unlink_unchecked(pin)
    }

    /// Unlink without the lock-level check, for pin and signal deletion.
    pub(crate) fn unlink_unchecked(&mut self, pin: PinHandle) -> HalResult<()> {
        let p = self.resolve(pin)?;
        if p.signal.is_null() {
            return Ok(());
        }
        // SAFETY: a linked pin's signal stays live until every pin is unlinked.
        let s = unsafe { self.at::<SigRecord>(p.signal) };

        p.dummy
            .store(s.data.load(Ordering::Relaxed), Ordering::Relaxed);
        p.data_ptr.store(dummy_off(pin.off).get(), Ordering::Release);
        match p.dir() {
            PinDir::In => s.readers = s.readers.saturating_sub(1),
            PinDir::Out => s.writers = s.writers.saturating_sub(1),
            PinDir::Io => s.bidirs = s.bidirs.saturating_sub(1),
        }
        p.signal = ShmOff::NULL;
        p.signal_gen = 0;

        debug!("Unlinked pin {} from signal {}", p.hdr.name(), s.hdr.name());
        Ok(())
    }

    /// Signal a pin is linked to.
    pub fn pin_signal(&self, pin: PinHandle) -> HalResult<Option<SignalHandle>> {
        let p = self.resolve(pin)?;
        if p.signal.is_null() {
            return Ok(None);
        }
        let hdr = self.header(p.signal);
        Ok(Some(Handle::new(p.signal, p.signal_gen, hdr.id)))
    }

    /// Pins linked to a signal, in creation order.
    pub fn pins_of_signal(&self, sig: SignalHandle) -> HalResult<Vec<PinHandle>> {
        self.resolve(sig)?;
        Ok(self
            .objects(Some(ObjectKind::Pin))
            .into_iter()
            .filter_map(|o| o.downcast::<PinRecord>())
            .filter(|h| {
                // SAFETY: just listed as a live pin.
                let p = unsafe { self.at::<PinRecord>(h.off) };
                p.signal == sig.off && p.signal_gen == sig.generation
            })
            .collect())
    }

    /// Set a pin's change-detection flags.
    pub fn set_pin_flags(&mut self, pin: PinHandle, flags: PinFlags) -> HalResult<()> {
        self.resolve(pin)?.flags = flags.bits();
        Ok(())
    }

    /// Select the epsilon table entry used for a float pin.
    pub fn set_pin_epsilon(&mut self, pin: PinHandle, index: usize) -> HalResult<()> {
        if index >= MAX_EPSILON {
            return Err(HalError::InvalidArgument(format!(
                "epsilon index {index} out of range (max {})",
                MAX_EPSILON - 1
            )));
        }
        self.resolve(pin)?.eps_index = index as u8;
        Ok(())
    }

    /// Current value of the pin through its pointer-variable cell.
    pub(crate) fn pin_value(&self, p: &PinRecord) -> HalValue {
        let bits = self
            .seg()
            .atomic_u64(ShmOff::new(p.data_ptr.load(Ordering::Acquire)))
            .map(|cell| cell.load(Ordering::Relaxed))
            .unwrap_or(0);
        HalValue::from_bits(p.ty(), bits)
    }

    /// Snapshot of a pin.
    pub fn pin_info(&self, pin: PinHandle) -> HalResult<PinInfo> {
        let p = self.resolve(pin)?;
        Ok(PinInfo {
            name: p.hdr.name().to_string(),
            id: p.hdr.id,
            owner_id: p.hdr.owner_id,
            ty: p.ty(),
            dir: p.dir(),
            signal: (!p.signal.is_null()).then(|| self.name_at(p.signal)),
            value: self.pin_value(p),
            eps_index: p.eps_index,
            do_not_track: PinFlags::from_bits_truncate(p.flags).contains(PinFlags::DO_NOT_TRACK),
        })
    }

    pub(crate) fn name_at(&self, off: ShmOff) -> String {
        self.header(off).name().to_string()
    }
}
