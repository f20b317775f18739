//! Signals: shared value cells that pins link to.

use hal::types::{HalType, HalValue};
use serde::Serialize;
use std::sync::atomic::Ordering;
use tracing::{debug, info};

use crate::error::{HalError, HalResult};
use crate::guard::HalGuard;
use crate::master::LockLevel;
use crate::object::{SigRecord, SignalHandle};

/// Snapshot of a signal.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignalInfo {
    /// Signal name
    pub name: String,
    /// Unique id
    pub id: i32,
    /// Data type
    pub ty: HalType,
    /// Current value
    pub value: HalValue,
    /// Linked IN pins
    pub readers: u32,
    /// Linked OUT pins (0 or 1)
    pub writers: u32,
    /// Linked IO pins
    pub bidirs: u32,
}

impl SigRecord {
    pub(crate) fn ty(&self) -> HalType {
        HalType::from_u8(self.ty).unwrap_or(HalType::Bit)
    }

    pub(crate) fn value(&self) -> HalValue {
        HalValue::from_bits(self.ty(), self.data.load(Ordering::Relaxed))
    }
}

impl HalGuard<'_> {
    /// Create an unowned signal with a zero value.
    pub fn create_signal(&mut self, name: &str, ty: HalType) -> HalResult<SignalHandle> {
        self.master().check_unlocked(LockLevel::CONFIG, "config")?;
        let (h, rec) = self.create_object::<SigRecord>(name, 0)?;
        rec.ty = ty as u8;
        rec.data.store(ty.zero().to_bits(), Ordering::Relaxed);
        debug!("Created signal {} ({})", name, ty);
        Ok(h)
    }

    /// Delete a signal. Every linked pin is unlinked first and keeps the
    /// signal's last value.
    pub fn delete_signal(&mut self, sig: SignalHandle) -> HalResult<()> {
        self.master().check_unlocked(LockLevel::CONFIG, "config")?;
        let name = self.resolve(sig)?.hdr.name().to_string();
        let pins = self.pins_of_signal(sig)?;
        for pin in &pins {
            self.unlink_unchecked(*pin)?;
        }
        self.destroy_object(sig)?;
        info!("Deleted signal {} ({} pins unlinked)", name, pins.len());
        Ok(())
    }

    /// Write a signal's value directly.
    ///
    /// Refused while an OUT pin drives the signal.
    pub fn set_signal(&mut self, sig: SignalHandle, value: HalValue) -> HalResult<()> {
        let s = self.resolve(sig)?;
        if s.writers > 0 {
            return Err(HalError::WriterConflict {
                signal: s.hdr.name().to_string(),
                pin: "<set>".to_string(),
            });
        }
        if value.hal_type() != s.ty() {
            return Err(HalError::TypeMismatch {
                name: s.hdr.name().to_string(),
                expected: s.ty(),
                found: value.hal_type(),
            });
        }
        s.data.store(value.to_bits(), Ordering::Relaxed);
        Ok(())
    }

    /// Snapshot of a signal.
    pub fn signal_info(&self, sig: SignalHandle) -> HalResult<SignalInfo> {
        let s = self.resolve(sig)?;
        Ok(SignalInfo {
            name: s.hdr.name().to_string(),
            id: s.hdr.id,
            ty: s.ty(),
            value: s.value(),
            readers: s.readers,
            writers: s.writers,
            bidirs: s.bidirs,
        })
    }
}
