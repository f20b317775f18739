//! Change detection for display and telemetry consumers.
//!
//! Float pins compare against their entry in the master epsilon table, all
//! other types compare exactly. Nothing here runs in a thread cycle.

use hal::consts::MAX_EPSILON;
use hal::types::{HalValue, PinFlags};

use crate::core::Hal;
use crate::error::{HalError, HalResult};
use crate::guard::HalGuard;
use crate::object::PinHandle;

fn check_index(index: usize) -> HalResult<()> {
    if index >= MAX_EPSILON {
        return Err(HalError::InvalidArgument(format!(
            "epsilon index {index} out of range (max {})",
            MAX_EPSILON - 1
        )));
    }
    Ok(())
}

/// Whether `current` differs from `last` by more than `epsilon`.
pub fn value_changed(last: &HalValue, current: &HalValue, epsilon: f64) -> bool {
    match (last, current) {
        (HalValue::Float(a), HalValue::Float(b)) => (a - b).abs() > epsilon,
        _ => last != current,
    }
}

impl HalGuard<'_> {
    /// Set an epsilon table entry.
    pub fn set_epsilon(&mut self, index: usize, value: f64) -> HalResult<()> {
        check_index(index)?;
        if !value.is_finite() || value < 0.0 {
            return Err(HalError::InvalidArgument(format!("epsilon {value}")));
        }
        self.master().epsilon[index] = value;
        Ok(())
    }

    /// Read an epsilon table entry.
    pub fn epsilon(&self, index: usize) -> HalResult<f64> {
        check_index(index)?;
        Ok(self.master().epsilon[index])
    }
}

impl Hal {
    /// Compare a pin against the last value a consumer saw.
    ///
    /// On a change `last` is updated and `true` returned. Pins flagged
    /// `DO_NOT_TRACK` never report a change.
    pub fn pin_changed(&self, pin: PinHandle, last: &mut HalValue) -> HalResult<bool> {
        let g = self.lock();
        let p = g.resolve(pin)?;
        if PinFlags::from_bits_truncate(p.flags).contains(PinFlags::DO_NOT_TRACK) {
            return Ok(false);
        }
        let current = g.pin_value(p);
        let epsilon = g.master().epsilon[p.eps_index as usize % MAX_EPSILON];
        if value_changed(last, &current, epsilon) {
            *last = current;
            return Ok(true);
        }
        Ok(false)
    }
}
