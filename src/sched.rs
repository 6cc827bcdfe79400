//! Pack/unpack handle tables.
//!
//! Two tables exist per exchanger, one for packs ("iwrite") and one for
//! unpacks ("iread"), each holding `NNEIGHBORS_PER_DIM x max(field_count)`
//! slots. A host-backed handle is only a record: the work it stands for runs
//! inline in the call that awaits it, which keeps host progress cooperative
//! and deterministically ordered. A device-backed handle is armed after its
//! work has been enqueued on the field's stream, and the await synchronizes
//! that stream.
//!
//! Tables persist across calls and widen monotonically; individual slots are
//! overwritten each call.

use crate::error::HaloError;
use crate::topology::{Side, NNEIGHBORS_PER_DIM};

#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
enum HandleState {
    #[default]
    Unset,
    Armed,
    Complete,
}

/// One table of deferred pack or unpack handles.
pub struct HandleTable {
    what: &'static str,
    slots: Vec<[HandleState; NNEIGHBORS_PER_DIM]>,
}

impl HandleTable {
    /// An empty table labelled for error messages ("pack" or "unpack").
    pub fn new(what: &'static str) -> Self {
        Self {
            what,
            slots: Vec::new(),
        }
    }

    /// Grow to cover `nfields` slots; existing entries are untouched.
    pub fn widen(&mut self, nfields: usize) {
        if self.slots.len() < nfields {
            self.slots.resize(nfields, Default::default());
        }
    }

    /// Number of fields currently covered.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Arm the handle for (field `i`, `side`). Re-arming a slot whose
    /// previous work was awaited is the normal per-call reuse; arming an
    /// already-armed slot means a wait was skipped and is an error.
    pub fn arm(&mut self, side: Side, dim: usize, i: usize) -> Result<(), HaloError> {
        let s = &mut self.slots[i][side.index()];
        if *s == HandleState::Armed {
            return Err(HaloError::HandleAlreadyArmed {
                what: self.what,
                side,
                dim,
                position: i + 1,
            });
        }
        *s = HandleState::Armed;
        Ok(())
    }

    /// Whether (field `i`, `side`) is currently armed.
    pub fn is_armed(&self, side: Side, i: usize) -> bool {
        self.slots
            .get(i)
            .map(|s| s[side.index()] == HandleState::Armed)
            .unwrap_or(false)
    }

    /// Transition (field `i`, `side`) from armed to complete, returning an
    /// error if it was never armed. The caller performs (or synchronizes)
    /// the actual work.
    pub fn complete(&mut self, side: Side, dim: usize, i: usize) -> Result<(), HaloError> {
        let s = &mut self.slots[i][side.index()];
        if *s != HandleState::Armed {
            return Err(HaloError::HandleNotArmed {
                what: self.what,
                side,
                dim,
                position: i + 1,
            });
        }
        *s = HandleState::Complete;
        Ok(())
    }

    /// Drop all slots.
    pub fn free(&mut self) {
        self.slots.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn widen_is_monotonic() {
        let mut t = HandleTable::new("pack");
        t.widen(3);
        t.widen(1);
        assert_eq!(t.capacity(), 3);
    }

    #[test]
    fn arm_complete_cycle() {
        let mut t = HandleTable::new("pack");
        t.widen(2);
        t.arm(Side::Low, 0, 1).unwrap();
        assert!(t.is_armed(Side::Low, 1));
        assert!(!t.is_armed(Side::High, 1));
        t.complete(Side::Low, 0, 1).unwrap();
        assert!(!t.is_armed(Side::Low, 1));
        // Reuse on a later call.
        t.arm(Side::Low, 1, 1).unwrap();
    }

    #[test]
    fn double_arm_is_an_error() {
        let mut t = HandleTable::new("unpack");
        t.widen(1);
        t.arm(Side::High, 2, 0).unwrap();
        let err = t.arm(Side::High, 2, 0).unwrap_err();
        assert!(matches!(
            err,
            HaloError::HandleAlreadyArmed {
                what: "unpack",
                side: Side::High,
                dim: 2,
                position: 1,
            }
        ));
    }

    #[test]
    fn wait_without_arm_is_an_error() {
        let mut t = HandleTable::new("pack");
        t.widen(1);
        let err = t.complete(Side::Low, 0, 0).unwrap_err();
        assert!(matches!(err, HaloError::HandleNotArmed { .. }));
    }
}
