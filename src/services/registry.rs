//! Last-committed occupancy per slot
//!
//! Entries only change through `commit`, which the sensor loop calls after
//! the shared record accepted the value (or when seeding from it). A slot
//! with no entry always counts as a transition.

use crate::domain::types::SlotId;
use rustc_hash::FxHashMap;

#[derive(Debug, Default)]
pub struct SlotRegistry {
    committed: FxHashMap<SlotId, bool>,
}

impl SlotRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when `available` differs from the committed value or none exists
    #[inline]
    pub fn transitioned(&self, slot: &SlotId, available: bool) -> bool {
        self.committed.get(slot) != Some(&available)
    }

    #[inline]
    pub fn commit(&mut self, slot: &SlotId, available: bool) {
        self.committed.insert(slot.clone(), available);
    }

    #[inline]
    pub fn get(&self, slot: &SlotId) -> Option<bool> {
        self.committed.get(slot).copied()
    }

    /// Slots committed as available
    pub fn available_count(&self) -> usize {
        self.committed.values().filter(|v| **v).count()
    }

    pub fn len(&self) -> usize {
        self.committed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.committed.is_empty()
    }
}
