//! Per-object assignment state.
//!
//! Each object touched by a transaction gets an [`ObjectSlot`] in the
//! [`ObjectTable`]. A slot records the group the object is currently assigned
//! to and how many holds keep it there. Holds are [`ObjectHold`] guards:
//! dropping the last one clears the assignment and wakes anyone waiting for
//! the object.
//!
//! ## Invariant
//!
//! An object is assigned to at most one group at a time. A transaction for
//! group `g` cannot take a hold while the object is still assigned to `g - 1`;
//! it has to retry after that group's holder commits.

use crate::types::{ObjectId, TxgId};
use parking_lot::{Condvar, Mutex, RwLock};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Default)]
struct SlotState {
    assigned: TxgId,
    holds: u64,
}

/// Assignment state of one object.
pub struct ObjectSlot {
    object: ObjectId,
    state: Mutex<SlotState>,
    released: Condvar,
}

impl ObjectSlot {
    fn new(object: ObjectId) -> Self {
        Self {
            object,
            state: Mutex::new(SlotState::default()),
            released: Condvar::new(),
        }
    }

    /// The object this slot belongs to.
    #[must_use]
    pub fn object(&self) -> ObjectId {
        self.object
    }

    /// Group the object is assigned to, if any.
    #[must_use]
    pub fn assigned_txg(&self) -> Option<TxgId> {
        let state = self.state.lock();
        (state.assigned != TxgId::NONE).then_some(state.assigned)
    }

    /// Number of holds keeping the object assigned.
    #[must_use]
    pub fn holds(&self) -> u64 {
        self.state.lock().holds
    }

    /// Assigns the object to `txg` and takes a hold on it.
    ///
    /// Fails with the group the object is still assigned to when that group
    /// is not `txg`.
    pub(crate) fn try_hold(self: &Arc<Self>, txg: TxgId) -> Result<ObjectHold, TxgId> {
        let mut state = self.state.lock();
        if state.assigned != TxgId::NONE && state.assigned != txg {
            return Err(state.assigned);
        }
        state.assigned = txg;
        state.holds += 1;
        Ok(ObjectHold {
            slot: Arc::clone(self),
            txg,
        })
    }

    /// Blocks while the object is assigned to `txg`.
    pub fn wait_released(&self, txg: TxgId) {
        let mut state = self.state.lock();
        while state.assigned == txg && state.holds > 0 {
            self.released.wait(&mut state);
        }
    }

    fn release(&self) {
        let mut state = self.state.lock();
        debug_assert!(state.holds > 0, "release of unheld {}", self.object);
        state.holds = state.holds.saturating_sub(1);
        if state.holds == 0 {
            state.assigned = TxgId::NONE;
            self.released.notify_all();
        }
    }
}

impl fmt::Debug for ObjectSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ObjectSlot")
            .field("object", &self.object)
            .field("assigned", &state.assigned)
            .field("holds", &state.holds)
            .finish()
    }
}

/// A hold keeping an object assigned to a group. Released on drop.
#[derive(Debug)]
pub struct ObjectHold {
    slot: Arc<ObjectSlot>,
    txg: TxgId,
}

impl ObjectHold {
    /// The held object.
    #[must_use]
    pub fn object(&self) -> ObjectId {
        self.slot.object
    }

    /// The group the object is held for.
    #[must_use]
    pub fn txg(&self) -> TxgId {
        self.txg
    }
}

impl Drop for ObjectHold {
    fn drop(&mut self) {
        self.slot.release();
    }
}

/// Arena of object slots keyed by object id.
#[derive(Debug, Default)]
pub struct ObjectTable {
    slots: RwLock<HashMap<ObjectId, Arc<ObjectSlot>>>,
}

impl ObjectTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the slot for `object`, creating it on first use.
    pub fn slot(&self, object: ObjectId) -> Arc<ObjectSlot> {
        if let Some(slot) = self.slots.read().get(&object) {
            return Arc::clone(slot);
        }
        let mut slots = self.slots.write();
        Arc::clone(
            slots
                .entry(object)
                .or_insert_with(|| Arc::new(ObjectSlot::new(object))),
        )
    }

    /// Returns the slot for `object` if one exists.
    #[must_use]
    pub fn get(&self, object: ObjectId) -> Option<Arc<ObjectSlot>> {
        self.slots.read().get(&object).cloned()
    }

    /// Number of slots in the table.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.read().len()
    }

    /// Returns true if the table has no slots.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.read().is_empty()
    }

    /// Drops slots nobody else references. Returns how many were removed.
    ///
    /// Lookups clone the `Arc` under the read lock, so a slot whose only
    /// reference is the table cannot be handed out while the write lock is held.
    pub fn evict_idle(&self) -> usize {
        let mut slots = self.slots.write();
        let before = slots.len();
        slots.retain(|_, slot| Arc::strong_count(slot) > 1 || slot.holds() > 0);
        before - slots.len()
    }
}
