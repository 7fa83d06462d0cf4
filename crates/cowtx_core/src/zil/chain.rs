//! Per-group lists of pending log records.

use crate::types::{ObjectId, TxgId, TXG_CONCURRENT_STATES, TXG_SIZE};
use crate::zil::record::LogRecord;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use tracing::debug;

/// Records of one transaction group.
#[derive(Debug)]
struct ItxGroup {
    txg: TxgId,
    /// Records every commit must write, in append order.
    sync: Vec<LogRecord>,
    /// Records only a commit of their own object must write, per object
    /// in append order.
    by_object: BTreeMap<ObjectId, Vec<LogRecord>>,
}

impl ItxGroup {
    fn new(txg: TxgId) -> Self {
        Self {
            txg,
            sync: Vec::new(),
            by_object: BTreeMap::new(),
        }
    }

    fn len(&self) -> usize {
        self.sync.len() + self.by_object.values().map(Vec::len).sum::<usize>()
    }

    fn move_to_sync(&mut self, object: Option<ObjectId>) {
        match object {
            Some(object) => {
                if let Some(mut list) = self.by_object.remove(&object) {
                    self.sync.append(&mut list);
                }
            }
            None => {
                for (_, mut list) in std::mem::take(&mut self.by_object) {
                    self.sync.append(&mut list);
                }
            }
        }
    }
}

/// Ring of per-group record lists, one lock per slot.
///
/// Appenders only touch the slot of their transaction's group. Slots are
/// emptied by the commit writer (sync lists) or by [`LogChain::clean`]
/// once the group has synced.
#[derive(Debug)]
pub(crate) struct LogChain {
    slots: [Mutex<Option<ItxGroup>>; TXG_SIZE],
}

impl LogChain {
    pub(crate) fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| Mutex::new(None)),
        }
    }

    /// Appends `record` to the lists of `txg`.
    pub(crate) fn assign(&self, mut record: LogRecord, txg: TxgId) {
        record.set_txg(txg);
        let stale = {
            let mut slot = self.slots[txg.slot()].lock();
            let stale = match slot.as_ref() {
                Some(group) if group.txg != txg => slot.take(),
                _ => None,
            };
            let group = slot.get_or_insert_with(|| ItxGroup::new(txg));
            match record.body().object() {
                Some(object) if !record.is_sync() && record.tx_type().is_out_of_order() => {
                    group.by_object.entry(object).or_default().push(record);
                }
                _ => group.sync.push(record),
            }
            stale
        };
        if let Some(stale) = stale {
            debug!(
                target: "cowtx::zil",
                txg = stale.txg.as_u64(),
                records = stale.len(),
                "missed clean"
            );
        }
    }

    fn live_groups(&self, last_synced: TxgId) -> impl Iterator<Item = TxgId> {
        let first = last_synced.next().as_u64();
        (first..first + TXG_CONCURRENT_STATES).map(TxgId::new)
    }

    /// Moves the async records of `object` (of every object for `None`) to
    /// the sync lists so the next commit writes them.
    pub(crate) fn async_to_sync(&self, object: Option<ObjectId>, last_synced: TxgId) {
        for txg in self.live_groups(last_synced) {
            let mut slot = self.slots[txg.slot()].lock();
            if let Some(group) = slot.as_mut().filter(|g| g.txg == txg) {
                group.move_to_sync(object);
            }
        }
    }

    /// Drops the queued async records of `object`.
    pub(crate) fn remove_async(&self, object: ObjectId, last_synced: TxgId) -> usize {
        let mut removed = Vec::new();
        for txg in self.live_groups(last_synced) {
            let mut slot = self.slots[txg.slot()].lock();
            if let Some(group) = slot.as_mut().filter(|g| g.txg == txg) {
                if let Some(list) = group.by_object.remove(&object) {
                    removed.extend(list);
                }
            }
        }
        removed.len()
    }

    /// Takes every sync list of the unsynced groups, oldest group first.
    pub(crate) fn take_commit_list(&self, last_synced: TxgId) -> Vec<LogRecord> {
        let mut list = Vec::new();
        for txg in self.live_groups(last_synced) {
            let mut slot = self.slots[txg.slot()].lock();
            if let Some(group) = slot.as_mut().filter(|g| g.txg == txg) {
                list.append(&mut group.sync);
            }
        }
        list
    }

    /// Destroys the records of `synced` now that the group is stable.
    pub(crate) fn clean(&self, synced: TxgId) -> usize {
        let group = {
            let mut slot = self.slots[synced.slot()].lock();
            match slot.as_ref() {
                Some(group) if group.txg <= synced => slot.take(),
                _ => None,
            }
        };
        group.map_or(0, |group| group.len())
    }

    /// Number of records waiting in the chain.
    pub(crate) fn len(&self) -> usize {
        self.slots
            .iter()
            .map(|slot| slot.lock().as_ref().map_or(0, ItxGroup::len))
            .sum()
    }

    /// Records of `object` still on async lists.
    pub(crate) fn async_len(&self, object: ObjectId) -> usize {
        self.slots
            .iter()
            .map(|slot| {
                slot.lock()
                    .as_ref()
                    .and_then(|g| g.by_object.get(&object))
                    .map_or(0, Vec::len)
            })
            .sum()
    }
}
