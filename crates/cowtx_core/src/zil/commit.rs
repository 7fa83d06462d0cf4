//! Commit waiters.

use crate::types::{LogSeq, TxgId};
use parking_lot::{Condvar, Mutex};

/// Result of [`crate::IntentLog::commit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// Records were written to the log device; everything up to `through`
    /// is durable.
    Durable {
        /// Highest sequence number written by the commit.
        through: LogSeq,
    },
    /// Nothing needed writing: every record covered by the commit was
    /// already in a stable log block or in a synced group.
    AlreadyStable,
    /// The log could not be used and the commit waited for the group to sync.
    SyncedByTxg,
    /// Synchronous semantics are disabled.
    Skipped,
}

#[derive(Debug)]
enum WaiterState {
    Pending,
    Done(CommitOutcome),
    Failed,
}

/// A caller blocked in commit, parked in the chain as a commit marker.
///
/// The writer that reaches the marker completes it once the log block
/// holding everything before it is durable. A marker that is cleaned
/// because its group synced completes as [`CommitOutcome::AlreadyStable`].
#[derive(Debug)]
pub struct CommitWaiter {
    txg: TxgId,
    state: Mutex<WaiterState>,
    done: Condvar,
}

impl CommitWaiter {
    pub(crate) fn new(txg: TxgId) -> Self {
        Self {
            txg,
            state: Mutex::new(WaiterState::Pending),
            done: Condvar::new(),
        }
    }

    /// Group the marker was assigned to.
    #[must_use]
    pub fn txg(&self) -> TxgId {
        self.txg
    }

    /// Whether a writer or a clean has completed the waiter.
    #[must_use]
    pub fn is_done(&self) -> bool {
        !matches!(*self.state.lock(), WaiterState::Pending)
    }

    pub(crate) fn complete(&self, outcome: CommitOutcome) {
        self.set(WaiterState::Done(outcome));
    }

    pub(crate) fn complete_synced(&self) {
        self.set(WaiterState::Done(CommitOutcome::AlreadyStable));
    }

    pub(crate) fn fail(&self) {
        self.set(WaiterState::Failed);
    }

    fn set(&self, new: WaiterState) {
        let mut state = self.state.lock();
        if matches!(*state, WaiterState::Pending) {
            *state = new;
            self.done.notify_all();
        }
    }

    /// Blocks until completed. `None` means the log write failed.
    pub(crate) fn wait(&self) -> Option<CommitOutcome> {
        let mut state = self.state.lock();
        loop {
            match *state {
                WaiterState::Pending => self.done.wait(&mut state),
                WaiterState::Done(outcome) => return Some(outcome),
                WaiterState::Failed => return None,
            }
        }
    }
}
