//! Transaction manager.

use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::object::{ObjectStore, ObjectTable};
use crate::pool::{PoolHealth, SpaceAdmission, TxgScheduler};
use crate::stats::TxStats;
use crate::transaction::state::{AssignMode, Transaction};
use crate::types::{TxId, TxgId};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Everything a transaction needs from its pool.
pub(crate) struct TxContext {
    pub(crate) config: Config,
    pub(crate) store: Arc<dyn ObjectStore>,
    pub(crate) txgs: Arc<dyn TxgScheduler>,
    pub(crate) admission: Arc<dyn SpaceAdmission>,
    pub(crate) health: Arc<dyn PoolHealth>,
    pub(crate) objects: ObjectTable,
    pub(crate) stats: TxStats,
}

/// Creates transactions and moves them through assignment, commit and abort.
///
/// ## Serialization
///
/// An object can only be held by transactions of one group at a time. A
/// transaction whose holds touch an object still assigned to an earlier
/// group has to wait until every transaction of that group holding the
/// object commits.
///
/// ## Example
///
/// ```rust,ignore
/// let mut tx = tm.begin();
/// tx.hold_write(object, 0, 4096)?;
/// let txg = tm.assign(&mut tx, AssignMode::Wait)?;
/// // modify the object
/// tm.commit(&mut tx)?;
/// ```
pub struct TransactionManager {
    ctx: Arc<TxContext>,
    next_txid: AtomicU64,
}

impl TransactionManager {
    /// Creates a new transaction manager over the pool's collaborators.
    pub fn new(
        config: Config,
        store: Arc<dyn ObjectStore>,
        txgs: Arc<dyn TxgScheduler>,
        admission: Arc<dyn SpaceAdmission>,
        health: Arc<dyn PoolHealth>,
    ) -> Self {
        Self {
            ctx: Arc::new(TxContext {
                config,
                store,
                txgs,
                admission,
                health,
                objects: ObjectTable::new(),
                stats: TxStats::new(),
            }),
            next_txid: AtomicU64::new(1),
        }
    }

    fn next_id(&self) -> TxId {
        TxId::new(self.next_txid.fetch_add(1, Ordering::Relaxed))
    }

    /// Begins a new, unassigned transaction.
    pub fn begin(&self) -> Transaction {
        Transaction::new(self.next_id(), Arc::clone(&self.ctx), false)
    }

    /// Begins a transaction exempt from admission control, used to replay
    /// the intent log. It still pins the open group and serializes on
    /// objects like any other transaction.
    pub fn begin_replay(&self) -> Transaction {
        Transaction::new(self.next_id(), Arc::clone(&self.ctx), true)
    }

    /// Begins a transaction already assigned to `txg`, for work done while
    /// syncing that group. It takes no holds and may dirty any object.
    pub fn begin_assigned(&self, txg: TxgId) -> Transaction {
        Transaction::new_assigned(self.next_id(), Arc::clone(&self.ctx), txg)
    }

    /// Assigns the transaction to the open group.
    ///
    /// With [`AssignMode::Wait`] retryable failures are waited out and the
    /// attempt repeated. Otherwise a single attempt is made and
    /// [`CoreError::Restart`] is returned; call
    /// [`TransactionManager::wait`] (after dropping any locks) and assign
    /// again.
    ///
    /// # Errors
    ///
    /// Returns the transaction's sticky hold error, [`CoreError::Restart`],
    /// [`CoreError::PoolSuspended`] or [`CoreError::SpaceExhausted`].
    pub fn assign(&self, tx: &mut Transaction, mode: AssignMode) -> CoreResult<TxgId> {
        loop {
            match tx.try_assign(mode) {
                Ok(txg) => return Ok(txg),
                Err(err) if err.is_retryable() && mode == AssignMode::Wait => {
                    debug!(target: "cowtx::tx", tx = %tx.id(), reason = %err, "assign_wait");
                    tx.wait();
                }
                Err(err) => {
                    if !err.is_retryable() {
                        self.ctx.stats.record_error();
                    }
                    return Err(err);
                }
            }
        }
    }

    /// Blocks until the condition that failed the last assignment attempt
    /// may have cleared: the busy object was released, space was returned,
    /// the pool resumed or a new group opened.
    pub fn wait(&self, tx: &mut Transaction) {
        tx.wait();
    }

    /// Commits an assigned transaction.
    ///
    /// Object holds are released (waking transactions waiting on them), the
    /// reservation becomes dirty space of the group and callbacks are handed
    /// to the group.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] if the transaction is not assigned.
    pub fn commit(&self, tx: &mut Transaction) -> CoreResult<TxgId> {
        let txg = tx.commit()?;
        debug!(target: "cowtx::tx", tx = %tx.id(), txg = txg.as_u64(), "committed");
        Ok(txg)
    }

    /// Aborts an unassigned transaction. Callbacks run with
    /// [`CoreError::Cancelled`].
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] unless the transaction is unassigned.
    pub fn abort(&self, tx: &mut Transaction) -> CoreResult<()> {
        tx.abort()
    }

    /// Assignment and commit counters.
    #[must_use]
    pub fn stats(&self) -> &TxStats {
        &self.ctx.stats
    }

    /// Per-object serialization state.
    #[must_use]
    pub fn objects(&self) -> &ObjectTable {
        &self.ctx.objects
    }

    /// The configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.ctx.config
    }

    /// The object store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.ctx.store
    }

    /// The txg scheduler.
    #[must_use]
    pub fn txgs(&self) -> &Arc<dyn TxgScheduler> {
        &self.ctx.txgs
    }

    /// The pool health.
    #[must_use]
    pub fn health(&self) -> &Arc<dyn PoolHealth> {
        &self.ctx.health
    }
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("open_txg", &self.ctx.txgs.open_txg())
            .field("objects", &self.ctx.objects.len())
            .field("stats", &self.ctx.stats.snapshot())
            .finish_non_exhaustive()
    }
}
