//! Pool-side collaborators and the [`Pool`] facade wiring them together.
//!
//! The transaction manager and intent logs only see the traits
//! ([`TxgScheduler`], [`SpaceAdmission`], [`PoolHealth`]); the reference
//! implementations here run the whole write path in memory.

mod admission;
mod health;
mod txg;

pub use admission::{AdmissionError, Reservation, SpaceAdmission, SpaceBudget, SpaceRequest};
pub use health::{FailurePolicy, PoolHealth, PoolStatus};
pub use txg::{
    CommitCallback, PinRelease, TxgCoordinator, TxgHold, TxgListener, TxgScheduler,
};

use crate::config::Config;
use crate::error::CoreResult;
use crate::object::ObjectStore;
use crate::transaction::TransactionManager;
use crate::types::TxgId;
use crate::zil::IntentLog;
use cowtx_storage::StorageBackend;
use std::sync::{Arc, Weak};
use std::time::Duration;

/// A pool: object store, txg pipeline, space budget, health and the
/// transaction manager built on top of them.
///
/// # Example
///
/// ```rust
/// use cowtx_core::{AssignMode, Config, InMemoryObjectStore, ObjectId, ObjectKind, Pool};
/// use std::sync::Arc;
///
/// let store = Arc::new(InMemoryObjectStore::new());
/// store.create(ObjectId::new(7), ObjectKind::Plain, 4096);
/// let pool = Pool::new(Config::default(), store, 1 << 30);
///
/// let tm = pool.transactions();
/// let mut tx = tm.begin();
/// tx.hold_write(ObjectId::new(7), 0, 4096).unwrap();
/// let txg = tm.assign(&mut tx, AssignMode::Wait).unwrap();
/// tm.commit(&mut tx).unwrap();
///
/// assert_eq!(pool.sync(), txg);
/// ```
pub struct Pool {
    store: Arc<dyn ObjectStore>,
    txgs: Arc<TxgCoordinator>,
    budget: Arc<SpaceBudget>,
    health: Arc<PoolStatus>,
    transactions: Arc<TransactionManager>,
}

impl Pool {
    /// Creates a pool with `capacity` bytes of space.
    pub fn new(config: Config, store: Arc<dyn ObjectStore>, capacity: u64) -> Self {
        Self::with_txgs(config, store, capacity, TxgCoordinator::new())
    }

    /// Creates a pool resuming after `last_synced`, as after a crash.
    pub fn reopen(
        config: Config,
        store: Arc<dyn ObjectStore>,
        capacity: u64,
        last_synced: TxgId,
    ) -> Self {
        Self::with_txgs(config, store, capacity, TxgCoordinator::starting_at(last_synced))
    }

    fn with_txgs(
        config: Config,
        store: Arc<dyn ObjectStore>,
        capacity: u64,
        txgs: TxgCoordinator,
    ) -> Self {
        let txgs = Arc::new(txgs);
        let budget = Arc::new(SpaceBudget::new(capacity));
        let health = Arc::new(PoolStatus::new(config.failure_policy));

        let listener: Weak<dyn TxgListener> = Arc::downgrade(&budget) as Weak<dyn TxgListener>;
        txgs.add_listener(listener);

        let transactions = Arc::new(TransactionManager::new(
            config,
            Arc::clone(&store),
            Arc::clone(&txgs) as Arc<dyn TxgScheduler>,
            Arc::clone(&budget) as Arc<dyn SpaceAdmission>,
            Arc::clone(&health) as Arc<dyn PoolHealth>,
        ));

        Self {
            store,
            txgs,
            budget,
            health,
            transactions,
        }
    }

    /// Opens the intent log of one dataset on `device`.
    ///
    /// # Errors
    ///
    /// Returns an error if the device cannot be read.
    pub fn open_log(&self, device: Box<dyn StorageBackend>) -> CoreResult<Arc<IntentLog>> {
        IntentLog::open(&self.transactions, device)
    }

    /// Starts syncing groups in the background every `interval`.
    pub fn start_sync_thread(&self, interval: Duration) {
        self.txgs.start_driver(interval);
    }

    /// Syncs the open group and returns its id.
    pub fn sync(&self) -> TxgId {
        self.txgs.advance()
    }

    /// The transaction manager.
    #[must_use]
    pub fn transactions(&self) -> &Arc<TransactionManager> {
        &self.transactions
    }

    /// The object store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// The txg pipeline.
    #[must_use]
    pub fn txgs(&self) -> &Arc<TxgCoordinator> {
        &self.txgs
    }

    /// The space budget.
    #[must_use]
    pub fn budget(&self) -> &Arc<SpaceBudget> {
        &self.budget
    }

    /// The pool health switch.
    #[must_use]
    pub fn health(&self) -> &Arc<PoolStatus> {
        &self.health
    }

    /// Stops the background sync thread and releases every txg waiter.
    pub fn shutdown(&self) {
        self.txgs.shutdown();
    }
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("txgs", &self.txgs)
            .field("budget", &self.budget)
            .field("health", &self.health)
            .finish_non_exhaustive()
    }
}
