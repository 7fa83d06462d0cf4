//! Transaction group pipeline.
//!
//! Groups move through three concurrent states: one group is *open* and
//! accepts new transactions, the previous one is *quiescing* (waiting for
//! its assigned transactions to commit) and the one before that is
//! *syncing*. Up to [`TXG_SIZE`] groups are tracked in per-slot arrays
//! indexed by `txg & TXG_MASK`.

use crate::error::CoreResult;
use crate::types::{TxgId, TXG_SIZE};
use parking_lot::{Condvar, Mutex, RwLock};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, trace};

/// Callback run once a transaction's group has synced (`Ok`) or the
/// transaction was aborted (`Err(Cancelled)`).
pub type CommitCallback = Box<dyn FnOnce(CoreResult<()>) + Send>;

/// Notified each time a group becomes stable on disk.
pub trait TxgListener: Send + Sync {
    /// Called after every block dirtied in `txg` has been written.
    fn txg_synced(&self, txg: TxgId);
}

/// Releases the two stages of a group pin.
pub trait PinRelease: Send + Sync {
    /// The holder no longer needs the group to stay open.
    fn release_to_quiesce(&self, txg: TxgId);

    /// The holder no longer needs the group to stay unsynced.
    fn release_to_sync(&self, txg: TxgId);
}

/// A pin on a transaction group.
///
/// While the pin has not been released to quiesce the group cannot stop
/// being the open group; until the pin is dropped the group cannot sync.
pub struct TxgHold {
    txg: TxgId,
    owner: Arc<dyn PinRelease>,
    quiesce_released: bool,
}

impl TxgHold {
    /// Wraps a pin taken by a scheduler.
    pub fn new(txg: TxgId, owner: Arc<dyn PinRelease>) -> Self {
        Self {
            txg,
            owner,
            quiesce_released: false,
        }
    }

    /// The pinned group.
    #[must_use]
    pub fn txg(&self) -> TxgId {
        self.txg
    }

    /// Lets the group close while still keeping it from syncing.
    pub fn release_to_quiesce(&mut self) {
        if !self.quiesce_released {
            self.quiesce_released = true;
            self.owner.release_to_quiesce(self.txg);
        }
    }
}

impl Drop for TxgHold {
    fn drop(&mut self) {
        self.release_to_quiesce();
        self.owner.release_to_sync(self.txg);
    }
}

impl std::fmt::Debug for TxgHold {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TxgHold")
            .field("txg", &self.txg)
            .field("quiesce_released", &self.quiesce_released)
            .finish_non_exhaustive()
    }
}

/// The transaction group scheduler as seen by transactions and logs.
pub trait TxgScheduler: Send + Sync {
    /// Pins the currently open group.
    fn hold_open(&self) -> TxgHold;

    /// The currently open group.
    fn open_txg(&self) -> TxgId;

    /// The most recent group that is stable on disk.
    fn last_synced(&self) -> TxgId;

    /// Blocks until `txg` has synced. `TxgId::NONE` waits for the group
    /// open at the time of the call.
    fn wait_synced(&self, txg: TxgId);

    /// Blocks until `txg` (or a later group) is open.
    fn wait_open(&self, txg: TxgId);

    /// Runs `callbacks` with `Ok(())` once `txg` has synced.
    fn register_callbacks(&self, txg: TxgId, callbacks: Vec<CommitCallback>);

    /// Subscribes to sync notifications. Dead listeners are pruned.
    fn add_listener(&self, listener: Weak<dyn TxgListener>);
}

struct TxgState {
    open: TxgId,
    last_synced: TxgId,
    opening: [u64; TXG_SIZE],
    pinned: [u64; TXG_SIZE],
    callbacks: [Vec<CommitCallback>; TXG_SIZE],
    wanted_synced: TxgId,
    wanted_open: TxgId,
    shutdown: bool,
}

struct Shared {
    state: Mutex<TxgState>,
    changed: Condvar,
    sync_lock: Mutex<()>,
    listeners: RwLock<Vec<Weak<dyn TxgListener>>>,
}

impl PinRelease for Shared {
    fn release_to_quiesce(&self, txg: TxgId) {
        let mut state = self.state.lock();
        state.opening[txg.slot()] -= 1;
        if state.opening[txg.slot()] == 0 {
            self.changed.notify_all();
        }
    }

    fn release_to_sync(&self, txg: TxgId) {
        let mut state = self.state.lock();
        state.pinned[txg.slot()] -= 1;
        if state.pinned[txg.slot()] == 0 {
            self.changed.notify_all();
        }
    }
}

impl Shared {
    fn advance(&self) -> TxgId {
        let _sync = self.sync_lock.lock();

        let mut state = self.state.lock();
        let txg = state.open;
        let slot = txg.slot();
        while state.opening[slot] > 0 {
            self.changed.wait(&mut state);
        }
        state.open = txg.next();
        self.changed.notify_all();
        trace!(target: "cowtx::txg", txg = txg.as_u64(), "quiescing");

        while state.pinned[slot] > 0 {
            self.changed.wait(&mut state);
        }
        let callbacks = std::mem::take(&mut state.callbacks[slot]);
        drop(state);

        let listeners: Vec<Arc<dyn TxgListener>> = {
            let mut registered = self.listeners.write();
            registered.retain(|weak| weak.strong_count() > 0);
            registered.iter().filter_map(Weak::upgrade).collect()
        };
        for listener in listeners {
            listener.txg_synced(txg);
        }

        let mut state = self.state.lock();
        state.last_synced = txg;
        self.changed.notify_all();
        drop(state);

        debug!(
            target: "cowtx::txg",
            txg = txg.as_u64(),
            callbacks = callbacks.len(),
            "synced"
        );
        for callback in callbacks {
            callback(Ok(()));
        }
        txg
    }
}

/// Reference scheduler driving the open, quiescing and syncing pipeline.
///
/// Groups advance when [`TxgCoordinator::advance`] is called, or
/// automatically once [`TxgCoordinator::start_driver`] has started a
/// background thread. Without a driver, `wait_synced` and `wait_open`
/// block until some other thread advances.
pub struct TxgCoordinator {
    shared: Arc<Shared>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl TxgCoordinator {
    /// Creates a coordinator for a fresh pool: nothing synced, group 1 open.
    #[must_use]
    pub fn new() -> Self {
        Self::starting_at(TxgId::NONE)
    }

    /// Creates a coordinator for a pool whose last stable group is
    /// `last_synced`.
    #[must_use]
    pub fn starting_at(last_synced: TxgId) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(TxgState {
                    open: last_synced.next(),
                    last_synced,
                    opening: [0; TXG_SIZE],
                    pinned: [0; TXG_SIZE],
                    callbacks: Default::default(),
                    wanted_synced: TxgId::NONE,
                    wanted_open: TxgId::NONE,
                    shutdown: false,
                }),
                changed: Condvar::new(),
                sync_lock: Mutex::new(()),
                listeners: RwLock::new(Vec::new()),
            }),
            driver: Mutex::new(None),
        }
    }

    /// Closes the open group, waits for its transactions to commit, syncs
    /// it and returns its id.
    pub fn advance(&self) -> TxgId {
        self.shared.advance()
    }

    /// Advances repeatedly until `txg` has synced.
    pub fn sync_through(&self, txg: TxgId) {
        while self.last_synced() < txg {
            self.advance();
        }
    }

    /// Starts a background thread that syncs a group every `interval`, or
    /// sooner when a waiter asks for one.
    pub fn start_driver(&self, interval: Duration) {
        let mut driver = self.driver.lock();
        if driver.is_some() {
            return;
        }
        let weak = Arc::downgrade(&self.shared);
        *driver = Some(thread::spawn(move || drive(weak, interval)));
    }

    /// Stops the driver and releases every waiter.
    pub fn shutdown(&self) {
        {
            let mut state = self.shared.state.lock();
            state.shutdown = true;
            self.shared.changed.notify_all();
        }
        if let Some(handle) = self.driver.lock().take() {
            let _ = handle.join();
        }
    }

    /// Number of pins currently held on `txg`.
    #[must_use]
    pub fn pins(&self, txg: TxgId) -> u64 {
        self.shared.state.lock().pinned[txg.slot()]
    }
}

impl Default for TxgCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TxgCoordinator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for TxgCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("TxgCoordinator")
            .field("open", &state.open)
            .field("last_synced", &state.last_synced)
            .finish_non_exhaustive()
    }
}

fn drive(shared: Weak<Shared>, interval: Duration) {
    loop {
        let Some(shared) = shared.upgrade() else {
            break;
        };
        {
            let mut state = shared.state.lock();
            loop {
                if state.shutdown {
                    return;
                }
                if state.wanted_synced > state.last_synced || state.wanted_open > state.open {
                    break;
                }
                if shared.changed.wait_for(&mut state, interval).timed_out() {
                    break;
                }
            }
        }
        shared.advance();
    }
}

impl TxgScheduler for TxgCoordinator {
    fn hold_open(&self) -> TxgHold {
        let mut state = self.shared.state.lock();
        let txg = state.open;
        state.opening[txg.slot()] += 1;
        state.pinned[txg.slot()] += 1;
        drop(state);
        TxgHold::new(txg, Arc::clone(&self.shared) as Arc<dyn PinRelease>)
    }

    fn open_txg(&self) -> TxgId {
        self.shared.state.lock().open
    }

    fn last_synced(&self) -> TxgId {
        self.shared.state.lock().last_synced
    }

    fn wait_synced(&self, txg: TxgId) {
        let mut state = self.shared.state.lock();
        let target = if txg == TxgId::NONE { state.open } else { txg };
        if state.wanted_synced < target {
            state.wanted_synced = target;
            self.shared.changed.notify_all();
        }
        while state.last_synced < target && !state.shutdown {
            self.shared.changed.wait(&mut state);
        }
    }

    fn wait_open(&self, txg: TxgId) {
        let mut state = self.shared.state.lock();
        if state.wanted_open < txg {
            state.wanted_open = txg;
            self.shared.changed.notify_all();
        }
        while state.open < txg && !state.shutdown {
            self.shared.changed.wait(&mut state);
        }
    }

    fn register_callbacks(&self, txg: TxgId, callbacks: Vec<CommitCallback>) {
        if callbacks.is_empty() {
            return;
        }
        let mut state = self.shared.state.lock();
        if txg <= state.last_synced {
            drop(state);
            for callback in callbacks {
                callback(Ok(()));
            }
            return;
        }
        state.callbacks[txg.slot()].extend(callbacks);
    }

    fn add_listener(&self, listener: Weak<dyn TxgListener>) {
        self.shared.listeners.write().push(listener);
    }
}
