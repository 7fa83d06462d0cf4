//! Transaction state.

use crate::error::{CoreError, CoreResult, RetryReason};
use crate::object::{ObjectHold, ObjectSlot, META_OBJECT};
use crate::pool::{
    AdmissionError, CommitCallback, FailurePolicy, Reservation, SpaceRequest, TxgHold,
};
use crate::transaction::estimate::Estimator;
use crate::transaction::hold::{Hold, HoldKind, SpaceEstimate, ENTIRE_OBJECT};
use crate::transaction::manager::TxContext;
use crate::types::{ObjectId, TxId, TxgId};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// State of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    /// Holds may be added; not yet admitted to a group.
    Unassigned,
    /// Admitted to a group; the caller may modify held objects.
    Assigned(TxgId),
    /// Changes handed to the group.
    Committed,
    /// Discarded before assignment.
    Aborted,
}

/// How [`crate::TransactionManager::assign`] behaves when it cannot admit
/// the transaction right away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignMode {
    /// Wait and retry until admitted or a fatal error occurs.
    Wait,
    /// Make one attempt and return retryable errors to the caller.
    NoWait,
    /// Assign to exactly this group, failing if it is not the open one.
    Txg(TxgId),
}

/// A block being dirtied under a transaction, for [`Transaction::check_dirty`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirtyBlock {
    /// The object's bonus area.
    Bonus,
    /// A data (`level == 0`) or indirect block.
    Data {
        /// Indirection level.
        level: u8,
        /// Block id at that level.
        block: u64,
    },
}

pub(crate) enum WaitCondition {
    Object { slot: Arc<ObjectSlot>, txg: TxgId },
    Space,
    Resume,
    Open,
}

/// A transaction: a set of holds admitted together into one group.
///
/// Holds are added while the transaction is [`TxState::Unassigned`]. Hold
/// failures are recorded as the transaction's error (the first one wins)
/// and reported again at assignment, so callers may add many holds before
/// checking anything. Callbacks registered with
/// [`Transaction::register_callback`] run once the group syncs, or with
/// [`CoreError::Cancelled`] if the transaction is aborted.
pub struct Transaction {
    id: TxId,
    ctx: Arc<TxContext>,
    state: TxState,
    holds: Vec<Hold>,
    object_holds: Vec<ObjectHold>,
    txg_hold: Option<TxgHold>,
    reservation: Option<Reservation>,
    error: Option<CoreError>,
    snapshot_txg: TxgId,
    exempt: bool,
    any_object: bool,
    last_tried: TxgId,
    wait_for: Option<WaitCondition>,
    callbacks: Vec<CommitCallback>,
}

impl Transaction {
    pub(crate) fn new(id: TxId, ctx: Arc<TxContext>, exempt: bool) -> Self {
        let snapshot_txg = ctx.store.last_snapshot_txg();
        Self {
            id,
            ctx,
            state: TxState::Unassigned,
            holds: Vec::new(),
            object_holds: Vec::new(),
            txg_hold: None,
            reservation: None,
            error: None,
            snapshot_txg,
            exempt,
            any_object: false,
            last_tried: TxgId::NONE,
            wait_for: None,
            callbacks: Vec::new(),
        }
    }

    pub(crate) fn new_assigned(id: TxId, ctx: Arc<TxContext>, txg: TxgId) -> Self {
        let mut tx = Self::new(id, ctx, true);
        tx.any_object = true;
        tx.state = TxState::Assigned(txg);
        tx
    }

    /// Returns the transaction ID.
    #[must_use]
    pub fn id(&self) -> TxId {
        self.id
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> TxState {
        self.state
    }

    /// The group the transaction is assigned to.
    #[must_use]
    pub fn txg(&self) -> Option<TxgId> {
        match self.state {
            TxState::Assigned(txg) => Some(txg),
            _ => None,
        }
    }

    /// The holds added so far.
    #[must_use]
    pub fn holds(&self) -> &[Hold] {
        &self.holds
    }

    /// The first error recorded by a hold, if any.
    #[must_use]
    pub fn error(&self) -> Option<&CoreError> {
        self.error.as_ref()
    }

    /// Aggregate estimate of every hold.
    #[must_use]
    pub fn estimate(&self) -> SpaceEstimate {
        self.holds.iter().map(|hold| *hold.estimate()).sum()
    }

    /// The group of the last assignment attempt.
    #[must_use]
    pub fn last_tried(&self) -> TxgId {
        self.last_tried
    }

    // === Holds ===

    /// Declares a write of `len` bytes at `offset`.
    ///
    /// # Errors
    ///
    /// Returns the hold's error, which is also recorded on the transaction.
    pub fn hold_write(&mut self, object: ObjectId, offset: u64, len: u64) -> CoreResult<()> {
        self.ensure_unassigned()?;
        let estimate = self.estimator().write(object, offset, len);
        self.add_hold(Some(object), HoldKind::Write { offset, len }, estimate)
    }

    /// Declares a free of `len` bytes at `offset`; pass
    /// [`ENTIRE_OBJECT`] to free to the end of the object.
    ///
    /// # Errors
    ///
    /// Returns the hold's error, which is also recorded on the transaction.
    pub fn hold_free(&mut self, object: ObjectId, offset: u64, len: u64) -> CoreResult<()> {
        self.ensure_unassigned()?;
        let estimate = self.estimator().free(object, offset, len);
        self.add_hold(Some(object), HoldKind::Free { offset, len }, estimate)
    }

    /// Declares a change to the object's bonus area.
    ///
    /// # Errors
    ///
    /// Returns the hold's error, which is also recorded on the transaction.
    pub fn hold_bonus(&mut self, object: ObjectId) -> CoreResult<()> {
        self.ensure_unassigned()?;
        let estimate = self.estimator().bonus(object);
        self.add_hold(Some(object), HoldKind::Bonus, estimate)
    }

    /// Declares a container entry change. `object` is `None` for a
    /// container created by this transaction.
    ///
    /// # Errors
    ///
    /// Returns the hold's error, which is also recorded on the transaction.
    pub fn hold_zap(
        &mut self,
        object: Option<ObjectId>,
        add: bool,
        name: Option<&str>,
    ) -> CoreResult<()> {
        self.ensure_unassigned()?;
        let estimate = self.estimator().zap(object, add, name);
        let kind = HoldKind::Zap {
            add,
            name: name.map(str::to_string),
        };
        self.add_hold(object, kind, estimate)
    }

    /// Declares the creation of an object with `initial_len` bytes of data.
    ///
    /// # Errors
    ///
    /// Returns the hold's error, which is also recorded on the transaction.
    pub fn hold_new_object(&mut self, initial_len: u64) -> CoreResult<()> {
        self.ensure_unassigned()?;
        let estimate = self.estimator().new_object(initial_len);
        self.add_hold(None, HoldKind::NewObject, estimate)
    }

    /// Reserves raw space not tied to an object.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction is already assigned.
    pub fn hold_space(&mut self, bytes: u64) -> CoreResult<()> {
        self.ensure_unassigned()?;
        let estimate = Ok(Estimator::space(bytes));
        self.add_hold(None, HoldKind::Space { bytes }, estimate)
    }

    fn estimator(&self) -> Estimator<'_> {
        Estimator::new(self.ctx.store.as_ref(), &self.ctx.config)
    }

    fn add_hold(
        &mut self,
        object: Option<ObjectId>,
        kind: HoldKind,
        estimate: CoreResult<SpaceEstimate>,
    ) -> CoreResult<()> {
        match estimate {
            Ok(estimate) => {
                trace!(
                    target: "cowtx::tx",
                    tx = %self.id,
                    object = ?object,
                    ?kind,
                    write = estimate.to_write,
                    overwrite = estimate.to_overwrite,
                    "hold"
                );
                self.holds.push(Hold::new(object, kind, estimate));
                Ok(())
            }
            Err(err) => {
                if self.error.is_none() {
                    self.error = Some(err.duplicate());
                }
                Err(err)
            }
        }
    }

    /// Registers a callback run after the transaction's group syncs.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction already committed or aborted.
    pub fn register_callback<F>(&mut self, callback: F) -> CoreResult<()>
    where
        F: FnOnce(CoreResult<()>) + Send + 'static,
    {
        match self.state {
            TxState::Unassigned | TxState::Assigned(_) => {
                self.callbacks.push(Box::new(callback));
                Ok(())
            }
            TxState::Committed => Err(CoreError::invalid_operation(
                "transaction already committed",
            )),
            TxState::Aborted => Err(CoreError::invalid_operation("transaction already aborted")),
        }
    }

    // === Assignment ===

    /// One assignment attempt. On a retryable failure everything taken
    /// during the attempt is released and the condition to wait for is
    /// remembered.
    pub(crate) fn try_assign(&mut self, mode: AssignMode) -> CoreResult<TxgId> {
        self.ensure_unassigned()?;
        if let Some(err) = &self.error {
            return Err(err.duplicate());
        }

        let ctx = Arc::clone(&self.ctx);
        if ctx.health.is_suspended() {
            ctx.stats.record_suspended();
            if ctx.health.failure_policy() == FailurePolicy::Continue && mode != AssignMode::Wait {
                return Err(CoreError::PoolSuspended);
            }
            self.wait_for = Some(WaitCondition::Resume);
            return Err(CoreError::Restart(RetryReason::PoolSuspended));
        }

        let mut txg_hold = ctx.txgs.hold_open();
        let txg = txg_hold.txg();
        self.last_tried = txg;

        if let AssignMode::Txg(requested) = mode {
            if requested != txg {
                self.wait_for = Some(WaitCondition::Open);
                return Err(CoreError::Restart(RetryReason::GroupNotOpen {
                    requested,
                    open: txg,
                }));
            }
        }

        let mut object_holds = Vec::with_capacity(self.holds.len());
        for object in self.holds.iter().filter_map(Hold::object) {
            let slot = ctx.objects.slot(object);
            match slot.try_hold(txg) {
                Ok(hold) => object_holds.push(hold),
                Err(busy) => {
                    ctx.stats.record_group_conflict();
                    trace!(
                        target: "cowtx::tx",
                        txg = txg.as_u64(),
                        object = %object,
                        busy = busy.as_u64(),
                        "assign_conflict"
                    );
                    self.wait_for = Some(WaitCondition::Object { slot, txg: busy });
                    return Err(CoreError::Restart(RetryReason::ObjectBusy {
                        object,
                        txg: busy,
                    }));
                }
            }
        }

        let mut total = self.estimate();
        if ctx.store.last_snapshot_txg() > self.snapshot_txg {
            // Blocks counted as freeable may now belong to the snapshot.
            total.to_write += total.to_overwrite;
            total.to_overwrite = 0;
            total.to_free = 0;
        }

        if !self.exempt {
            let inflation = ctx.config.asize_inflation;
            let request = SpaceRequest {
                memory: total
                    .written()
                    .saturating_add(total.memory_to_hold)
                    .saturating_add(total.fudge),
                write: total.written().saturating_mul(inflation),
                free: total
                    .to_overwrite
                    .saturating_mul(inflation)
                    .saturating_add(total.to_free),
                unref: total.to_unref.saturating_mul(inflation),
            };
            match ctx.admission.reserve(&request) {
                Ok(reservation) => self.reservation = Some(reservation),
                Err(AdmissionError::Retry) => {
                    ctx.stats.record_space_retry();
                    self.wait_for = Some(WaitCondition::Space);
                    return Err(CoreError::Restart(RetryReason::SpaceUnavailable));
                }
                Err(AdmissionError::Exhausted {
                    requested,
                    available,
                }) => {
                    return Err(CoreError::SpaceExhausted {
                        requested,
                        capacity: available,
                    });
                }
            }
        }

        txg_hold.release_to_quiesce();
        self.txg_hold = Some(txg_hold);
        self.object_holds = object_holds;
        self.wait_for = None;
        self.state = TxState::Assigned(txg);
        ctx.stats.record_assigned();
        debug!(
            target: "cowtx::tx",
            tx = %self.id,
            txg = txg.as_u64(),
            holds = self.holds.len(),
            "assigned"
        );
        Ok(txg)
    }

    /// Blocks on whatever made the last attempt fail.
    pub(crate) fn wait(&mut self) {
        self.ctx.stats.record_delay();
        match self.wait_for.take() {
            Some(WaitCondition::Object { slot, txg }) => slot.wait_released(txg),
            Some(WaitCondition::Resume) => self.ctx.health.wait_resumed(),
            Some(WaitCondition::Space | WaitCondition::Open) | None => {
                self.ctx.txgs.wait_open(self.last_tried.next());
            }
        }
    }

    // === Completion ===

    pub(crate) fn commit(&mut self) -> CoreResult<TxgId> {
        let TxState::Assigned(txg) = self.state else {
            return Err(self.state_error());
        };
        self.release_assigned(txg);
        self.state = TxState::Committed;
        self.ctx.stats.record_commit();
        Ok(txg)
    }

    pub(crate) fn abort(&mut self) -> CoreResult<()> {
        if self.state != TxState::Unassigned {
            return Err(self.state_error());
        }
        self.cancel_callbacks();
        self.state = TxState::Aborted;
        self.ctx.stats.record_abort();
        Ok(())
    }

    fn release_assigned(&mut self, txg: TxgId) {
        self.object_holds.clear();
        let callbacks = std::mem::take(&mut self.callbacks);
        self.ctx.txgs.register_callbacks(txg, callbacks);
        if let Some(reservation) = self.reservation.take() {
            self.ctx.admission.release(reservation, Some(txg));
        }
        self.txg_hold = None;
    }

    fn cancel_callbacks(&mut self) {
        for callback in self.callbacks.drain(..) {
            callback(Err(CoreError::Cancelled));
        }
    }

    fn ensure_unassigned(&self) -> CoreResult<()> {
        match self.state {
            TxState::Unassigned => Ok(()),
            _ => Err(self.state_error()),
        }
    }

    fn state_error(&self) -> CoreError {
        match self.state {
            TxState::Unassigned => CoreError::invalid_operation("transaction not assigned"),
            TxState::Assigned(_) => CoreError::invalid_operation("transaction already assigned"),
            TxState::Committed => CoreError::invalid_operation("transaction already committed"),
            TxState::Aborted => CoreError::invalid_operation("transaction already aborted"),
        }
    }

    // === Debug checks ===

    /// Panics (in debug builds) if dirtying `block` of `object` is not
    /// covered by one of the transaction's holds.
    ///
    /// Bonus areas and the metadata object are always allowed; so is any
    /// block of an object that is not otherwise held when the transaction
    /// declared a new object.
    pub fn check_dirty(&self, object: ObjectId, block: DirtyBlock) {
        if !cfg!(debug_assertions) {
            return;
        }
        assert!(
            matches!(self.state, TxState::Assigned(_)),
            "dirtying {object} under {} which is not assigned",
            self.id
        );
        let DirtyBlock::Data { level, block } = block else {
            return;
        };
        if self.any_object || object == META_OBJECT {
            return;
        }

        let (data_shift, epbs) = self
            .ctx
            .store
            .lookup(object)
            .map(|info| (u32::from(info.data_block_shift().unwrap_or(17)), u32::from(info.epb_shift())))
            .unwrap_or((17, 10));
        let shift = data_shift + epbs * u32::from(level);
        let held_explicitly = self.holds.iter().any(|h| h.object() == Some(object));

        let mut match_object = false;
        let mut match_offset = false;
        for hold in &self.holds {
            if hold.object() == Some(object) {
                match_object = true;
            }
            if hold.object().is_none() || hold.object() == Some(object) {
                match hold.kind() {
                    HoldKind::Write { offset, len } => {
                        let (first, last) = block_range(*offset, *len, shift);
                        if (first..=last).contains(&block) || block == 0 || level > 0 {
                            match_offset = true;
                        }
                    }
                    HoldKind::Free { offset, len } => {
                        let (first, last) = block_range(*offset, *len, shift);
                        if block >= first && (block <= last || *len == ENTIRE_OBJECT) {
                            match_offset = true;
                        }
                    }
                    HoldKind::Zap { .. } => match_offset = true,
                    HoldKind::NewObject if !held_explicitly => return,
                    HoldKind::NewObject | HoldKind::Bonus | HoldKind::Space { .. } => {}
                }
            }
            if match_object && match_offset {
                return;
            }
        }
        panic!(
            "dirtying {object} level {level} block {block} but {} does not hold it",
            self.id
        );
    }
}

fn block_range(offset: u64, len: u64, shift: u32) -> (u64, u64) {
    if shift >= 64 {
        return (0, 0);
    }
    let last = offset.saturating_add(len.max(1) - 1);
    (offset >> shift, last >> shift)
}

impl Drop for Transaction {
    fn drop(&mut self) {
        match self.state {
            TxState::Assigned(txg) => {
                if !self.any_object {
                    warn!(
                        target: "cowtx::tx",
                        tx = %self.id,
                        txg = txg.as_u64(),
                        "assigned transaction dropped without commit"
                    );
                }
                self.cancel_callbacks();
                self.release_assigned(txg);
            }
            TxState::Unassigned => self.cancel_callbacks(),
            TxState::Committed | TxState::Aborted => {}
        }
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("holds", &self.holds)
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::object::{InMemoryObjectStore, ObjectKind, ZapStats};
    use crate::pool::{PoolStatus, SpaceBudget, TxgCoordinator};
    use crate::transaction::TransactionManager;
    use proptest::prelude::*;

    const OBJ: ObjectId = ObjectId(1);
    const DIR: ObjectId = ObjectId(2);

    fn create_manager() -> TransactionManager {
        let store = InMemoryObjectStore::new();
        store.create(OBJ, ObjectKind::Plain, 4096);
        create_manager_with(store, Arc::new(TxgCoordinator::new()))
    }

    fn create_manager_with(store: InMemoryObjectStore, txgs: Arc<TxgCoordinator>) -> TransactionManager {
        TransactionManager::new(
            Config::default(),
            Arc::new(store),
            txgs,
            Arc::new(SpaceBudget::new(1 << 40)),
            Arc::new(PoolStatus::default()),
        )
    }

    #[test]
    fn new_transaction_is_unassigned() {
        let tm = create_manager();
        let tx = tm.begin();
        assert_eq!(tx.state(), TxState::Unassigned);
        assert_eq!(tx.txg(), None);
        assert_eq!(tx.estimate(), SpaceEstimate::default());
    }

    #[test]
    fn first_hold_error_is_sticky() {
        let tm = create_manager();
        let mut tx = tm.begin();
        assert!(tx.hold_write(ObjectId::new(99), 0, 10).is_err());
        assert!(tx.hold_write(OBJ, 0, 10).is_ok());
        assert!(matches!(tx.error(), Some(CoreError::ObjectUnavailable { .. })));
        assert_eq!(tx.holds().len(), 1);
    }

    #[test]
    fn cannot_hold_after_assign() {
        let tm = create_manager();
        let mut tx = tm.begin();
        tx.hold_bonus(OBJ).unwrap();
        tm.assign(&mut tx, AssignMode::NoWait).unwrap();
        assert!(matches!(
            tx.hold_write(OBJ, 0, 1),
            Err(CoreError::InvalidOperation { .. })
        ));
        tm.commit(&mut tx).unwrap();
    }

    #[test]
    fn callbacks_cancelled_on_abort() {
        let tm = create_manager();
        let mut tx = tm.begin();
        let (sender, receiver) = std::sync::mpsc::channel();
        tx.register_callback(move |result| sender.send(result.is_err()).unwrap())
            .unwrap();
        tm.abort(&mut tx).unwrap();
        assert!(receiver.recv().unwrap());
        assert!(tx.register_callback(|_| {}).is_err());
    }

    #[test]
    fn callbacks_cancelled_when_assigned_transaction_is_dropped() {
        let store = InMemoryObjectStore::new();
        store.create(OBJ, ObjectKind::Plain, 4096);
        let txgs = Arc::new(TxgCoordinator::new());
        let tm = create_manager_with(store, Arc::clone(&txgs));
        let mut tx = tm.begin();
        tx.hold_bonus(OBJ).unwrap();
        let (sender, receiver) = std::sync::mpsc::channel();
        tx.register_callback(move |result| {
            sender
                .send(matches!(result, Err(CoreError::Cancelled)))
                .unwrap();
        })
        .unwrap();
        let txg = tm.assign(&mut tx, AssignMode::NoWait).unwrap();
        drop(tx);

        assert!(receiver.recv().unwrap());
        assert_eq!(tm.objects().slot(OBJ).holds(), 0);
        assert_eq!(txgs.advance(), txg);
        assert!(receiver.try_recv().is_err());
    }

    #[test]
    fn overflowing_write_range_is_sticky() {
        let tm = create_manager();
        let mut tx = tm.begin();
        tx.hold_write(OBJ, 0, 8192).unwrap();
        assert!(tx.hold_write(OBJ, u64::MAX - 10, 100).is_err());
        let err = tm.assign(&mut tx, AssignMode::NoWait).unwrap_err();
        assert!(matches!(err, CoreError::InvalidOperation { .. }));
        tm.abort(&mut tx).unwrap();
    }

    #[test]
    fn dirty_check_accepts_held_ranges() {
        let tm = create_manager();
        let mut tx = tm.begin();
        tx.hold_write(OBJ, 8192, 4096).unwrap();
        tm.assign(&mut tx, AssignMode::NoWait).unwrap();

        tx.check_dirty(OBJ, DirtyBlock::Data { level: 0, block: 2 });
        tx.check_dirty(OBJ, DirtyBlock::Data { level: 0, block: 0 });
        tx.check_dirty(OBJ, DirtyBlock::Data { level: 1, block: 0 });
        tx.check_dirty(OBJ, DirtyBlock::Bonus);
        tx.check_dirty(ObjectId::new(42), DirtyBlock::Bonus);
        tm.commit(&mut tx).unwrap();
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "does not hold it")]
    fn dirty_check_rejects_unheld_block() {
        let tm = create_manager();
        let mut tx = tm.begin();
        tx.hold_write(OBJ, 8192, 4096).unwrap();
        tm.assign(&mut tx, AssignMode::NoWait).unwrap();
        tx.check_dirty(OBJ, DirtyBlock::Data { level: 0, block: 7 });
    }

    #[test]
    fn dirty_check_free_to_end() {
        let tm = create_manager();
        let mut tx = tm.begin();
        tx.hold_free(OBJ, 4096, ENTIRE_OBJECT).unwrap();
        tm.assign(&mut tx, AssignMode::NoWait).unwrap();
        tx.check_dirty(OBJ, DirtyBlock::Data { level: 0, block: 1000 });
        tm.commit(&mut tx).unwrap();
    }

    #[test]
    fn new_object_covers_unheld_objects() {
        let tm = create_manager();
        let mut tx = tm.begin();
        tx.hold_new_object(4096).unwrap();
        tm.assign(&mut tx, AssignMode::NoWait).unwrap();
        tx.check_dirty(ObjectId::new(77), DirtyBlock::Data { level: 0, block: 0 });
        tm.commit(&mut tx).unwrap();
    }

    #[test]
    fn block_range_handles_large_shifts() {
        assert_eq!(block_range(4096, 4096, 12), (1, 1));
        assert_eq!(block_range(0, ENTIRE_OBJECT, 12), (0, u64::MAX >> 12));
        assert_eq!(block_range(5, 5, 64), (0, 0));
    }
    // === Properties ===

    #[derive(Debug, Clone)]
    enum HoldOp {
        Write { offset: u64, len: u64 },
        Free { offset: u64, len: u64 },
        Zap { add: bool, name: Option<String> },
        Bonus,
        Space(u64),
    }

    fn hold_op_strategy() -> impl Strategy<Value = HoldOp> {
        prop_oneof![
            (0u64..(1 << 20), 0u64..(1 << 16))
                .prop_map(|(offset, len)| HoldOp::Write { offset, len }),
            (0u64..(1 << 20), prop_oneof![0u64..(1 << 16), Just(ENTIRE_OBJECT)])
                .prop_map(|(offset, len)| HoldOp::Free { offset, len }),
            (any::<bool>(), proptest::option::of("[a-z]{1,8}"))
                .prop_map(|(add, name)| HoldOp::Zap { add, name }),
            Just(HoldOp::Bonus),
            (0u64..(1 << 20)).prop_map(HoldOp::Space),
        ]
    }

    fn covers(later: &SpaceEstimate, earlier: &SpaceEstimate) -> bool {
        later.to_write >= earlier.to_write
            && later.to_overwrite >= earlier.to_overwrite
            && later.to_free >= earlier.to_free
            && later.to_unref >= earlier.to_unref
            && later.memory_to_hold >= earlier.memory_to_hold
            && later.fudge >= earlier.fudge
    }

    proptest! {
        #[test]
        fn estimate_never_shrinks_as_holds_are_added(
            ops in proptest::collection::vec(hold_op_strategy(), 1..24),
        ) {
            let store = InMemoryObjectStore::new();
            store.create(OBJ, ObjectKind::Plain, 4096);
            store.create(DIR, ObjectKind::Zap, 4096);
            store.set_zap_stats(DIR, ZapStats {
                micro: true,
                block_size: 4096,
                entries: 10,
                entries_per_block: 60,
                external_pointer_table: false,
            });
            store.write(OBJ, 0, &vec![1u8; 64 * 4096], TxgId::new(1)).unwrap();
            let tm = create_manager_with(store, Arc::new(TxgCoordinator::new()));
            let mut tx = tm.begin();

            let mut previous = tx.estimate();
            for op in ops {
                // Failed holds add nothing; the estimate still must not shrink.
                let _ = match op {
                    HoldOp::Write { offset, len } => tx.hold_write(OBJ, offset, len),
                    HoldOp::Free { offset, len } => tx.hold_free(OBJ, offset, len),
                    HoldOp::Zap { add, name } => tx.hold_zap(Some(DIR), add, name.as_deref()),
                    HoldOp::Bonus => tx.hold_bonus(OBJ),
                    HoldOp::Space(bytes) => tx.hold_space(bytes),
                };
                let current = tx.estimate();
                prop_assert!(covers(&current, &previous), "{current:?} < {previous:?}");
                previous = current;
            }

            tm.abort(&mut tx).unwrap();
            prop_assert_eq!(tx.estimate(), previous);
        }
    }
}
