//! Intent log: synchronous durability ahead of the next group sync.
//!
//! Mutating operations describe themselves as [`LogRecord`]s while their
//! transaction is assigned. Records wait in a per-group [`chain`] until
//! either their group syncs (and they are destroyed unwritten) or a
//! [`IntentLog::commit`] writes them to the log device.
//!
//! ## Ordering
//!
//! - Records on the sync list are written in append order
//! - Write, truncate, setattr and acl records wait on per-object lists and
//!   are moved to the sync list by a commit of their object (or of all)
//! - A rename first moves the renamed object's records to the sync list
//!
//! ## Recovery
//!
//! On open the chain on the device is read up to its first bad block and
//! anything after it is cut off. [`IntentLog::replay`] hands every record
//! of an unsynced group to a [`ReplayHandler`]; once the replayed changes
//! sync the device is reclaimed.

mod chain;
mod commit;
mod record;
mod replay;
mod write_state;
mod writer;

pub use commit::{CommitOutcome, CommitWaiter};
pub use record::{
    AclRecord, CreateKind, CreateRecord, LinkRecord, LogRecord, RecordBody, RecordCallback,
    RemoveRecord, RenameRecord, SetAttrRecord, SymlinkRecord, TruncateRecord, TxType,
    WriteRecord, WriteState, RECORD_HEADER_SIZE, WRITE_RECORD_HEADER_SIZE,
};
pub use replay::{ReplayHandler, ReplaySummary};
pub use write_state::{choose_write_state, PendingWrite, PrecopyState};
pub use writer::{BlockHeader, LogBlock, BLOCK_HEADER_SIZE, BLOCK_OVERHEAD, LOG_MAGIC, LOG_VERSION};

use crate::config::SyncMode;
use crate::error::{CoreError, CoreResult};
use crate::pool::TxgListener;
use crate::stats::LogStats;
use crate::transaction::{AssignMode, Transaction, TransactionManager};
use crate::types::{ObjectId, TxgId};
use bytes::Bytes;
use chain::LogChain;
use cowtx_storage::StorageBackend;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, error, info, warn};
use writer::{BlockBuilder, LogWriter};

/// The intent log of one dataset.
pub struct IntentLog {
    transactions: Arc<TransactionManager>,
    chain: LogChain,
    /// Serializes commit writers; owns the device.
    issuer: Mutex<LogWriter>,
    replaying: AtomicBool,
    needs_replay: AtomicBool,
    /// Group that was open when a log write failed, 0 while healthy.
    failed_at: AtomicU64,
    /// Highest group any record was assigned to.
    dirty_max: AtomicU64,
    unlinked: Mutex<HashSet<ObjectId>>,
    stats: LogStats,
}

impl IntentLog {
    /// Opens the intent log stored on `device` and registers it for
    /// group sync notifications.
    ///
    /// If the device holds records of groups that have not synced, they
    /// must be replayed with [`IntentLog::replay`] before the device can
    /// be reclaimed.
    ///
    /// # Errors
    ///
    /// Returns an error if the device cannot be read or truncated.
    pub fn open(
        transactions: &Arc<TransactionManager>,
        device: Box<dyn StorageBackend>,
    ) -> CoreResult<Arc<Self>> {
        let mut writer = LogWriter::open(device)?;
        let last_synced = transactions.txgs().last_synced();
        let needs_replay = writer.max_txg() > last_synced;
        if !needs_replay && !writer.is_empty() {
            writer.reclaim()?;
        }
        info!(
            target: "cowtx::zil",
            needs_replay,
            max_txg = writer.max_txg().as_u64(),
            "intent log opened"
        );

        let log = Arc::new(Self {
            transactions: Arc::clone(transactions),
            chain: LogChain::new(),
            issuer: Mutex::new(writer),
            replaying: AtomicBool::new(false),
            needs_replay: AtomicBool::new(needs_replay),
            failed_at: AtomicU64::new(0),
            dirty_max: AtomicU64::new(0),
            unlinked: Mutex::new(HashSet::new()),
            stats: LogStats::new(),
        });
        let listener: Weak<dyn TxgListener> = Arc::downgrade(&log) as Weak<dyn TxgListener>;
        transactions.txgs().add_listener(listener);
        Ok(log)
    }

    /// Whether records are being replayed (logging is suppressed).
    #[must_use]
    pub fn is_replaying(&self) -> bool {
        self.replaying.load(Ordering::Acquire)
    }

    /// Whether the device holds records that still need replaying.
    #[must_use]
    pub fn needs_replay(&self) -> bool {
        self.needs_replay.load(Ordering::Acquire)
    }

    /// Counters of this log.
    #[must_use]
    pub fn stats(&self) -> &LogStats {
        &self.stats
    }

    /// Records waiting in the chain.
    #[must_use]
    pub fn pending_records(&self) -> usize {
        self.chain.len()
    }

    /// Records of `object` waiting on its async list.
    #[must_use]
    pub fn pending_async(&self, object: ObjectId) -> usize {
        self.chain.async_len(object)
    }

    fn is_unlinked(&self, object: ObjectId) -> bool {
        self.unlinked.lock().contains(&object)
    }

    fn skip_logging(&self, object: Option<ObjectId>) -> bool {
        self.is_replaying() || object.is_some_and(|o| self.is_unlinked(o))
    }

    // === Assignment ===

    /// Appends `record` to the chain under the transaction's group.
    ///
    /// Nothing is appended while replaying; the record is dropped and its
    /// callback runs.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction is not assigned.
    pub fn assign(&self, tx: &Transaction, mut record: LogRecord) -> CoreResult<()> {
        let txg = tx
            .txg()
            .ok_or_else(|| CoreError::invalid_operation("transaction not assigned"))?;
        if self.is_replaying() {
            return Ok(());
        }
        if let RecordBody::Rename(rename) = record.body() {
            // The renamed object's data must not be overtaken by the rename.
            self.chain
                .async_to_sync(Some(rename.object), self.transactions.txgs().last_synced());
        }
        if self.transactions.config().sync_mode == SyncMode::Always {
            record.set_sync(true);
        }

        self.stats.record_logged();
        if let RecordBody::Write(write) = record.body() {
            self.stats.record_write(write.state, write.length);
        }
        self.dirty_max.fetch_max(txg.as_u64(), Ordering::AcqRel);
        self.chain.assign(record, txg);
        Ok(())
    }

    /// Logs a create.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction is not assigned.
    pub fn log_create(&self, tx: &Transaction, record: CreateRecord) -> CoreResult<()> {
        if self.skip_logging(None) {
            return Ok(());
        }
        self.assign(tx, LogRecord::new(RecordBody::Create(record)))
    }

    /// Logs a remove. If the removal unlinked an object, pass it as
    /// `unlinked`: its queued async records are dropped and later writes
    /// to it are not logged.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction is not assigned.
    pub fn log_remove(
        &self,
        tx: &Transaction,
        record: RemoveRecord,
        unlinked: Option<ObjectId>,
    ) -> CoreResult<()> {
        if self.skip_logging(None) {
            return Ok(());
        }
        if let Some(object) = unlinked {
            self.remove_async(object);
            self.mark_unlinked(object);
        }
        self.assign(tx, LogRecord::new(RecordBody::Remove(record)))
    }

    /// Logs a hard link.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction is not assigned.
    pub fn log_link(&self, tx: &Transaction, record: LinkRecord) -> CoreResult<()> {
        if self.skip_logging(None) {
            return Ok(());
        }
        self.assign(tx, LogRecord::new(RecordBody::Link(record)))
    }

    /// Logs a symbolic link.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction is not assigned.
    pub fn log_symlink(&self, tx: &Transaction, record: SymlinkRecord) -> CoreResult<()> {
        if self.skip_logging(None) {
            return Ok(());
        }
        self.assign(tx, LogRecord::new(RecordBody::Symlink(record)))
    }

    /// Logs a rename.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction is not assigned.
    pub fn log_rename(&self, tx: &Transaction, record: RenameRecord) -> CoreResult<()> {
        if self.skip_logging(None) {
            return Ok(());
        }
        self.assign(tx, LogRecord::new(RecordBody::Rename(record)))
    }

    /// Logs a truncate.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction is not assigned.
    pub fn log_truncate(&self, tx: &Transaction, record: TruncateRecord, sync: bool) -> CoreResult<()> {
        if self.skip_logging(Some(record.object)) {
            return Ok(());
        }
        self.assign(tx, LogRecord::new(RecordBody::Truncate(record)).with_sync(sync))
    }

    /// Logs an attribute change.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction is not assigned.
    pub fn log_setattr(&self, tx: &Transaction, record: SetAttrRecord, sync: bool) -> CoreResult<()> {
        if self.skip_logging(Some(record.object)) {
            return Ok(());
        }
        self.assign(tx, LogRecord::new(RecordBody::SetAttr(record)).with_sync(sync))
    }

    /// Logs an access control list change.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction is not assigned.
    pub fn log_acl(&self, tx: &Transaction, record: AclRecord, sync: bool) -> CoreResult<()> {
        if self.skip_logging(Some(record.object)) {
            return Ok(());
        }
        self.assign(tx, LogRecord::new(RecordBody::Acl(record)).with_sync(sync))
    }

    /// Logs a write of `len` bytes at `offset` that has already been
    /// applied to the object store under `tx`.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction is not assigned.
    pub fn log_write(
        &self,
        tx: &Transaction,
        object: ObjectId,
        offset: u64,
        len: u64,
        sync: bool,
    ) -> CoreResult<()> {
        if self.skip_logging(Some(object)) || len == 0 {
            return Ok(());
        }
        let state = choose_write_state(
            self.transactions.config(),
            len,
            sync,
            self.block_size(object),
        );
        self.log_write_records(tx, object, offset, len, sync, state, None)
    }

    fn block_size(&self, object: ObjectId) -> u64 {
        self.transactions
            .store()
            .lookup(object)
            .map_or(self.transactions.config().record_size, |info| info.data_block_size)
    }

    #[allow(clippy::too_many_arguments)]
    fn log_write_records(
        &self,
        tx: &Transaction,
        object: ObjectId,
        mut offset: u64,
        mut resid: u64,
        sync: bool,
        mut state: WriteState,
        mut callback: Option<RecordCallback>,
    ) -> CoreResult<()> {
        let config = self.transactions.config();
        while resid > 0 {
            let len = if state != WriteState::Indirect && resid > config.max_log_data() {
                config.write_split_size()
            } else {
                resid
            };

            let mut data = None;
            if state == WriteState::Copied {
                match self.transactions.store().read(object, offset, len) {
                    Ok(bytes) => data = Some(Bytes::from(bytes)),
                    Err(err) => {
                        debug!(target: "cowtx::zil", %object, error = %err, "read back failed");
                        state = WriteState::NeedCopy;
                    }
                }
            }

            let mut record = LogRecord::new(RecordBody::Write(WriteRecord {
                object,
                offset,
                length: len,
                state,
                data,
                block: None,
            }))
            .with_sync(sync);
            resid -= len;
            offset += len;
            if resid == 0 {
                if let Some(callback) = callback.take() {
                    record = record.with_callback(callback);
                }
            }
            self.assign(tx, record)?;
        }
        Ok(())
    }

    // === Two-phase writes ===

    /// Starts logging a write of about `len` bytes before its data is known.
    #[must_use]
    pub fn begin_write(&self, object: ObjectId, offset: u64, len: u64, sync: bool) -> PendingWrite {
        if self.skip_logging(Some(object)) {
            return PendingWrite::new(object, offset, len, sync, PrecopyState::Unlinked);
        }
        let config = self.transactions.config();
        let state = choose_write_state(config, len, sync, self.block_size(object));
        let precopy = if state == WriteState::Copied && len <= config.max_log_data() {
            PrecopyState::Waiting
        } else {
            PrecopyState::NoPrecopy(state)
        };
        PendingWrite::new(object, offset, len, sync, precopy)
    }

    /// Finishes a write begun with [`IntentLog::begin_write`] once `actual`
    /// bytes were written under `tx`.
    ///
    /// A filled inline buffer is only used when `actual` matches the
    /// planned length; otherwise the data is read back when the record is
    /// written. If the object was unlinked nothing is logged and the
    /// callback runs right away.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction is not assigned.
    pub fn finish_write(&self, tx: &Transaction, write: PendingWrite, actual: u64) -> CoreResult<()> {
        if tx.txg().is_none() {
            return Err(CoreError::invalid_operation("transaction not assigned"));
        }
        let object = write.object();
        let offset = write.offset();
        let planned = write.planned_len();
        let sync = write.is_sync();
        let (state, buffer, callback) = write.into_parts();

        if state == PrecopyState::Unlinked || actual == 0 || self.skip_logging(Some(object)) {
            if let Some(callback) = callback {
                callback();
            }
            return Ok(());
        }

        match (state, buffer) {
            (PrecopyState::Filled, Some(buffer)) if actual == planned => {
                let mut record = LogRecord::new(RecordBody::Write(WriteRecord {
                    object,
                    offset,
                    length: actual,
                    state: WriteState::Copied,
                    data: Some(Bytes::from(buffer)),
                    block: None,
                }))
                .with_sync(sync);
                if let Some(callback) = callback {
                    record = record.with_callback(callback);
                }
                self.assign(tx, record)
            }
            (PrecopyState::NoPrecopy(state), _) => {
                self.log_write_records(tx, object, offset, actual, sync, state, callback)
            }
            _ => {
                debug!(
                    target: "cowtx::zil",
                    %object,
                    planned,
                    actual,
                    "inline copy discarded"
                );
                self.log_write_records(tx, object, offset, actual, sync, WriteState::NeedCopy, callback)
            }
        }
    }

    // === Object lifecycle ===

    /// Drops the queued async records of `object`.
    pub fn remove_async(&self, object: ObjectId) {
        let removed = self
            .chain
            .remove_async(object, self.transactions.txgs().last_synced());
        if removed > 0 {
            debug!(target: "cowtx::zil", %object, removed, "async records dropped");
        }
    }

    /// Records that `object` was unlinked; later writes to it log nothing.
    pub fn mark_unlinked(&self, object: ObjectId) {
        self.unlinked.lock().insert(object);
    }

    // === Commit ===

    /// Makes every record appended so far for `object` (for every object
    /// when `None`) durable, together with all synchronous records.
    ///
    /// # Errors
    ///
    /// Returns an error only if falling back to a group sync is impossible.
    pub fn commit(&self, object: Option<ObjectId>) -> CoreResult<CommitOutcome> {
        self.stats.record_commit();
        if self.transactions.config().sync_mode == SyncMode::Disabled {
            return Ok(CommitOutcome::Skipped);
        }
        if self.failed_at.load(Ordering::Acquire) != 0 || self.transactions.health().is_suspended() {
            return Ok(self.fallback_sync());
        }

        let txgs = self.transactions.txgs();
        self.chain.async_to_sync(object, txgs.last_synced());

        let Some(waiter) = self.assign_commit_marker() else {
            return Ok(self.fallback_sync());
        };
        self.commit_writer(&waiter);

        match waiter.wait() {
            Some(outcome) => {
                if outcome == CommitOutcome::AlreadyStable {
                    self.stats.record_already_stable();
                }
                Ok(outcome)
            }
            None => Ok(self.fallback_sync()),
        }
    }

    fn assign_commit_marker(&self) -> Option<Arc<CommitWaiter>> {
        let tm = &self.transactions;
        let mut tx = tm.begin();
        loop {
            match tm.assign(&mut tx, AssignMode::NoWait) {
                Ok(_) => break,
                Err(err) if err.is_retryable() && !tm.health().is_suspended() => tm.wait(&mut tx),
                Err(err) => {
                    debug!(target: "cowtx::zil::commit", error = %err, "commit marker not assigned");
                    return None;
                }
            }
        }
        let txg = tx.txg()?;
        let waiter = Arc::new(CommitWaiter::new(txg));
        self.chain
            .assign(LogRecord::new(RecordBody::Commit(Some(Arc::clone(&waiter)))), txg);
        tm.commit(&mut tx).ok()?;
        Some(waiter)
    }

    fn fallback_sync(&self) -> CommitOutcome {
        self.stats.record_fallback_sync();
        warn!(target: "cowtx::zil::commit", "log unavailable, waiting for txg sync");
        self.transactions.txgs().wait_synced(TxgId::NONE);
        CommitOutcome::SyncedByTxg
    }

    /// Writes the commit list to the device unless another writer already
    /// completed `waiter`.
    fn commit_writer(&self, waiter: &CommitWaiter) {
        let mut writer = self.issuer.lock();
        if waiter.is_done() {
            return;
        }
        // A failed run dropped records of unsynced groups; until they sync
        // no later marker may be completed from the log.
        if self.failed_at.load(Ordering::Acquire) != 0 {
            debug!(target: "cowtx::zil::commit", txg = waiter.txg().as_u64(), "log failed, commit falls back");
            waiter.fail();
            return;
        }
        self.stats.record_writer_run();

        let txgs = self.transactions.txgs();
        let block_size = self.transactions.config().log_block_size;
        let list = self.chain.take_commit_list(txgs.last_synced());

        let mut waiters = Vec::new();
        let mut written = Vec::new();
        let mut block = BlockBuilder::new(block_size);
        let mut through = None;
        let mut result = Ok(());

        for mut record in list {
            if let RecordBody::Commit(marker) = record.body_mut() {
                waiters.extend(marker.take());
                continue;
            }
            if result.is_err() || record.txg() <= txgs.last_synced() {
                continue;
            }
            match self.resolve_payload(&mut record) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(err) => {
                    result = Err(err);
                    continue;
                }
            }

            record.set_seq(writer.take_seq());
            if !block.fits(&record) && !block.is_empty() {
                let full = std::mem::replace(&mut block, BlockBuilder::new(block_size));
                result = self.write_block(&mut writer, full);
            }
            if result.is_ok() {
                result = block.push(&record);
            }
            through = Some(record.seq());
            written.push(record);
        }

        if result.is_ok() && !block.is_empty() {
            result = self.write_block(&mut writer, block);
        }
        if result.is_ok() && through.is_some() {
            result = writer.flush();
        }

        // Callbacks of written records run before any waiter wakes.
        let records = written.len();
        drop(written);

        match (result, through) {
            (Ok(()), Some(through)) => {
                debug!(
                    target: "cowtx::zil::commit",
                    records,
                    through = through.as_u64(),
                    waiters = waiters.len(),
                    "log write done"
                );
                for waiter in &waiters {
                    waiter.complete(CommitOutcome::Durable { through });
                }
            }
            (Ok(()), None) => {
                for waiter in &waiters {
                    waiter.complete(CommitOutcome::AlreadyStable);
                }
            }
            (Err(err), _) => {
                let open = txgs.open_txg();
                self.failed_at.store(open.as_u64(), Ordering::Release);
                error!(target: "cowtx::zil::commit", error = %err, txg = open.as_u64(), "log write failed");
                for waiter in &waiters {
                    waiter.fail();
                }
            }
        }
    }

    fn write_block(&self, writer: &mut LogWriter, block: BlockBuilder) -> CoreResult<()> {
        writer.write_block(block)?;
        self.stats.record_block();
        Ok(())
    }

    /// Fills in deferred write payloads. Returns `false` if the record
    /// should be skipped because its object is gone.
    fn resolve_payload(&self, record: &mut LogRecord) -> CoreResult<bool> {
        let RecordBody::Write(write) = record.body_mut() else {
            return Ok(true);
        };
        let store = self.transactions.store();
        if write.state == WriteState::Indirect {
            match store.sync_block(write.object, write.offset) {
                Ok(bp) => {
                    write.block = Some(bp);
                    return Ok(true);
                }
                Err(err) => {
                    debug!(target: "cowtx::zil::commit", object = %write.object, error = %err, "indirect write copied");
                    write.state = WriteState::NeedCopy;
                }
            }
        }
        if write.state == WriteState::NeedCopy {
            match store.read(write.object, write.offset, write.length) {
                Ok(data) => {
                    write.data = Some(Bytes::from(data));
                    write.state = WriteState::Copied;
                }
                Err(CoreError::ObjectUnavailable { .. }) => return Ok(false),
                Err(err) => return Err(err),
            }
        }
        Ok(true)
    }

    // === Sync notifications ===

    /// Destroys the records of `synced` and reclaims the device once every
    /// block on it belongs to a synced group.
    pub fn clean(&self, synced: TxgId) {
        let cleaned = self.chain.clean(synced);
        if cleaned > 0 {
            debug!(target: "cowtx::zil", txg = synced.as_u64(), cleaned, "clean");
        }

        let failed_at = self.failed_at.load(Ordering::Acquire);
        let recovered = failed_at != 0 && synced.as_u64() >= failed_at;
        if self.needs_replay() {
            return;
        }
        // The writer may be busy; the next clean reclaims instead.
        let Some(mut writer) = self.issuer.try_lock() else {
            return;
        };
        if (!writer.is_empty() && writer.max_txg() <= synced) || recovered {
            match writer.reclaim() {
                Ok(()) => {
                    debug!(target: "cowtx::zil", txg = synced.as_u64(), "log reclaimed");
                    if recovered {
                        info!(target: "cowtx::zil", "log resumed after write failure");
                        self.failed_at.store(0, Ordering::Release);
                    }
                }
                Err(err) => error!(target: "cowtx::zil", error = %err, "log reclaim failed"),
            }
        }
    }

    // === Replay and close ===

    /// Replays every record of an unsynced group found on the device at
    /// open, in log order. Logging is suppressed while the handler runs.
    ///
    /// Replaying a log that needs no replay does nothing.
    ///
    /// # Errors
    ///
    /// Returns the handler's error or a device read error; the log still
    /// needs replay afterwards.
    pub fn replay(&self, handler: &mut dyn ReplayHandler) -> CoreResult<ReplaySummary> {
        let mut summary = ReplaySummary::default();
        if !self.needs_replay() {
            return Ok(summary);
        }
        let blocks = self.issuer.lock().read_chain()?;
        let last_synced = self.transactions.txgs().last_synced();

        self.replaying.store(true, Ordering::Release);
        let result = self.replay_blocks(&blocks, last_synced, handler, &mut summary);
        self.replaying.store(false, Ordering::Release);
        result?;

        // Reclaim once the replayed changes are stable.
        let open = self.transactions.txgs().open_txg();
        self.issuer.lock().raise_max_txg(open);
        self.needs_replay.store(false, Ordering::Release);
        info!(
            target: "cowtx::zil",
            replayed = summary.replayed,
            skipped = summary.skipped,
            blocks = summary.blocks,
            "replay complete"
        );
        Ok(summary)
    }

    fn replay_blocks(
        &self,
        blocks: &[LogBlock],
        last_synced: TxgId,
        handler: &mut dyn ReplayHandler,
        summary: &mut ReplaySummary,
    ) -> CoreResult<()> {
        for block in blocks {
            summary.blocks += 1;
            for record in &block.records {
                if record.txg() <= last_synced {
                    summary.skipped += 1;
                    continue;
                }
                handler.replay(record)?;
                self.stats.record_replayed();
                summary.replayed += 1;
            }
        }
        Ok(())
    }

    /// Commits everything and waits until the last group holding records
    /// of this log has synced.
    ///
    /// # Errors
    ///
    /// Returns an error if the final commit fails.
    pub fn close(&self) -> CoreResult<()> {
        self.commit(None)?;
        let dirty = TxgId::new(self.dirty_max.load(Ordering::Acquire));
        let txgs = self.transactions.txgs();
        if dirty > txgs.last_synced() {
            txgs.wait_synced(dirty);
        }
        debug!(target: "cowtx::zil", pending = self.chain.len(), "intent log closed");
        Ok(())
    }
}

impl TxgListener for IntentLog {
    fn txg_synced(&self, txg: TxgId) {
        self.clean(txg);
    }
}

impl std::fmt::Debug for IntentLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntentLog")
            .field("pending", &self.chain.len())
            .field("replaying", &self.is_replaying())
            .field("needs_replay", &self.needs_replay())
            .field("stats", &self.stats.snapshot())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::object::{InMemoryObjectStore, ObjectKind, ObjectStore};
    use crate::pool::{Pool, TxgScheduler};
    use cowtx_storage::{InMemoryBackend, StorageError, StorageResult};
    use parking_lot::Condvar;
    use std::sync::atomic::AtomicUsize;
    use std::thread;
    use std::time::Duration;

    const DIR: ObjectId = ObjectId(1);
    const A: ObjectId = ObjectId(2);
    const B: ObjectId = ObjectId(3);

    struct Fixture {
        pool: Pool,
        store: Arc<InMemoryObjectStore>,
        device: InMemoryBackend,
        log: Arc<IntentLog>,
    }

    fn create_log_with(config: Config) -> Fixture {
        let store = Arc::new(InMemoryObjectStore::new());
        store.create(DIR, ObjectKind::Zap, 4096);
        store.create(A, ObjectKind::Plain, 128 * 1024);
        store.create(B, ObjectKind::Plain, 128 * 1024);
        let pool = Pool::new(config, Arc::clone(&store) as Arc<dyn ObjectStore>, 1 << 40);
        let device = InMemoryBackend::new();
        let log = pool.open_log(Box::new(device.clone())).unwrap();
        Fixture {
            pool,
            store,
            device,
            log,
        }
    }

    fn create_log() -> Fixture {
        create_log_with(Config::default())
    }

    fn assigned(pool: &Pool) -> Transaction {
        let tm = pool.transactions();
        let mut tx = tm.begin();
        tm.assign(&mut tx, AssignMode::Wait).unwrap();
        tx
    }

    fn create_record(object: ObjectId, name: &str) -> CreateRecord {
        CreateRecord {
            kind: CreateKind::File,
            parent: DIR,
            object,
            mode: 0o100_644,
            name: name.to_string(),
            acl: None,
        }
    }

    fn log_create(f: &Fixture, object: ObjectId, name: &str) {
        let mut tx = assigned(&f.pool);
        f.log.log_create(&tx, create_record(object, name)).unwrap();
        f.pool.transactions().commit(&mut tx).unwrap();
    }

    /// Applies `data` to the store and logs the write.
    fn write(f: &Fixture, object: ObjectId, offset: u64, data: &[u8], sync: bool) {
        let tm = f.pool.transactions();
        let mut tx = tm.begin();
        tx.hold_write(object, offset, data.len() as u64).unwrap();
        let txg = tm.assign(&mut tx, AssignMode::Wait).unwrap();
        f.store.write(object, offset, data, txg).unwrap();
        f.log
            .log_write(&tx, object, offset, data.len() as u64, sync)
            .unwrap();
        tm.commit(&mut tx).unwrap();
    }

    /// Drains the chain without writing it.
    fn drain(log: &IntentLog) -> Vec<LogRecord> {
        log.chain.async_to_sync(None, TxgId::NONE);
        log.chain.take_commit_list(TxgId::NONE)
    }

    fn writes(records: &[LogRecord]) -> Vec<&WriteRecord> {
        records
            .iter()
            .filter_map(|r| match r.body() {
                RecordBody::Write(w) => Some(w),
                _ => None,
            })
            .collect()
    }

    #[derive(Default)]
    struct Recorder {
        seen: Vec<String>,
        data: Vec<(ObjectId, u64, Vec<u8>)>,
    }

    impl ReplayHandler for Recorder {
        fn create(&mut self, record: &CreateRecord) -> CoreResult<()> {
            self.seen.push(format!("create {}", record.name));
            Ok(())
        }

        fn remove(&mut self, record: &RemoveRecord) -> CoreResult<()> {
            self.seen.push(format!("remove {}", record.name));
            Ok(())
        }

        fn rename(&mut self, record: &RenameRecord) -> CoreResult<()> {
            self.seen.push(format!("rename {}", record.dst_name));
            Ok(())
        }

        fn write(&mut self, record: &WriteRecord) -> CoreResult<()> {
            self.seen.push(format!("write {}", record.object));
            if let Some(data) = &record.data {
                self.data.push((record.object, record.offset, data.to_vec()));
            }
            Ok(())
        }
    }

    fn replay_device(config: Config, store: &Arc<InMemoryObjectStore>, device: &InMemoryBackend) -> Recorder {
        let pool = Pool::reopen(
            config,
            Arc::clone(store) as Arc<dyn ObjectStore>,
            1 << 40,
            TxgId::NONE,
        );
        let log = pool.open_log(Box::new(device.clone())).unwrap();
        let mut recorder = Recorder::default();
        log.replay(&mut recorder).unwrap();
        recorder
    }

    /// A device whose writes always fail.
    struct BrokenDevice;

    impl StorageBackend for BrokenDevice {
        fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
            Err(StorageError::ReadPastEnd {
                offset,
                len,
                size: 0,
            })
        }

        fn append(&mut self, _data: &[u8]) -> StorageResult<u64> {
            Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "injected write error",
            )))
        }

        fn flush(&mut self) -> StorageResult<()> {
            Ok(())
        }

        fn size(&self) -> StorageResult<u64> {
            Ok(0)
        }

        fn sync(&mut self) -> StorageResult<()> {
            Ok(())
        }

        fn truncate(&mut self, _new_size: u64) -> StorageResult<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct Gate {
        state: Mutex<(bool, bool)>,
        changed: Condvar,
    }

    impl Gate {
        fn wait_entered(&self) {
            let mut state = self.state.lock();
            while !state.0 {
                self.changed.wait(&mut state);
            }
        }

        fn release(&self) {
            self.state.lock().1 = true;
            self.changed.notify_all();
        }
    }

    /// A device whose appends block until released, then fail.
    struct GatedDevice {
        gate: Arc<Gate>,
    }

    impl StorageBackend for GatedDevice {
        fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
            BrokenDevice.read_at(offset, len)
        }

        fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
            let mut state = self.gate.state.lock();
            state.0 = true;
            self.gate.changed.notify_all();
            while !state.1 {
                self.gate.changed.wait(&mut state);
            }
            drop(state);
            BrokenDevice.append(data)
        }

        fn flush(&mut self) -> StorageResult<()> {
            Ok(())
        }

        fn size(&self) -> StorageResult<u64> {
            Ok(0)
        }

        fn sync(&mut self) -> StorageResult<()> {
            Ok(())
        }

        fn truncate(&mut self, _new_size: u64) -> StorageResult<()> {
            Ok(())
        }
    }

    // === Write states ===

    #[test]
    fn small_sync_write_is_logged_inline() {
        let f = create_log();
        write(&f, A, 0, b"0123456789", true);

        let records = drain(&f.log);
        let writes = writes(&records);
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].state, WriteState::Copied);
        assert_eq!(writes[0].length, 10);
        assert_eq!(writes[0].data.as_deref(), Some(&b"0123456789"[..]));
    }

    #[test]
    fn large_async_write_defers_payload() {
        let f = create_log();
        let data = vec![7u8; 40 * 1024];
        write(&f, A, 0, &data, false);

        let records = drain(&f.log);
        let writes = writes(&records);
        assert_eq!(writes.len(), 1);
        assert_ne!(writes[0].state, WriteState::Copied);
        assert!(writes[0].data.is_none());
        assert_eq!(writes[0].length, data.len() as u64);
    }

    #[test]
    fn long_copied_write_is_split() {
        let config = Config::default()
            .log_block_size(4096)
            .immediate_write_size(1 << 20);
        let f = create_log_with(config);
        let data: Vec<u8> = (0..5000u32).map(|i| i as u8).collect();
        write(&f, A, 0, &data, true);

        let records = drain(&f.log);
        let writes = writes(&records);
        let lengths: Vec<u64> = writes.iter().map(|w| w.length).collect();
        // The remainder fits one record once it is at most the record limit.
        assert_eq!(lengths, vec![2048, 2952]);
        assert!(writes.iter().all(|w| w.state == WriteState::Copied));
        assert_eq!(writes[1].offset, 2048);
    }

    #[test]
    fn unreadable_copied_write_falls_back_to_need_copy() {
        let f = create_log();
        f.store.inject_read_fault(A);
        write(&f, A, 0, b"abc", true);

        let records = drain(&f.log);
        assert_eq!(writes(&records)[0].state, WriteState::NeedCopy);
    }

    // === Two-phase writes ===

    #[test]
    fn filled_precopy_is_used_when_lengths_match() {
        let f = create_log();
        let tm = f.pool.transactions();
        let mut pending = f.log.begin_write(A, 0, 10, true);
        assert_eq!(pending.state(), PrecopyState::Waiting);
        pending.buffer_mut().unwrap().copy_from_slice(b"abcdefghij");
        pending.mark_filled();

        let mut tx = tm.begin();
        tx.hold_write(A, 0, 10).unwrap();
        let txg = tm.assign(&mut tx, AssignMode::Wait).unwrap();
        f.store.write(A, 0, b"abcdefghij", txg).unwrap();
        f.log.finish_write(&tx, pending, 10).unwrap();
        tm.commit(&mut tx).unwrap();

        let records = drain(&f.log);
        let writes = writes(&records);
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].state, WriteState::Copied);
        assert_eq!(writes[0].data.as_deref(), Some(&b"abcdefghij"[..]));
    }

    #[test]
    fn short_write_discards_precopy() {
        let f = create_log();
        let tm = f.pool.transactions();
        let mut pending = f.log.begin_write(A, 0, 10, true);
        pending.buffer_mut().unwrap().copy_from_slice(b"abcdefghij");
        pending.mark_filled();

        let mut tx = assigned(&f.pool);
        f.log.finish_write(&tx, pending, 6).unwrap();
        tm.commit(&mut tx).unwrap();

        let records = drain(&f.log);
        let writes = writes(&records);
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].state, WriteState::NeedCopy);
        assert_eq!(writes[0].length, 6);
        assert!(writes[0].data.is_none());
    }

    #[test]
    fn finished_write_to_unlinked_object_only_runs_callback() {
        let f = create_log();
        let ran = Arc::new(AtomicBool::new(false));
        let mut pending = f.log.begin_write(A, 0, 10, true);
        let flag = Arc::clone(&ran);
        pending.set_callback(Box::new(move || flag.store(true, Ordering::SeqCst)));
        f.log.mark_unlinked(A);

        let mut tx = assigned(&f.pool);
        f.log.finish_write(&tx, pending, 10).unwrap();
        f.pool.transactions().commit(&mut tx).unwrap();

        assert!(ran.load(Ordering::SeqCst));
        assert_eq!(f.log.pending_records(), 0);
        assert_eq!(f.log.begin_write(A, 0, 10, true).state(), PrecopyState::Unlinked);
    }

    #[test]
    fn zero_length_write_logs_nothing() {
        let f = create_log();
        let pending = f.log.begin_write(A, 0, 10, false);
        let mut tx = assigned(&f.pool);
        f.log.finish_write(&tx, pending, 0).unwrap();
        f.pool.transactions().commit(&mut tx).unwrap();
        assert_eq!(f.log.pending_records(), 0);
    }

    // === Ordering ===

    #[test]
    fn async_records_wait_for_their_object() {
        let f = create_log();
        write(&f, A, 0, b"hello", false);
        assert_eq!(f.log.pending_async(A), 1);

        assert_eq!(f.log.commit(Some(B)).unwrap(), CommitOutcome::AlreadyStable);
        assert_eq!(f.log.pending_async(A), 1);

        assert!(matches!(
            f.log.commit(Some(A)).unwrap(),
            CommitOutcome::Durable { .. }
        ));
        assert_eq!(f.log.pending_async(A), 0);
    }

    #[test]
    fn rename_is_written_after_renamed_objects_data() {
        let f = create_log();
        write(&f, A, 0, b"data", false);
        let mut tx = assigned(&f.pool);
        f.log
            .log_rename(
                &tx,
                RenameRecord {
                    object: A,
                    src_parent: DIR,
                    src_name: "a".into(),
                    dst_parent: DIR,
                    dst_name: "b".into(),
                },
            )
            .unwrap();
        f.pool.transactions().commit(&mut tx).unwrap();
        assert_eq!(f.log.pending_async(A), 0);

        f.log.commit(Some(B)).unwrap();
        let replayed = replay_device(Config::default(), &f.store, &f.device);
        assert_eq!(replayed.seen, vec![format!("write {A}"), "rename b".to_string()]);
    }

    #[test]
    fn removing_last_link_drops_async_records() {
        let f = create_log();
        write(&f, A, 0, b"doomed", false);
        let mut tx = assigned(&f.pool);
        f.log
            .log_remove(
                &tx,
                RemoveRecord {
                    directory: false,
                    parent: DIR,
                    name: "a".into(),
                },
                Some(A),
            )
            .unwrap();
        f.pool.transactions().commit(&mut tx).unwrap();
        assert_eq!(f.log.pending_async(A), 0);

        write(&f, A, 0, b"ignored", true);
        f.log.commit(None).unwrap();
        let replayed = replay_device(Config::default(), &f.store, &f.device);
        assert_eq!(replayed.seen, vec!["remove a".to_string()]);
    }

    // === Commit ===

    #[test]
    fn commit_makes_records_durable() {
        let f = create_log();
        log_create(&f, A, "a");
        let outcome = f.log.commit(None).unwrap();
        assert!(matches!(outcome, CommitOutcome::Durable { .. }));
        assert!(f.device.size().unwrap() > 0);
        assert_eq!(f.log.pending_records(), 0);

        let stats = f.log.stats().snapshot();
        assert_eq!(stats.commits, 1);
        assert_eq!(stats.blocks_written, 1);
    }

    #[test]
    fn repeated_commit_is_already_stable() {
        let f = create_log();
        log_create(&f, A, "a");
        f.log.commit(None).unwrap();
        let size = f.device.size().unwrap();

        assert_eq!(f.log.commit(None).unwrap(), CommitOutcome::AlreadyStable);
        assert_eq!(f.log.commit(None).unwrap(), CommitOutcome::AlreadyStable);
        assert_eq!(f.device.size().unwrap(), size);
        assert_eq!(f.log.stats().snapshot().already_stable, 2);
    }

    #[test]
    fn records_of_synced_group_are_not_written() {
        let f = create_log();
        log_create(&f, A, "a");
        f.pool.sync();
        assert_eq!(f.log.pending_records(), 0);
        assert_eq!(f.log.commit(None).unwrap(), CommitOutcome::AlreadyStable);
        assert_eq!(f.device.size().unwrap(), 0);
    }

    #[test]
    fn concurrent_commits_all_return() {
        let f = create_log();
        let f = Arc::new(f);
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let f = Arc::clone(&f);
                thread::spawn(move || {
                    log_create(&f, ObjectId::new(100 + i), &format!("f{i}"));
                    f.log.commit(None).unwrap()
                })
            })
            .collect();
        for handle in handles {
            let outcome = handle.join().unwrap();
            assert!(matches!(
                outcome,
                CommitOutcome::Durable { .. } | CommitOutcome::AlreadyStable
            ));
        }

        let stats = f.log.stats().snapshot();
        assert_eq!(stats.commits, 8);
        assert!(stats.writer_runs <= 8);
        let replayed = replay_device(Config::default(), &f.store, &f.device);
        assert_eq!(replayed.seen.len(), 8);
    }

    #[test]
    fn disabled_sync_skips_commit() {
        let f = create_log_with(Config::default().sync_mode(SyncMode::Disabled));
        log_create(&f, A, "a");
        assert_eq!(f.log.commit(None).unwrap(), CommitOutcome::Skipped);
        assert_eq!(f.device.size().unwrap(), 0);
    }

    #[test]
    fn always_sync_puts_writes_on_sync_list() {
        let f = create_log_with(Config::default().sync_mode(SyncMode::Always));
        write(&f, A, 0, b"now", false);
        assert_eq!(f.log.pending_async(A), 0);
        assert!(matches!(
            f.log.commit(Some(B)).unwrap(),
            CommitOutcome::Durable { .. }
        ));
    }

    #[test]
    fn suspended_pool_falls_back_to_txg_sync() {
        let f = create_log();
        f.pool.start_sync_thread(Duration::from_millis(5));
        log_create(&f, A, "a");
        f.pool.health().suspend();

        assert_eq!(f.log.commit(None).unwrap(), CommitOutcome::SyncedByTxg);
        assert_eq!(f.log.stats().snapshot().fallback_syncs, 1);
        f.pool.health().resume();
        f.pool.shutdown();
    }

    #[test]
    fn failed_log_write_falls_back_to_txg_sync() {
        let f = create_log();
        f.pool.start_sync_thread(Duration::from_millis(5));
        let log = f.pool.open_log(Box::new(BrokenDevice)).unwrap();

        let mut tx = assigned(&f.pool);
        log.log_create(&tx, create_record(A, "a")).unwrap();
        f.pool.transactions().commit(&mut tx).unwrap();

        assert_eq!(log.commit(None).unwrap(), CommitOutcome::SyncedByTxg);
        assert_eq!(log.stats().snapshot().fallback_syncs, 1);
        f.pool.shutdown();
    }

    #[test]
    fn commit_queued_behind_failed_write_falls_back() {
        let f = create_log();
        let gate = Arc::new(Gate::default());
        let log = f
            .pool
            .open_log(Box::new(GatedDevice {
                gate: Arc::clone(&gate),
            }))
            .unwrap();

        let mut tx = assigned(&f.pool);
        log.log_create(&tx, create_record(A, "a")).unwrap();
        f.pool.transactions().commit(&mut tx).unwrap();

        let first = {
            let log = Arc::clone(&log);
            thread::spawn(move || log.commit(None).unwrap())
        };
        gate.wait_entered();

        // Passes the health check while the first writer is still inside
        // the failing append.
        let second = {
            let log = Arc::clone(&log);
            thread::spawn(move || log.commit(None).unwrap())
        };
        thread::sleep(Duration::from_millis(20));
        gate.release();

        for _ in 0..500 {
            if second.is_finished() || log.stats().snapshot().fallback_syncs >= 2 {
                break;
            }
            thread::sleep(Duration::from_millis(2));
        }
        assert!(
            !second.is_finished(),
            "commit returned before the group synced"
        );
        assert_eq!(f.pool.txgs().last_synced(), TxgId::NONE);

        f.pool.start_sync_thread(Duration::from_millis(5));
        assert_eq!(first.join().unwrap(), CommitOutcome::SyncedByTxg);
        assert_eq!(second.join().unwrap(), CommitOutcome::SyncedByTxg);
        f.pool.shutdown();
    }

    // === Callbacks ===

    #[test]
    fn callback_runs_once_record_is_written() {
        let f = create_log();
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ran);
        let mut tx = assigned(&f.pool);
        let record = LogRecord::new(RecordBody::Create(create_record(A, "a")))
            .with_callback(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }));
        f.log.assign(&tx, record).unwrap();
        f.pool.transactions().commit(&mut tx).unwrap();

        assert_eq!(ran.load(Ordering::SeqCst), 0);
        f.log.commit(None).unwrap();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        f.pool.sync();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn callback_runs_when_group_syncs() {
        let f = create_log();
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        let mut tx = assigned(&f.pool);
        let record = LogRecord::new(RecordBody::Truncate(TruncateRecord {
            object: A,
            offset: 0,
            length: 4096,
        }))
        .with_sync(false)
        .with_callback(Box::new(move || flag.store(true, Ordering::SeqCst)));
        f.log.assign(&tx, record).unwrap();
        f.pool.transactions().commit(&mut tx).unwrap();

        f.pool.sync();
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn assign_requires_assigned_transaction() {
        let f = create_log();
        let tx = f.pool.transactions().begin();
        let err = f.log.log_create(&tx, create_record(A, "a")).unwrap_err();
        assert!(matches!(err, CoreError::InvalidOperation { .. }));
    }

    // === Replay and reclaim ===

    #[test]
    fn replay_after_reopen_applies_unsynced_records() {
        let f = create_log();
        log_create(&f, A, "a");
        write(&f, A, 0, b"payload", true);
        f.log.commit(None).unwrap();

        let pool = Pool::reopen(
            Config::default(),
            Arc::clone(&f.store) as Arc<dyn ObjectStore>,
            1 << 40,
            TxgId::NONE,
        );
        let log = pool.open_log(Box::new(f.device.clone())).unwrap();
        assert!(log.needs_replay());

        let mut recorder = Recorder::default();
        let summary = log.replay(&mut recorder).unwrap();
        assert_eq!(summary.replayed, 2);
        assert_eq!(summary.skipped, 0);
        assert_eq!(recorder.seen, vec!["create a".to_string(), format!("write {A}")]);
        assert_eq!(recorder.data, vec![(A, 0, b"payload".to_vec())]);
        assert!(!log.needs_replay());
        assert!(!log.is_replaying());

        // A second replay finds nothing to do.
        assert_eq!(log.replay(&mut Recorder::default()).unwrap(), ReplaySummary::default());

        pool.sync();
        assert_eq!(f.device.size().unwrap(), 0);
    }

    #[test]
    fn log_of_synced_groups_is_reclaimed_on_open() {
        let f = create_log();
        log_create(&f, A, "a");
        f.log.commit(None).unwrap();
        assert!(f.device.size().unwrap() > 0);

        let pool = Pool::reopen(
            Config::default(),
            Arc::clone(&f.store) as Arc<dyn ObjectStore>,
            1 << 40,
            TxgId::new(1),
        );
        let log = pool.open_log(Box::new(f.device.clone())).unwrap();
        assert!(!log.needs_replay());
        assert_eq!(f.device.size().unwrap(), 0);
    }

    #[test]
    fn device_is_reclaimed_once_group_syncs() {
        let f = create_log();
        log_create(&f, A, "a");
        f.log.commit(None).unwrap();
        assert!(f.device.size().unwrap() > 0);

        f.pool.sync();
        assert_eq!(f.device.size().unwrap(), 0);
    }

    #[test]
    fn close_waits_for_dirty_groups() {
        let f = create_log();
        f.pool.start_sync_thread(Duration::from_millis(5));
        write(&f, A, 0, b"x", false);
        f.log.close().unwrap();
        assert!(f.pool.txgs().last_synced() >= TxgId::new(1));
        f.pool.shutdown();
    }
}
