//! Transaction and intent log counters.
//!
//! All counters are relaxed atomics that can be read while operations are in
//! flight. Use `snapshot()` to get a plain struct for comparisons.
//!
//! # Usage
//!
//! ```rust,ignore
//! let pool = Pool::new(Config::default(), store, capacity);
//! // ... run transactions
//! let tx = pool.transactions().stats().snapshot();
//! println!("assigned: {} delayed: {}", tx.assigned, tx.delayed);
//! ```

use crate::zil::WriteState;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters kept by the transaction manager.
#[derive(Debug, Default)]
pub struct TxStats {
    /// Transactions successfully assigned to a group.
    assigned: AtomicU64,
    /// Waits performed between assignment attempts.
    delayed: AtomicU64,
    /// Assignments that failed with a non-retryable error.
    errors: AtomicU64,
    /// Attempts that found the pool suspended.
    suspended: AtomicU64,
    /// Attempts that found an object still held by the previous group.
    group_conflicts: AtomicU64,
    /// Attempts that admission control turned away.
    space_retries: AtomicU64,
    /// Transactions committed.
    committed: AtomicU64,
    /// Transactions aborted.
    aborted: AtomicU64,
}

impl TxStats {
    /// Creates a new stats instance.
    pub fn new() -> Self {
        Self::default()
    }

    // === Increment methods (internal use) ===

    pub(crate) fn record_assigned(&self) {
        self.assigned.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_delay(&self) {
        self.delayed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_suspended(&self) {
        self.suspended.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_group_conflict(&self) {
        self.group_conflicts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_space_retry(&self) {
        self.space_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_commit(&self) {
        self.committed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_abort(&self) {
        self.aborted.fetch_add(1, Ordering::Relaxed);
    }

    // === Getter methods (public API) ===

    /// Returns the number of assigned transactions.
    pub fn assigned(&self) -> u64 {
        self.assigned.load(Ordering::Relaxed)
    }

    /// Returns the number of waits between attempts.
    pub fn delayed(&self) -> u64 {
        self.delayed.load(Ordering::Relaxed)
    }

    /// Returns the number of failed assignments.
    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Returns the number of attempts made while suspended.
    pub fn suspended(&self) -> u64 {
        self.suspended.load(Ordering::Relaxed)
    }

    /// Returns the number of object conflicts with the previous group.
    pub fn group_conflicts(&self) -> u64 {
        self.group_conflicts.load(Ordering::Relaxed)
    }

    /// Returns the number of admission retries.
    pub fn space_retries(&self) -> u64 {
        self.space_retries.load(Ordering::Relaxed)
    }

    /// Returns the number of committed transactions.
    pub fn committed(&self) -> u64 {
        self.committed.load(Ordering::Relaxed)
    }

    /// Returns the number of aborted transactions.
    pub fn aborted(&self) -> u64 {
        self.aborted.load(Ordering::Relaxed)
    }

    /// Returns a snapshot of all counters.
    pub fn snapshot(&self) -> TxStatsSnapshot {
        TxStatsSnapshot {
            assigned: self.assigned(),
            delayed: self.delayed(),
            errors: self.errors(),
            suspended: self.suspended(),
            group_conflicts: self.group_conflicts(),
            space_retries: self.space_retries(),
            committed: self.committed(),
            aborted: self.aborted(),
        }
    }
}

/// A point-in-time copy of [`TxStats`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TxStatsSnapshot {
    /// Transactions successfully assigned.
    pub assigned: u64,
    /// Waits between attempts.
    pub delayed: u64,
    /// Failed assignments.
    pub errors: u64,
    /// Attempts made while suspended.
    pub suspended: u64,
    /// Object conflicts with the previous group.
    pub group_conflicts: u64,
    /// Admission retries.
    pub space_retries: u64,
    /// Committed transactions.
    pub committed: u64,
    /// Aborted transactions.
    pub aborted: u64,
}

/// Counters kept by one intent log.
#[derive(Debug, Default)]
pub struct LogStats {
    /// Records appended to the chain.
    records: AtomicU64,
    /// Write records carrying inline data.
    copied_count: AtomicU64,
    copied_bytes: AtomicU64,
    /// Write records whose data is fetched at commit.
    need_copy_count: AtomicU64,
    need_copy_bytes: AtomicU64,
    /// Write records that point at an already-written block.
    indirect_count: AtomicU64,
    indirect_bytes: AtomicU64,
    /// Calls to commit.
    commits: AtomicU64,
    /// Commit writer runs that touched the device.
    writer_runs: AtomicU64,
    /// Log blocks written.
    blocks_written: AtomicU64,
    /// Commits answered without a log write.
    already_stable: AtomicU64,
    /// Commits that fell back to waiting for a txg sync.
    fallback_syncs: AtomicU64,
    /// Records applied during replay.
    replayed: AtomicU64,
}

impl LogStats {
    /// Creates a new stats instance.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_logged(&self) {
        self.records.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_write(&self, state: WriteState, bytes: u64) {
        let (count, total) = match state {
            WriteState::Copied => (&self.copied_count, &self.copied_bytes),
            WriteState::NeedCopy => (&self.need_copy_count, &self.need_copy_bytes),
            WriteState::Indirect => (&self.indirect_count, &self.indirect_bytes),
        };
        count.fetch_add(1, Ordering::Relaxed);
        total.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn record_commit(&self) {
        self.commits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_writer_run(&self) {
        self.writer_runs.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_block(&self) {
        self.blocks_written.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_already_stable(&self) {
        self.already_stable.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_fallback_sync(&self) {
        self.fallback_syncs.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_replayed(&self) {
        self.replayed.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a snapshot of all counters.
    pub fn snapshot(&self) -> LogStatsSnapshot {
        let get = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        LogStatsSnapshot {
            records: get(&self.records),
            copied_count: get(&self.copied_count),
            copied_bytes: get(&self.copied_bytes),
            need_copy_count: get(&self.need_copy_count),
            need_copy_bytes: get(&self.need_copy_bytes),
            indirect_count: get(&self.indirect_count),
            indirect_bytes: get(&self.indirect_bytes),
            commits: get(&self.commits),
            writer_runs: get(&self.writer_runs),
            blocks_written: get(&self.blocks_written),
            already_stable: get(&self.already_stable),
            fallback_syncs: get(&self.fallback_syncs),
            replayed: get(&self.replayed),
        }
    }
}

/// A point-in-time copy of [`LogStats`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LogStatsSnapshot {
    /// Records appended to the chain.
    pub records: u64,
    /// Inline write records.
    pub copied_count: u64,
    /// Bytes carried inline.
    pub copied_bytes: u64,
    /// Deferred write records.
    pub need_copy_count: u64,
    /// Bytes fetched at commit.
    pub need_copy_bytes: u64,
    /// Indirect write records.
    pub indirect_count: u64,
    /// Bytes referenced by indirect records.
    pub indirect_bytes: u64,
    /// Calls to commit.
    pub commits: u64,
    /// Commit writer runs that touched the device.
    pub writer_runs: u64,
    /// Log blocks written.
    pub blocks_written: u64,
    /// Commits answered without a log write.
    pub already_stable: u64,
    /// Commits that waited for a txg sync instead.
    pub fallback_syncs: u64,
    /// Records applied during replay.
    pub replayed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tx_stats_start_at_zero() {
        let stats = TxStats::new();
        assert_eq!(stats.snapshot(), TxStatsSnapshot::default());
    }

    #[test]
    fn tx_stats_count() {
        let stats = TxStats::new();
        stats.record_assigned();
        stats.record_assigned();
        stats.record_delay();
        stats.record_group_conflict();
        stats.record_commit();

        let snap = stats.snapshot();
        assert_eq!(snap.assigned, 2);
        assert_eq!(snap.delayed, 1);
        assert_eq!(snap.group_conflicts, 1);
        assert_eq!(snap.committed, 1);
        assert_eq!(snap.aborted, 0);
    }

    #[test]
    fn log_stats_split_by_write_state() {
        let stats = LogStats::new();
        stats.record_write(WriteState::Copied, 10);
        stats.record_write(WriteState::NeedCopy, 4096);
        stats.record_write(WriteState::NeedCopy, 4096);
        stats.record_write(WriteState::Indirect, 131_072);

        let snap = stats.snapshot();
        assert_eq!((snap.copied_count, snap.copied_bytes), (1, 10));
        assert_eq!((snap.need_copy_count, snap.need_copy_bytes), (2, 8192));
        assert_eq!((snap.indirect_count, snap.indirect_bytes), (1, 131_072));
    }
}
