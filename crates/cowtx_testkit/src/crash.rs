//! Crash recovery testing for the intent log.
//!
//! This module provides utilities for testing crash recovery behavior.
//! It simulates crashes at various points of a log commit and verifies
//! that replay rebuilds exactly what was acknowledged.
//!
//! ## Test Strategy
//!
//! 1. **Crash after commit** - fsynced records survive
//! 2. **Crash before commit** - async records that were never committed are gone
//! 3. **Crash during block write** - a torn block ends the chain
//! 4. **Flush failure** - commit falls back to a txg sync
//!
//! ## Usage
//!
//! ```rust,ignore
//! use cowtx_testkit::crash::CrashRecoveryHarness;
//!
//! let mut harness = CrashRecoveryHarness::new();
//! assert!(harness.run_all().iter().all(|r| r.passed));
//! ```

use crate::fixtures::{LogDevice, TestPool, ROOT};
use cowtx_core::{CommitOutcome, Config, CoreError, TxgScheduler};
use cowtx_storage::{InMemoryBackend, StorageBackend, StorageError, StorageResult};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Points at which a crash can be simulated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrashPoint {
    /// Crash before the commit wrote anything.
    BeforeCommit,
    /// Crash in the middle of appending a log block.
    DuringBlockWrite,
    /// The device refuses to flush.
    DuringFlush,
    /// Crash after the commit returned.
    AfterCommit,
}

/// Result of a crash recovery test.
#[derive(Debug, Clone)]
pub struct CrashRecoveryResult {
    /// Whether the test passed.
    pub passed: bool,
    /// Where the crash was injected.
    pub point: CrashPoint,
    /// Description of what was tested.
    pub description: String,
    /// Entries expected after recovery.
    pub expected_entries: usize,
    /// Entries found after recovery.
    pub actual_entries: usize,
    /// Any error message.
    pub error: Option<String>,
}

impl CrashRecoveryResult {
    /// Creates a passing result.
    pub fn pass(point: CrashPoint, description: &str, entries: usize) -> Self {
        Self {
            passed: true,
            point,
            description: description.to_string(),
            expected_entries: entries,
            actual_entries: entries,
            error: None,
        }
    }

    /// Creates a failing result.
    pub fn fail(
        point: CrashPoint,
        description: &str,
        expected: usize,
        actual: usize,
        error: &str,
    ) -> Self {
        Self {
            passed: false,
            point,
            description: description.to_string(),
            expected_entries: expected,
            actual_entries: actual,
            error: Some(error.to_string()),
        }
    }

    fn check(point: CrashPoint, description: &str, expected: usize, actual: usize) -> Self {
        if expected == actual {
            Self::pass(point, description, expected)
        } else {
            Self::fail(point, description, expected, actual, "entry count mismatch")
        }
    }
}

/// Shared switches of a [`CrashableBackend`], usable after the backend has
/// been handed to a log.
#[derive(Debug)]
pub struct CrashControl {
    crash_after_bytes: AtomicUsize,
    bytes_written: AtomicUsize,
    crashed: AtomicBool,
    fail_on_flush: AtomicBool,
}

impl CrashControl {
    fn new() -> Self {
        Self {
            crash_after_bytes: AtomicUsize::new(usize::MAX),
            bytes_written: AtomicUsize::new(0),
            crashed: AtomicBool::new(false),
            fail_on_flush: AtomicBool::new(false),
        }
    }

    /// Sets the backend to crash after writing the specified number of bytes.
    pub fn crash_after(&self, bytes: usize) {
        self.crash_after_bytes.store(bytes, Ordering::SeqCst);
    }

    /// Sets whether flush should fail.
    pub fn set_fail_on_flush(&self, fail: bool) {
        self.fail_on_flush.store(fail, Ordering::SeqCst);
    }

    /// Resets the crash state.
    pub fn reset(&self) {
        self.crash_after_bytes.store(usize::MAX, Ordering::SeqCst);
        self.bytes_written.store(0, Ordering::SeqCst);
        self.crashed.store(false, Ordering::SeqCst);
        self.fail_on_flush.store(false, Ordering::SeqCst);
    }

    /// Returns whether the backend has crashed.
    pub fn has_crashed(&self) -> bool {
        self.crashed.load(Ordering::SeqCst)
    }

    /// Bytes appended so far.
    pub fn bytes_written(&self) -> usize {
        self.bytes_written.load(Ordering::SeqCst)
    }

    /// Blocks until the backend has crashed or `timeout` elapses.
    pub fn wait_crashed(&self, timeout: Duration) -> bool {
        let step = Duration::from_millis(1);
        let mut waited = Duration::ZERO;
        while !self.has_crashed() && waited < timeout {
            thread::sleep(step);
            waited += step;
        }
        self.has_crashed()
    }
}

fn simulated(message: &str) -> StorageError {
    StorageError::Io(std::io::Error::new(std::io::ErrorKind::Other, message.to_string()))
}

/// A storage backend wrapper that can simulate crashes.
pub struct CrashableBackend {
    inner: Box<dyn StorageBackend>,
    control: Arc<CrashControl>,
}

impl CrashableBackend {
    /// Creates a new crashable backend wrapping an inner backend.
    pub fn new(inner: Box<dyn StorageBackend>) -> Self {
        Self {
            inner,
            control: Arc::new(CrashControl::new()),
        }
    }

    /// The switches of this backend.
    pub fn control(&self) -> Arc<CrashControl> {
        Arc::clone(&self.control)
    }
}

impl StorageBackend for CrashableBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        self.inner.read_at(offset, len)
    }

    fn append(&mut self, bytes: &[u8]) -> StorageResult<u64> {
        let control = &self.control;
        let current = control.bytes_written.fetch_add(bytes.len(), Ordering::SeqCst);
        let crash_threshold = control.crash_after_bytes.load(Ordering::SeqCst);

        if control.has_crashed() || current >= crash_threshold {
            control.crashed.store(true, Ordering::SeqCst);
            return Err(simulated("simulated crash during write"));
        }

        // Write partial data up to the crash point
        if current + bytes.len() > crash_threshold {
            control.crashed.store(true, Ordering::SeqCst);
            let partial_len = crash_threshold - current;
            if partial_len > 0 {
                let _ = self.inner.append(&bytes[..partial_len]);
            }
            return Err(simulated("simulated crash during partial write"));
        }

        self.inner.append(bytes)
    }

    fn flush(&mut self) -> StorageResult<()> {
        if self.control.fail_on_flush.load(Ordering::SeqCst) {
            self.control.crashed.store(true, Ordering::SeqCst);
            return Err(simulated("simulated crash during flush"));
        }
        self.inner.flush()
    }

    fn size(&self) -> StorageResult<u64> {
        self.inner.size()
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        self.inner.truncate(new_size)
    }

    fn sync(&mut self) -> StorageResult<()> {
        if self.control.fail_on_flush.load(Ordering::SeqCst) {
            self.control.crashed.store(true, Ordering::SeqCst);
            return Err(simulated("simulated crash during sync"));
        }
        self.inner.sync()
    }
}

/// A [`TestPool`] whose log device can crash.
pub fn crashable_pool(config: Config) -> (TestPool, Arc<CrashControl>) {
    let device = InMemoryBackend::new();
    let backend = CrashableBackend::new(Box::new(device.clone()));
    let control = backend.control();
    let pool = TestPool::with_backend(config, LogDevice::Memory(device), Box::new(backend));
    (pool, control)
}

/// Test harness for crash recovery scenarios.
#[derive(Debug)]
pub struct CrashRecoveryHarness {
    /// Results of crash recovery tests.
    pub results: Vec<CrashRecoveryResult>,
    /// Files created per scenario.
    pub files: usize,
}

impl CrashRecoveryHarness {
    /// Creates a new crash recovery harness.
    pub fn new() -> Self {
        Self {
            results: Vec::new(),
            files: 4,
        }
    }

    fn record(
        &mut self,
        result: Result<CrashRecoveryResult, CoreError>,
        point: CrashPoint,
        description: &str,
    ) -> CrashRecoveryResult {
        let result = result.unwrap_or_else(|e| {
            CrashRecoveryResult::fail(point, description, self.files, 0, &e.to_string())
        });
        self.results.push(result.clone());
        result
    }

    /// Tests that fsynced records survive a crash.
    pub fn test_fsynced_data_survives(&mut self) -> CrashRecoveryResult {
        const WHAT: &str = "fsynced data survives crash";
        let files = self.files;
        let result = (|| {
            let (pool, _control) = crashable_pool(Config::default());
            let mut written = Vec::new();
            for i in 0..files {
                let name = format!("file_{i}");
                let file = pool.create(&name)?;
                pool.write(file, 0, &vec![i as u8; 100], false)?;
                pool.fsync(file)?;
                written.push((name, file, vec![i as u8; 100]));
            }

            let model = pool.crash_and_replay();
            let intact = written
                .iter()
                .filter(|(name, file, data)| {
                    model.lookup(ROOT, name) == Some(*file)
                        && model.contents(*file) == Some(data.as_slice())
                })
                .count();
            Ok(CrashRecoveryResult::check(CrashPoint::AfterCommit, WHAT, files, intact))
        })();
        self.record(result, CrashPoint::AfterCommit, WHAT)
    }

    /// Tests that records never committed are gone after a crash.
    pub fn test_uncommitted_records_discarded(&mut self) -> CrashRecoveryResult {
        const WHAT: &str = "uncommitted records discarded, committed records preserved";
        let result = (|| {
            let (pool, _control) = crashable_pool(Config::default());
            let kept = pool.create("kept")?;
            pool.fsync(kept)?;
            let lost = pool.create("lost")?;
            pool.write(lost, 0, b"never committed", false)?;

            let model = pool.crash_and_replay();
            if model.lookup(ROOT, "lost").is_some() {
                return Ok(CrashRecoveryResult::fail(
                    CrashPoint::BeforeCommit,
                    WHAT,
                    1,
                    model.entry_count(),
                    "uncommitted entry was replayed",
                ));
            }
            Ok(CrashRecoveryResult::check(
                CrashPoint::BeforeCommit,
                WHAT,
                1,
                model.entry_count(),
            ))
        })();
        self.record(result, CrashPoint::BeforeCommit, WHAT)
    }

    /// Tests that a block torn by a crash ends the chain and everything
    /// before it replays.
    pub fn test_torn_block_ends_chain(&mut self) -> CrashRecoveryResult {
        const WHAT: &str = "torn block ends the chain";
        let files = self.files;
        let result = (|| {
            let (pool, control) = crashable_pool(Config::default());
            for i in 0..files {
                let file = pool.create(&format!("file_{i}"))?;
                pool.fsync(file)?;
            }

            control.crash_after(control.bytes_written() + 20);
            pool.create("torn")?;
            // Without a sync thread the failed commit waits for the group
            // until the pool shuts down.
            let log = Arc::clone(&pool.log);
            let commit = thread::spawn(move || log.commit(None));
            if !control.wait_crashed(Duration::from_secs(10)) {
                return Ok(CrashRecoveryResult::fail(
                    CrashPoint::DuringBlockWrite,
                    WHAT,
                    files,
                    0,
                    "commit never reached the device",
                ));
            }

            let reopened = pool.reopen();
            let _ = commit.join();
            let (model, _) = reopened.replay()?;
            Ok(CrashRecoveryResult::check(
                CrashPoint::DuringBlockWrite,
                WHAT,
                files,
                model.entry_count(),
            ))
        })();
        self.record(result, CrashPoint::DuringBlockWrite, WHAT)
    }

    /// Tests that a failing flush makes commit fall back to a txg sync.
    pub fn test_flush_failure_falls_back(&mut self) -> CrashRecoveryResult {
        const WHAT: &str = "flush failure falls back to txg sync";
        let result = (|| {
            let (pool, control) = crashable_pool(Config::default());
            let file = pool.create("a")?;
            let txg = pool.write(file, 0, b"data", true)?;
            control.set_fail_on_flush(true);
            // Groups only advance on request, so the records are still
            // pending when the commit runs.
            pool.start_sync_thread(Duration::from_secs(3600));

            let outcome = pool.fsync(file)?;
            let synced = pool.txgs().last_synced() >= txg;
            pool.shutdown();
            if outcome == CommitOutcome::SyncedByTxg && synced {
                Ok(CrashRecoveryResult::pass(CrashPoint::DuringFlush, WHAT, 1))
            } else {
                Ok(CrashRecoveryResult::fail(
                    CrashPoint::DuringFlush,
                    WHAT,
                    1,
                    0,
                    &format!("commit returned {outcome:?}"),
                ))
            }
        })();
        self.record(result, CrashPoint::DuringFlush, WHAT)
    }

    /// Runs every scenario.
    pub fn run_all(&mut self) -> &[CrashRecoveryResult] {
        self.test_fsynced_data_survives();
        self.test_uncommitted_records_discarded();
        self.test_torn_block_ends_chain();
        self.test_flush_failure_falls_back();
        &self.results
    }
}

impl Default for CrashRecoveryHarness {
    fn default() -> Self {
        Self::new()
    }
}
