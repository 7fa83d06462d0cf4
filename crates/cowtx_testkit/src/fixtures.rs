//! Test fixtures and pool helpers.
//!
//! [`TestPool`] wires an in-memory object store, a pool and one intent log
//! together and offers file-system style operations that hold, assign,
//! mutate the store, log and commit in one call.

use crate::model::NamespaceModel;
use cowtx_core::{
    AssignMode, CommitOutcome, Config, CoreResult, CreateKind, CreateRecord, InMemoryObjectStore,
    IntentLog, ObjectId, ObjectKind, ObjectStore, Pool, RemoveRecord, RenameRecord,
    ReplaySummary, TruncateRecord, TxgId, TxgScheduler, ZapStats, ENTIRE_OBJECT,
};
use cowtx_storage::{FileBackend, InMemoryBackend, StorageBackend};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

/// The root directory every fixture starts with.
pub const ROOT: ObjectId = ObjectId(1);

/// Space given to fixture pools.
pub const POOL_CAPACITY: u64 = 1 << 40;

const FIRST_FILE: u64 = 16;

/// Where a fixture's log lives, so it can be reopened after a crash.
#[derive(Clone)]
pub enum LogDevice {
    /// A shared in-memory device.
    Memory(InMemoryBackend),
    /// A file in a temporary directory.
    File {
        /// Keeps the directory alive.
        dir: Arc<TempDir>,
        /// Path of the log file.
        path: PathBuf,
    },
}

impl LogDevice {
    /// A fresh file-backed device in its own temporary directory.
    pub fn temp_file() -> Self {
        let dir = TempDir::new().expect("Failed to create temp directory");
        let path = dir.path().join("intent.log");
        Self::File {
            dir: Arc::new(dir),
            path,
        }
    }

    /// Opens a backend on the device.
    pub fn open(&self) -> Box<dyn StorageBackend> {
        match self {
            Self::Memory(device) => Box::new(device.clone()),
            Self::File { path, .. } => Box::new(
                FileBackend::open_with_create_dirs(path).expect("Failed to open log file"),
            ),
        }
    }

    /// Current size of the device in bytes.
    pub fn size(&self) -> u64 {
        self.open().size().expect("Failed to read device size")
    }
}

/// A pool with one intent log and a root directory.
pub struct TestPool {
    /// The pool.
    pub pool: Pool,
    /// The object store behind the pool.
    pub store: Arc<InMemoryObjectStore>,
    /// The intent log.
    pub log: Arc<IntentLog>,
    config: Config,
    device: LogDevice,
    next_object: Arc<AtomicU64>,
}

impl TestPool {
    /// Creates a pool with default configuration and an in-memory log.
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    /// Creates a pool with `config` and an in-memory log.
    pub fn with_config(config: Config) -> Self {
        Self::with_device(config, LogDevice::Memory(InMemoryBackend::new()))
    }

    /// Creates a pool whose log is a file in a temporary directory.
    pub fn file() -> Self {
        Self::with_device(Config::default(), LogDevice::temp_file())
    }

    /// Creates a pool logging to `device`.
    pub fn with_device(config: Config, device: LogDevice) -> Self {
        let backend = device.open();
        Self::with_backend(config, device, backend)
    }

    /// Creates a pool whose live log writes through `backend`, while
    /// `device` is what a reopen after a crash will see.
    pub fn with_backend(config: Config, device: LogDevice, backend: Box<dyn StorageBackend>) -> Self {
        let store = Arc::new(InMemoryObjectStore::new());
        store.create(ROOT, ObjectKind::Zap, 4096);
        store.set_zap_stats(ROOT, root_stats());
        let pool = Pool::new(
            config.clone(),
            Arc::clone(&store) as Arc<dyn ObjectStore>,
            POOL_CAPACITY,
        );
        let log = pool.open_log(backend).expect("Failed to open intent log");
        Self {
            pool,
            store,
            log,
            config,
            device,
            next_object: Arc::new(AtomicU64::new(FIRST_FILE)),
        }
    }

    /// The log device.
    pub fn device(&self) -> &LogDevice {
        &self.device
    }

    /// The configuration the pool was created with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Creates a file named `name` in the root directory.
    pub fn create(&self, name: &str) -> CoreResult<ObjectId> {
        let object = ObjectId::new(self.next_object.fetch_add(1, Ordering::Relaxed));
        let tm = self.pool.transactions();
        let mut tx = tm.begin();
        tx.hold_zap(Some(ROOT), true, Some(name))?;
        tx.hold_new_object(0)?;
        tm.assign(&mut tx, AssignMode::Wait)?;

        self.store
            .create(object, ObjectKind::Plain, self.config.record_size);
        self.log.log_create(
            &tx,
            CreateRecord {
                kind: CreateKind::File,
                parent: ROOT,
                object,
                mode: 0o100_644,
                name: name.to_string(),
                acl: None,
            },
        )?;
        tm.commit(&mut tx)?;
        Ok(object)
    }

    /// Writes `data` at `offset` and logs it.
    pub fn write(&self, object: ObjectId, offset: u64, data: &[u8], sync: bool) -> CoreResult<TxgId> {
        let tm = self.pool.transactions();
        let mut tx = tm.begin();
        tx.hold_write(object, offset, data.len() as u64)?;
        tx.hold_bonus(object)?;
        let txg = tm.assign(&mut tx, AssignMode::Wait)?;

        self.store.write(object, offset, data, txg)?;
        self.log
            .log_write(&tx, object, offset, data.len() as u64, sync)?;
        tm.commit(&mut tx)?;
        Ok(txg)
    }

    /// Frees `length` bytes at `offset` and logs it.
    pub fn truncate(&self, object: ObjectId, offset: u64, length: u64) -> CoreResult<TxgId> {
        let tm = self.pool.transactions();
        let mut tx = tm.begin();
        tx.hold_free(object, offset, length)?;
        let txg = tm.assign(&mut tx, AssignMode::Wait)?;
        self.log.log_truncate(
            &tx,
            TruncateRecord {
                object,
                offset,
                length,
            },
            false,
        )?;
        tm.commit(&mut tx)?;
        Ok(txg)
    }

    /// Renames an entry of the root directory.
    pub fn rename(&self, object: ObjectId, from: &str, to: &str) -> CoreResult<TxgId> {
        let tm = self.pool.transactions();
        let mut tx = tm.begin();
        tx.hold_zap(Some(ROOT), false, Some(from))?;
        tx.hold_zap(Some(ROOT), true, Some(to))?;
        let txg = tm.assign(&mut tx, AssignMode::Wait)?;
        self.log.log_rename(
            &tx,
            RenameRecord {
                object,
                src_parent: ROOT,
                src_name: from.to_string(),
                dst_parent: ROOT,
                dst_name: to.to_string(),
            },
        )?;
        tm.commit(&mut tx)?;
        Ok(txg)
    }

    /// Removes the last link to `object`.
    pub fn remove(&self, object: ObjectId, name: &str) -> CoreResult<TxgId> {
        let tm = self.pool.transactions();
        let mut tx = tm.begin();
        tx.hold_zap(Some(ROOT), false, Some(name))?;
        tx.hold_free(object, 0, ENTIRE_OBJECT)?;
        let txg = tm.assign(&mut tx, AssignMode::Wait)?;
        self.log.log_remove(
            &tx,
            RemoveRecord {
                directory: false,
                parent: ROOT,
                name: name.to_string(),
            },
            Some(object),
        )?;
        tm.commit(&mut tx)?;
        Ok(txg)
    }

    /// Makes everything logged for `object` durable.
    pub fn fsync(&self, object: ObjectId) -> CoreResult<CommitOutcome> {
        self.log.commit(Some(object))
    }

    /// Syncs the open group.
    pub fn sync(&self) -> TxgId {
        self.pool.sync()
    }

    /// Simulates a crash: this pool stops and a new one resumes after the
    /// last synced group with the same store and a fresh log opened on the
    /// same device.
    pub fn reopen(self) -> TestPool {
        let last_synced = self.pool.txgs().last_synced();
        let pool = Pool::reopen(
            self.config.clone(),
            Arc::clone(&self.store) as Arc<dyn ObjectStore>,
            POOL_CAPACITY,
            last_synced,
        );
        let log = pool
            .open_log(self.device.open())
            .expect("Failed to reopen intent log");
        self.pool.shutdown();
        TestPool {
            pool,
            store: self.store,
            log,
            config: self.config,
            device: self.device,
            next_object: self.next_object,
        }
    }

    /// Replays the log into a fresh model.
    pub fn replay(&self) -> CoreResult<(NamespaceModel, ReplaySummary)> {
        let mut model = NamespaceModel::new();
        let summary = self.log.replay(&mut model)?;
        Ok((model, summary))
    }

    /// Crashes, reopens and replays; returns what recovery rebuilt.
    pub fn crash_and_replay(self) -> NamespaceModel {
        let reopened = self.reopen();
        let (model, _) = reopened.replay().expect("Replay failed");
        model
    }
}

impl Default for TestPool {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for TestPool {
    type Target = Pool;

    fn deref(&self) -> &Self::Target {
        &self.pool
    }
}

fn root_stats() -> ZapStats {
    ZapStats {
        micro: true,
        block_size: 4096,
        entries: 0,
        entries_per_block: 63,
        external_pointer_table: false,
    }
}

/// Runs a test with a fresh in-memory pool.
///
/// # Example
///
/// ```rust,ignore
/// use cowtx_testkit::with_test_pool;
///
/// #[test]
/// fn my_test() {
///     with_test_pool(|pool| {
///         let file = pool.create("a").unwrap();
///         pool.write(file, 0, b"x", true).unwrap();
///     });
/// }
/// ```
pub fn with_test_pool<F, R>(f: F) -> R
where
    F: FnOnce(&TestPool) -> R,
{
    let pool = TestPool::new();
    f(&pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_and_write() {
        let pool = TestPool::new();
        let file = pool.create("a").unwrap();
        pool.write(file, 0, b"hello", true).unwrap();
        assert_eq!(pool.store.read(file, 0, 5).unwrap(), b"hello");
        assert!(pool.log.pending_records() >= 2);
    }

    #[test]
    fn test_fsync_then_replay() {
        let pool = TestPool::new();
        let file = pool.create("a").unwrap();
        pool.write(file, 0, b"hello", true).unwrap();
        pool.fsync(file).unwrap();

        let model = pool.crash_and_replay();
        assert_eq!(model.lookup(ROOT, "a"), Some(file));
        assert_eq!(model.contents(file), Some(&b"hello"[..]));
    }

    #[test]
    fn test_file_device() {
        let pool = TestPool::file();
        let file = pool.create("a").unwrap();
        pool.fsync(file).unwrap();
        assert!(pool.device().size() > 0);

        let model = pool.crash_and_replay();
        assert_eq!(model.entry_count(), 1);
    }

    #[test]
    fn test_with_test_pool() {
        let outcome = with_test_pool(|pool| {
            let file = pool.create("a").unwrap();
            pool.fsync(file).unwrap()
        });
        assert!(matches!(outcome, CommitOutcome::Durable { .. }));
    }
}
