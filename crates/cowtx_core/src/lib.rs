//! # CowTx Core
//!
//! Transactions and intent logging for a copy-on-write object store.
//!
//! This crate provides:
//! - Transaction manager: holds, space estimation, group assignment
//! - Transaction group pipeline with commit callbacks
//! - Space admission and pool suspension handling
//! - Intent log with on-demand commit, replay and reclaim
//!
//! ## Quick Start
//!
//! ```rust
//! use cowtx_core::{AssignMode, Config, InMemoryObjectStore, ObjectId, ObjectKind, Pool};
//! use cowtx_storage::InMemoryBackend;
//! use std::sync::Arc;
//!
//! let store = Arc::new(InMemoryObjectStore::new());
//! store.create(ObjectId::new(1), ObjectKind::Plain, 4096);
//! let pool = Pool::new(Config::default(), store.clone(), 1 << 30);
//! let log = pool.open_log(Box::new(InMemoryBackend::new())).unwrap();
//!
//! let tm = pool.transactions();
//! let mut tx = tm.begin();
//! tx.hold_write(ObjectId::new(1), 0, 5).unwrap();
//! let txg = tm.assign(&mut tx, AssignMode::Wait).unwrap();
//! store.write(ObjectId::new(1), 0, b"hello", txg).unwrap();
//! log.log_write(&tx, ObjectId::new(1), 0, 5, true).unwrap();
//! tm.commit(&mut tx).unwrap();
//!
//! log.commit(Some(ObjectId::new(1))).unwrap();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod object;
mod pool;
mod stats;
mod transaction;
mod types;
mod zil;

pub use config::{Config, LogBias, SyncMode};
pub use error::{CoreError, CoreResult, RetryReason};
pub use object::{
    BlockPointer, InMemoryObjectStore, ObjectHold, ObjectInfo, ObjectKind, ObjectSlot,
    ObjectStore, ObjectTable, ZapStats, META_OBJECT,
};
pub use pool::{
    AdmissionError, CommitCallback, FailurePolicy, PinRelease, Pool, PoolHealth, PoolStatus,
    Reservation, SpaceAdmission, SpaceBudget, SpaceRequest, TxgCoordinator, TxgHold, TxgListener,
    TxgScheduler,
};
pub use stats::{LogStats, LogStatsSnapshot, TxStats, TxStatsSnapshot};
pub use transaction::{
    AssignMode, DirtyBlock, Hold, HoldKind, SpaceEstimate, Transaction, TransactionManager,
    TxState, ENTIRE_OBJECT,
};
pub use types::{LogSeq, ObjectId, TxId, TxgId, TXG_CONCURRENT_STATES, TXG_MASK, TXG_SIZE};
pub use zil::{
    choose_write_state, AclRecord, BlockHeader, CommitOutcome, CommitWaiter, CreateKind,
    CreateRecord, IntentLog, LinkRecord, LogBlock, LogRecord, PendingWrite, PrecopyState,
    RecordBody, RecordCallback, RemoveRecord, RenameRecord, ReplayHandler, ReplaySummary,
    SetAttrRecord, SymlinkRecord, TruncateRecord, TxType, WriteRecord, WriteState,
    BLOCK_HEADER_SIZE, BLOCK_OVERHEAD, LOG_MAGIC, LOG_VERSION, RECORD_HEADER_SIZE,
    WRITE_RECORD_HEADER_SIZE,
};
