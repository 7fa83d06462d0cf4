//! Property-based test generators using proptest.
//!
//! Provides strategies for generating random configurations, log records
//! and file operation sequences.

use cowtx_core::{
    Config, CreateKind, CreateRecord, LogBias, LogRecord, ObjectId, RecordBody, SyncMode,
    TruncateRecord, WriteRecord, WriteState,
};
use proptest::prelude::*;

/// Strategy for object ids in `1..max`.
pub fn object_id_strategy(max: u64) -> impl Strategy<Value = ObjectId> {
    (1..max).prop_map(ObjectId::new)
}

/// Strategy for directory entry names.
pub fn name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9_]{0,15}").expect("Invalid regex")
}

/// Strategy for write payloads.
pub fn data_strategy(max_len: usize) -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 1..max_len)
}

/// Strategy for configurations that change write-state choices and block
/// packing, but never disable logging.
pub fn config_strategy() -> impl Strategy<Value = Config> {
    (
        prop::sample::select(vec![4096usize, 16 * 1024, 128 * 1024]),
        prop::sample::select(vec![0u64, 4096, 32 * 1024]),
        prop::bool::ANY,
        prop::bool::ANY,
        prop::bool::ANY,
    )
        .prop_map(|(block, immediate, throughput, slog, always)| {
            Config::default()
                .log_block_size(block)
                .immediate_write_size(immediate)
                .log_bias(if throughput {
                    LogBias::Throughput
                } else {
                    LogBias::Latency
                })
                .has_separate_log(slog)
                .sync_mode(if always {
                    SyncMode::Always
                } else {
                    SyncMode::Standard
                })
        })
}

/// Strategy for records that can be written to a log block as they are.
pub fn log_record_strategy() -> impl Strategy<Value = LogRecord> {
    let create = (object_id_strategy(64), name_strategy(), any::<u16>()).prop_map(
        |(object, name, mode)| {
            RecordBody::Create(CreateRecord {
                kind: CreateKind::File,
                parent: ObjectId::new(1),
                object,
                mode: u64::from(mode),
                name,
                acl: None,
            })
        },
    );
    let write = (object_id_strategy(64), 0u64..1 << 20, data_strategy(512)).prop_map(
        |(object, offset, data)| {
            RecordBody::Write(WriteRecord {
                object,
                offset,
                length: data.len() as u64,
                state: WriteState::Copied,
                data: Some(data.into()),
                block: None,
            })
        },
    );
    let truncate = (object_id_strategy(64), any::<u32>(), any::<u32>()).prop_map(
        |(object, offset, length)| {
            RecordBody::Truncate(TruncateRecord {
                object,
                offset: u64::from(offset),
                length: u64::from(length),
            })
        },
    );
    (prop_oneof![create, write, truncate], any::<bool>())
        .prop_map(|(body, sync)| LogRecord::new(body).with_sync(sync))
}

/// One step of a file-system style workload. File indexes refer to files
/// created earlier in the same sequence, modulo how many exist.
#[derive(Debug, Clone)]
pub enum FileOp {
    /// Create a file.
    Create(String),
    /// Write to a file.
    Write {
        /// File index.
        file: usize,
        /// Byte offset.
        offset: u64,
        /// Payload.
        data: Vec<u8>,
        /// Whether the write is synchronous.
        sync: bool,
    },
    /// Free a range.
    Truncate {
        /// File index.
        file: usize,
        /// Byte offset.
        offset: u64,
        /// Length to free.
        length: u64,
    },
    /// Make a file's records durable.
    Fsync(usize),
    /// Sync the open group.
    Sync,
}

/// Strategy for a single operation.
pub fn file_op_strategy() -> impl Strategy<Value = FileOp> {
    prop_oneof![
        2 => name_strategy().prop_map(FileOp::Create),
        4 => (any::<usize>(), 0u64..64 * 1024, data_strategy(8 * 1024), any::<bool>())
            .prop_map(|(file, offset, data, sync)| FileOp::Write { file, offset, data, sync }),
        1 => (any::<usize>(), 0u64..64 * 1024, 1u64..16 * 1024)
            .prop_map(|(file, offset, length)| FileOp::Truncate { file, offset, length }),
        2 => any::<usize>().prop_map(FileOp::Fsync),
        1 => Just(FileOp::Sync),
    ]
}

/// Strategy for an operation sequence of up to `max` steps.
pub fn file_ops_strategy(max: usize) -> impl Strategy<Value = Vec<FileOp>> {
    prop::collection::vec(file_op_strategy(), 1..max)
}
