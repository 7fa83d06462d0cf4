//! Pool and intent log configuration.

use crate::pool::FailurePolicy;
use crate::zil::{BLOCK_OVERHEAD, WRITE_RECORD_HEADER_SIZE};

/// How synchronous requests are honoured by a dataset's intent log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncMode {
    /// Only operations that ask for it are made durable through the log.
    #[default]
    Standard,
    /// Every logged operation is treated as synchronous.
    Always,
    /// Commit requests return immediately; durability waits for txg sync.
    Disabled,
}

/// Whether the intent log optimizes for latency or throughput.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogBias {
    /// Copy small writes into the log so commit needs no extra reads.
    #[default]
    Latency,
    /// Prefer deferred records and write data straight to the pool.
    Throughput,
}

/// Configuration for a pool's transaction manager and intent logs.
#[derive(Debug, Clone)]
pub struct Config {
    /// Hard ceiling on the write estimate of a single transaction.
    pub max_tx_size: u64,

    /// Hard ceiling on buffers a single free hold may pin.
    pub max_free_memory: u64,

    /// Multiplier turning logical bytes into worst-case allocated bytes
    /// (redundancy copies, gang blocks, metadata ditto blocks).
    pub asize_inflation: u64,

    /// Largest data block size an object can grow to.
    pub record_size: u64,

    /// Writes at or below this size are copied into the log.
    pub immediate_write_size: u64,

    /// Maximum size of one log block.
    pub log_block_size: usize,

    /// Synchronous semantics of the intent log.
    pub sync_mode: SyncMode,

    /// Latency or throughput bias of the intent log.
    pub log_bias: LogBias,

    /// Whether the pool has a dedicated log device.
    pub has_separate_log: bool,

    /// What assignment does while the pool is suspended.
    pub failure_policy: FailurePolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_tx_size: 64 * 1024 * 1024,     // 64 MB
            max_free_memory: 64 * 1024 * 1024, // 64 MB
            asize_inflation: 24,
            record_size: 128 * 1024,          // 128 KB
            immediate_write_size: 32 * 1024,  // 32 KB
            log_block_size: 128 * 1024,       // 128 KB
            sync_mode: SyncMode::Standard,
            log_bias: LogBias::Latency,
            has_separate_log: false,
            failure_policy: FailurePolicy::Wait,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the per-transaction write ceiling.
    #[must_use]
    pub const fn max_tx_size(mut self, bytes: u64) -> Self {
        self.max_tx_size = bytes;
        self
    }

    /// Sets the ceiling on memory pinned by a free hold.
    #[must_use]
    pub const fn max_free_memory(mut self, bytes: u64) -> Self {
        self.max_free_memory = bytes;
        self
    }

    /// Sets the worst-case allocation multiplier.
    #[must_use]
    pub const fn asize_inflation(mut self, factor: u64) -> Self {
        self.asize_inflation = factor;
        self
    }

    /// Sets the maximum data block size.
    #[must_use]
    pub const fn record_size(mut self, bytes: u64) -> Self {
        self.record_size = bytes;
        self
    }

    /// Sets the inline-copy threshold for logged writes.
    #[must_use]
    pub const fn immediate_write_size(mut self, bytes: u64) -> Self {
        self.immediate_write_size = bytes;
        self
    }

    /// Sets the maximum log block size.
    #[must_use]
    pub const fn log_block_size(mut self, bytes: usize) -> Self {
        self.log_block_size = bytes;
        self
    }

    /// Sets the sync mode.
    #[must_use]
    pub const fn sync_mode(mut self, mode: SyncMode) -> Self {
        self.sync_mode = mode;
        self
    }

    /// Sets the log bias.
    #[must_use]
    pub const fn log_bias(mut self, bias: LogBias) -> Self {
        self.log_bias = bias;
        self
    }

    /// Declares whether a dedicated log device is present.
    #[must_use]
    pub const fn has_separate_log(mut self, value: bool) -> Self {
        self.has_separate_log = value;
        self
    }

    /// Sets the failure policy applied while the pool is suspended.
    #[must_use]
    pub const fn failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    /// Largest write payload a single record can carry inside one log block.
    #[must_use]
    pub fn max_log_data(&self) -> u64 {
        self.log_block_size
            .saturating_sub(BLOCK_OVERHEAD + WRITE_RECORD_HEADER_SIZE) as u64
    }

    /// Chunk length used when a write longer than [`Config::max_log_data`]
    /// is split into several records.
    #[must_use]
    pub fn write_split_size(&self) -> u64 {
        (self.log_block_size / 2) as u64
    }
}
