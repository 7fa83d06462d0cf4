//! Write-state selection for logged writes.

use crate::config::{Config, LogBias};
use crate::types::ObjectId;
use crate::zil::record::{RecordCallback, WriteState};

/// Chooses where the payload of a write of `len` bytes will come from.
///
/// Writes above the immediate threshold that fit one data block are logged
/// by reference to the block, unless a dedicated log device is used for
/// latency. Synchronous writes are copied into the record, everything else
/// is read back when the record is written.
#[must_use]
pub fn choose_write_state(config: &Config, len: u64, sync: bool, block_size: u64) -> WriteState {
    let immediate = match config.log_bias {
        LogBias::Throughput => 0,
        LogBias::Latency => config.immediate_write_size,
    };
    let slogging = config.has_separate_log && config.log_bias == LogBias::Latency;
    if len > immediate && !slogging && len <= block_size {
        WriteState::Indirect
    } else if sync {
        WriteState::Copied
    } else {
        WriteState::NeedCopy
    }
}

/// Progress of a [`PendingWrite`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrecopyState {
    /// The target is unlinked or the log is replaying; nothing is logged.
    Unlinked,
    /// No inline buffer; the record is built at finish with this state.
    NoPrecopy(WriteState),
    /// An inline buffer is waiting for the caller to fill it.
    Waiting,
    /// The inline buffer holds the planned bytes.
    Filled,
}

/// A write whose log record is decided before its data is known.
///
/// Created by [`crate::IntentLog::begin_write`]. When the write will be
/// copied inline the caller gets a buffer to fill while it performs the
/// store write, avoiding a second read. The write is consumed exactly once,
/// by [`crate::IntentLog::finish_write`] or [`PendingWrite::cancel`].
pub struct PendingWrite {
    object: ObjectId,
    offset: u64,
    planned: u64,
    sync: bool,
    state: PrecopyState,
    buffer: Option<Vec<u8>>,
    callback: Option<RecordCallback>,
}

impl PendingWrite {
    pub(crate) fn new(
        object: ObjectId,
        offset: u64,
        planned: u64,
        sync: bool,
        state: PrecopyState,
    ) -> Self {
        let buffer = (state == PrecopyState::Waiting).then(|| vec![0u8; planned as usize]);
        Self {
            object,
            offset,
            planned,
            sync,
            state,
            buffer,
            callback: None,
        }
    }

    /// The written object.
    #[must_use]
    pub fn object(&self) -> ObjectId {
        self.object
    }

    /// Offset of the write.
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Length announced at begin.
    #[must_use]
    pub fn planned_len(&self) -> u64 {
        self.planned
    }

    /// Whether the write was requested synchronously.
    #[must_use]
    pub fn is_sync(&self) -> bool {
        self.sync
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> PrecopyState {
        self.state
    }

    /// The inline buffer to fill, while one is waiting.
    pub fn buffer_mut(&mut self) -> Option<&mut [u8]> {
        match self.state {
            PrecopyState::Waiting => self.buffer.as_deref_mut(),
            _ => None,
        }
    }

    /// Declares the inline buffer filled with the planned bytes.
    ///
    /// # Panics
    ///
    /// Panics if no buffer is waiting to be filled.
    pub fn mark_filled(&mut self) {
        assert_eq!(
            self.state,
            PrecopyState::Waiting,
            "no inline buffer waiting for {}",
            self.object
        );
        self.state = PrecopyState::Filled;
    }

    /// Sets a callback run once the resulting record is destroyed, or at
    /// finish if nothing is logged.
    pub fn set_callback(&mut self, callback: RecordCallback) {
        self.callback = Some(callback);
    }

    /// Abandons the write. The buffer is released and the callback is not run.
    pub fn cancel(self) {}

    pub(crate) fn into_parts(self) -> (PrecopyState, Option<Vec<u8>>, Option<RecordCallback>) {
        (self.state, self.buffer, self.callback)
    }
}

impl std::fmt::Debug for PendingWrite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingWrite")
            .field("object", &self.object)
            .field("offset", &self.offset)
            .field("planned", &self.planned)
            .field("sync", &self.sync)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}
