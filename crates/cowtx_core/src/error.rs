//! Error types for the transaction manager and intent log.

use crate::types::{ObjectId, TxgId};
use std::fmt;
use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Why an assignment attempt has to be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryReason {
    /// Admission control could not reserve the space right now.
    SpaceUnavailable,
    /// The object is still held by a transaction of the previous group.
    ObjectBusy {
        /// The contended object.
        object: ObjectId,
        /// The group the object is still assigned to.
        txg: TxgId,
    },
    /// The pool is suspended and the failure policy is `Wait`.
    PoolSuspended,
    /// A specific group was requested but a different one is open.
    GroupNotOpen {
        /// The requested group.
        requested: TxgId,
        /// The group that is currently open.
        open: TxgId,
    },
}

impl fmt::Display for RetryReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SpaceUnavailable => write!(f, "space temporarily unavailable"),
            Self::ObjectBusy { object, txg } => {
                write!(f, "{object} still assigned to {txg}")
            }
            Self::PoolSuspended => write!(f, "pool suspended"),
            Self::GroupNotOpen { requested, open } => {
                write!(f, "{requested} requested while {open} is open")
            }
        }
    }
}

/// Errors that can occur in core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Log device error.
    #[error("storage error: {0}")]
    Storage(#[from] cowtx_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The assignment attempt must be retried after waiting.
    ///
    /// All holds assigned during the attempt have been released.
    #[error("retry assignment: {0}")]
    Restart(RetryReason),

    /// The pool is suspended and its failure policy is `Continue`.
    #[error("pool is suspended after an unrecoverable I/O failure")]
    PoolSuspended,

    /// The object does not exist or has the wrong type.
    #[error("object {object} unavailable: {reason}")]
    ObjectUnavailable {
        /// The object that was looked up.
        object: ObjectId,
        /// Why it could not be used.
        reason: String,
    },

    /// A verification read issued while adding a hold failed.
    #[error("verification read of {object} level {level} block {block} failed: {message}")]
    VerifyFailed {
        /// The object being read.
        object: ObjectId,
        /// Indirection level of the block.
        level: u8,
        /// Block id at that level.
        block: u64,
        /// Description from the object store.
        message: String,
    },

    /// The estimate exceeds a hard ceiling and can never be admitted.
    #[error("estimate of {estimate} bytes exceeds the limit of {limit} bytes")]
    TooLarge {
        /// The offending estimate.
        estimate: u64,
        /// The ceiling that was exceeded.
        limit: u64,
    },

    /// The reservation exceeds what the pool could ever provide.
    #[error("space request of {requested} bytes exceeds pool capacity of {capacity} bytes")]
    SpaceExhausted {
        /// Worst-case bytes requested.
        requested: u64,
        /// Bytes the pool could still provide.
        capacity: u64,
    },

    /// The operation is not valid in the current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of the invalid operation.
        message: String,
    },

    /// A log block could not be decoded.
    #[error("log corruption: {message}")]
    LogCorrupted {
        /// Description of the corruption.
        message: String,
    },

    /// Checksum mismatch in a log block.
    #[error("checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch {
        /// Expected checksum.
        expected: u32,
        /// Actual checksum.
        actual: u32,
    },

    /// The transaction was aborted before its changes became visible.
    #[error("transaction cancelled")]
    Cancelled,
}

impl CoreError {
    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates an object unavailable error.
    pub fn object_unavailable(object: ObjectId, reason: impl Into<String>) -> Self {
        Self::ObjectUnavailable {
            object,
            reason: reason.into(),
        }
    }

    /// Creates a log corruption error.
    pub fn log_corrupted(message: impl Into<String>) -> Self {
        Self::LogCorrupted {
            message: message.into(),
        }
    }

    /// Returns true if waiting and retrying the whole hold-and-assign
    /// sequence can succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Restart(_))
    }

    /// Returns the retry reason if this is a retryable error.
    #[must_use]
    pub fn retry_reason(&self) -> Option<RetryReason> {
        match self {
            Self::Restart(reason) => Some(*reason),
            _ => None,
        }
    }

    /// Returns a copy suitable for handing to more than one observer.
    ///
    /// Sticky transaction errors are reported at assignment and again on
    /// every later call; wrapped I/O errors lose their source but keep the
    /// message.
    #[must_use]
    pub fn duplicate(&self) -> Self {
        match self {
            Self::Storage(e) => Self::Io(io::Error::new(io::ErrorKind::Other, e.to_string())),
            Self::Io(e) => Self::Io(io::Error::new(e.kind(), e.to_string())),
            Self::Restart(reason) => Self::Restart(*reason),
            Self::PoolSuspended => Self::PoolSuspended,
            Self::ObjectUnavailable { object, reason } => Self::ObjectUnavailable {
                object: *object,
                reason: reason.clone(),
            },
            Self::VerifyFailed {
                object,
                level,
                block,
                message,
            } => Self::VerifyFailed {
                object: *object,
                level: *level,
                block: *block,
                message: message.clone(),
            },
            Self::TooLarge { estimate, limit } => Self::TooLarge {
                estimate: *estimate,
                limit: *limit,
            },
            Self::SpaceExhausted {
                requested,
                capacity,
            } => Self::SpaceExhausted {
                requested: *requested,
                capacity: *capacity,
            },
            Self::InvalidOperation { message } => Self::InvalidOperation {
                message: message.clone(),
            },
            Self::LogCorrupted { message } => Self::LogCorrupted {
                message: message.clone(),
            },
            Self::ChecksumMismatch { expected, actual } => Self::ChecksumMismatch {
                expected: *expected,
                actual: *actual,
            },
            Self::Cancelled => Self::Cancelled,
        }
    }
}
