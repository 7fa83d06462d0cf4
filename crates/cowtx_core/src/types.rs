//! Core identifier types.

use std::fmt;

/// Number of in-flight transaction groups tracked by per-group rings.
///
/// A group is open, quiescing, syncing or synced; one extra slot keeps the
/// just-synced group around until it is cleaned.
pub const TXG_SIZE: usize = 4;

/// Mask mapping a group number onto a ring slot.
pub const TXG_MASK: u64 = TXG_SIZE as u64 - 1;

/// Number of groups that can be open, quiescing and syncing at once.
pub const TXG_CONCURRENT_STATES: u64 = 3;

/// A transaction group number.
///
/// Groups are numbered from 1 and never reused. `TxgId(0)` means "not
/// assigned" wherever a group is optional in a persistent header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct TxgId(pub u64);

impl TxgId {
    /// The "no group" marker.
    pub const NONE: Self = Self(0);

    /// Creates a new group id.
    #[must_use]
    pub const fn new(txg: u64) -> Self {
        Self(txg)
    }

    /// Returns the raw group number.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the following group.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Returns the preceding group, saturating at zero.
    #[must_use]
    pub const fn prev(self) -> Self {
        Self(self.0.saturating_sub(1))
    }

    /// Ring slot for per-group arrays of size [`TXG_SIZE`].
    #[must_use]
    pub const fn slot(self) -> usize {
        (self.0 & TXG_MASK) as usize
    }
}

impl fmt::Display for TxgId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txg:{}", self.0)
    }
}

/// Identifier of an object (dnode) within a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId(pub u64);

impl ObjectId {
    /// Creates a new object id.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw id.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "obj:{}", self.0)
    }
}

/// Identifier of a transaction, unique within a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TxId(pub u64);

impl TxId {
    /// Creates a new transaction id.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw id.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx:{}", self.0)
    }
}

/// Sequence number stamped on a log record when it is written to a log block.
///
/// Sequence numbers are strictly increasing within one intent log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct LogSeq(pub u64);

impl LogSeq {
    /// Creates a new sequence number.
    #[must_use]
    pub const fn new(seq: u64) -> Self {
        Self(seq)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the next sequence number.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for LogSeq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "seq:{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn txg_slot_wraps_ring() {
        assert_eq!(TxgId::new(1).slot(), 1);
        assert_eq!(TxgId::new(4).slot(), 0);
        assert_eq!(TxgId::new(7).slot(), 3);
        assert_eq!(TxgId::new(8).slot(), TxgId::new(4).slot());
    }

    #[test]
    fn txg_neighbours() {
        let txg = TxgId::new(5);
        assert_eq!(txg.next(), TxgId::new(6));
        assert_eq!(txg.prev(), TxgId::new(4));
        assert_eq!(TxgId::NONE.prev(), TxgId::NONE);
    }

    #[test]
    fn display_formats() {
        assert_eq!(TxgId::new(3).to_string(), "txg:3");
        assert_eq!(ObjectId::new(9).to_string(), "obj:9");
        assert_eq!(TxId::new(2).to_string(), "tx:2");
        assert_eq!(LogSeq::new(11).to_string(), "seq:11");
    }

    #[test]
    fn log_seq_ordering() {
        let a = LogSeq::new(1);
        assert!(a < a.next());
    }
}
