//! Holds: declared intent to modify an object, with their cost.

use crate::types::ObjectId;
use std::ops::AddAssign;

/// Length marking a free of everything from the offset to the end of the object.
pub const ENTIRE_OBJECT: u64 = u64::MAX;

/// What a hold allows the transaction to modify.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HoldKind {
    /// Write `len` bytes at `offset`.
    Write {
        /// First byte written.
        offset: u64,
        /// Bytes written.
        len: u64,
    },
    /// Free `len` bytes at `offset` ([`ENTIRE_OBJECT`] frees to the end).
    Free {
        /// First byte freed.
        offset: u64,
        /// Bytes freed.
        len: u64,
    },
    /// Modify the object's bonus area.
    Bonus,
    /// Add, update or remove a container entry.
    Zap {
        /// Whether an entry is added.
        add: bool,
        /// The entry name, if known.
        name: Option<String>,
    },
    /// Create a new object.
    NewObject,
    /// Reserve raw space not tied to any object.
    Space {
        /// Bytes reserved.
        bytes: u64,
    },
}

/// Worst-case resources a hold (or a whole transaction) may need.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SpaceEstimate {
    /// Bytes of new space that may be written.
    pub to_write: u64,
    /// Bytes that may be rewritten in place of freeable blocks.
    pub to_overwrite: u64,
    /// Bytes that may be freed.
    pub to_free: u64,
    /// Bytes of existing blocks that may stop being referenced.
    pub to_unref: u64,
    /// Buffers that must be pinned in memory while the change is made.
    pub memory_to_hold: u64,
    /// Allowance for indirect blocks that may appear before assignment.
    pub fudge: u64,
}

impl SpaceEstimate {
    /// Sum of every component.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.to_write
            .saturating_add(self.to_overwrite)
            .saturating_add(self.to_free)
            .saturating_add(self.to_unref)
            .saturating_add(self.memory_to_hold)
            .saturating_add(self.fudge)
    }

    /// Bytes that may be written, new or in place.
    #[must_use]
    pub fn written(&self) -> u64 {
        self.to_write.saturating_add(self.to_overwrite)
    }
}

impl AddAssign for SpaceEstimate {
    fn add_assign(&mut self, other: Self) {
        self.to_write = self.to_write.saturating_add(other.to_write);
        self.to_overwrite = self.to_overwrite.saturating_add(other.to_overwrite);
        self.to_free = self.to_free.saturating_add(other.to_free);
        self.to_unref = self.to_unref.saturating_add(other.to_unref);
        self.memory_to_hold = self.memory_to_hold.saturating_add(other.memory_to_hold);
        self.fudge = self.fudge.saturating_add(other.fudge);
    }
}

impl std::iter::Sum for SpaceEstimate {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), |mut acc, e| {
            acc += e;
            acc
        })
    }
}

/// One declared modification within a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hold {
    object: Option<ObjectId>,
    kind: HoldKind,
    estimate: SpaceEstimate,
}

impl Hold {
    pub(crate) fn new(object: Option<ObjectId>, kind: HoldKind, estimate: SpaceEstimate) -> Self {
        Self {
            object,
            kind,
            estimate,
        }
    }

    /// The held object, `None` for new objects and raw space.
    #[must_use]
    pub fn object(&self) -> Option<ObjectId> {
        self.object
    }

    /// What the hold allows.
    #[must_use]
    pub fn kind(&self) -> &HoldKind {
        &self.kind
    }

    /// The hold's cost.
    #[must_use]
    pub fn estimate(&self) -> &SpaceEstimate {
        &self.estimate
    }
}
