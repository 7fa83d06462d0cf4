//! Object store collaborator interface.

use crate::error::CoreResult;
use crate::types::{ObjectId, TxgId};

/// Block pointers are 128 bytes.
pub const BLKPTR_SHIFT: u8 = 7;

/// Smallest data block size (512 bytes).
pub const MIN_BLOCK_SHIFT: u8 = 9;

/// Smallest indirect block size (4 KiB).
pub const MIN_INDIRECT_SHIFT: u8 = 12;

/// Largest indirect block size (128 KiB).
pub const MAX_INDIRECT_SHIFT: u8 = 17;

/// The object holding every other object's metadata node.
pub const META_OBJECT: ObjectId = ObjectId(0);

/// What an object is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    /// Plain file data.
    Plain,
    /// A name/value container (directory, attribute table).
    Zap,
    /// Internal metadata.
    Meta,
}

/// Shape of an object, as needed for estimation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    /// The object id.
    pub object: ObjectId,
    /// What the object holds.
    pub kind: ObjectKind,
    /// Data block size in bytes.
    pub data_block_size: u64,
    /// log2 of the indirect block size.
    pub indirect_block_shift: u8,
    /// Number of tree levels (1 = data blocks hang directly off the node).
    pub levels: u8,
    /// Highest allocated level-0 block id.
    pub max_block_id: u64,
    /// Birth group of the block holding this object's metadata node, or
    /// `None` if it has never been written.
    pub node_birth: Option<TxgId>,
}

impl ObjectInfo {
    /// log2 of the data block size, or `None` if it is not a power of two
    /// (only possible while the object has a single block).
    #[must_use]
    pub fn data_block_shift(&self) -> Option<u8> {
        let size = self.data_block_size;
        (size.is_power_of_two()).then(|| size.trailing_zeros() as u8)
    }

    /// log2 of block pointers per indirect block.
    #[must_use]
    pub fn epb_shift(&self) -> u8 {
        self.indirect_block_shift - BLKPTR_SHIFT
    }

    /// Size of the object's data in whole blocks.
    #[must_use]
    pub fn data_span(&self) -> u64 {
        (self.max_block_id + 1).saturating_mul(self.data_block_size)
    }
}

/// Location and cost of an existing block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockPointer {
    /// Group in which the block was written.
    pub birth: TxgId,
    /// Bytes the block occupies on disk.
    pub allocated_size: u64,
}

/// Fill statistics of a name/value container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZapStats {
    /// Whether the container is still a single-block micro container.
    pub micro: bool,
    /// Block size of the container's blocks.
    pub block_size: u64,
    /// Entries currently stored.
    pub entries: u64,
    /// Entries one block (micro) or one leaf (fat) can take.
    pub entries_per_block: u64,
    /// Whether the pointer table lives in its own blocks.
    pub external_pointer_table: bool,
}

impl ZapStats {
    /// Whether adding one entry may overflow a block and force a split
    /// (or, for a micro container, an upgrade).
    #[must_use]
    pub fn add_may_overflow(&self) -> bool {
        self.entries + 1 > self.entries_per_block
    }
}

/// Read-only view of the object store used while estimating holds and
/// fetching deferred log payloads.
///
/// Implementations must be thread-safe; every method may be called with
/// other transactions in flight.
pub trait ObjectStore: Send + Sync {
    /// Looks up an object's current shape.
    ///
    /// # Errors
    ///
    /// Returns [`crate::CoreError::ObjectUnavailable`] if the object does not exist.
    fn lookup(&self, object: ObjectId) -> CoreResult<ObjectInfo>;

    /// Reads and verifies one block so later dirtying cannot hit an I/O error.
    ///
    /// # Errors
    ///
    /// Returns [`crate::CoreError::VerifyFailed`] if the block cannot be read.
    fn read_verify(&self, object: ObjectId, level: u8, block: u64) -> CoreResult<()>;

    /// Reads object data.
    ///
    /// # Errors
    ///
    /// Returns an error if the object is missing or the read fails.
    fn read(&self, object: ObjectId, offset: u64, len: u64) -> CoreResult<Vec<u8>>;

    /// Returns the pointer of an existing block, or `None` for a hole.
    fn block(&self, object: ObjectId, level: u8, block: u64) -> Option<BlockPointer>;

    /// Liveness predicate: whether a block born in `birth` is still
    /// referenced by a retained snapshot (and so cannot be freed).
    fn is_block_still_referenced(&self, object: ObjectId, birth: TxgId) -> bool;

    /// First allocated block at `level` with id at or after `from`.
    fn next_allocated(&self, object: ObjectId, level: u8, from: u64) -> Option<u64>;

    /// Fill statistics of a container, or `None` if the object is not one.
    fn zap_stats(&self, object: ObjectId) -> Option<ZapStats>;

    /// Shape of the object holding metadata nodes.
    fn meta_object(&self) -> ObjectInfo;

    /// Group of the most recent snapshot, `TxgId::NONE` if there is none.
    fn last_snapshot_txg(&self) -> TxgId;

    /// Makes sure the data block containing `offset` is written and returns
    /// its pointer, so a log record can reference it instead of copying.
    ///
    /// # Errors
    ///
    /// Returns an error if the block cannot be written.
    fn sync_block(&self, object: ObjectId, offset: u64) -> CoreResult<BlockPointer>;
}
