//! Objects as seen by the transaction manager.
//!
//! The object store itself (on-disk trees, block allocation, checksums) is an
//! external collaborator reached through [`ObjectStore`]. What lives here is
//! the transaction manager's own per-object state: which transaction group an
//! object is assigned to and how many holds keep it there.

mod memory;
mod store;
mod table;

pub use memory::InMemoryObjectStore;
pub use store::{
    BlockPointer, ObjectInfo, ObjectKind, ObjectStore, ZapStats, BLKPTR_SHIFT, MAX_INDIRECT_SHIFT,
    META_OBJECT, MIN_BLOCK_SHIFT, MIN_INDIRECT_SHIFT,
};
pub use table::{ObjectHold, ObjectSlot, ObjectTable};
