//! In-memory object store.

use crate::error::{CoreError, CoreResult};
use crate::object::store::{
    BlockPointer, ObjectInfo, ObjectKind, ObjectStore, ZapStats, MAX_INDIRECT_SHIFT, META_OBJECT,
};
use crate::types::{ObjectId, TxgId};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap, HashSet};

#[derive(Debug)]
struct MemObject {
    info: ObjectInfo,
    data: Vec<u8>,
    blocks: BTreeMap<(u8, u64), BlockPointer>,
    zap: Option<ZapStats>,
}

/// An object store kept entirely in memory.
///
/// Objects have a single block pointer in their node, so every level above
/// zero has exactly one block covering the first `epb^level` data blocks.
/// Verification faults and data read failures can be injected to exercise
/// error paths.
///
/// # Example
///
/// ```rust
/// use cowtx_core::{InMemoryObjectStore, ObjectId, ObjectKind, ObjectStore, TxgId};
///
/// let store = InMemoryObjectStore::new();
/// store.create(ObjectId::new(1), ObjectKind::Plain, 4096);
/// store.write(ObjectId::new(1), 0, b"hello", TxgId::new(1)).unwrap();
/// assert_eq!(store.read(ObjectId::new(1), 0, 5).unwrap(), b"hello");
/// ```
#[derive(Debug)]
pub struct InMemoryObjectStore {
    objects: RwLock<HashMap<ObjectId, MemObject>>,
    meta: ObjectInfo,
    last_snapshot: RwLock<TxgId>,
    verify_faults: RwLock<HashSet<(ObjectId, u8, u64)>>,
    read_faults: RwLock<HashSet<ObjectId>>,
}

impl Default for InMemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryObjectStore {
    /// Creates an empty store with a two-level metadata object of 16 KiB blocks.
    #[must_use]
    pub fn new() -> Self {
        Self {
            objects: RwLock::new(HashMap::new()),
            meta: ObjectInfo {
                object: META_OBJECT,
                kind: ObjectKind::Meta,
                data_block_size: 16 * 1024,
                indirect_block_shift: 14,
                levels: 2,
                max_block_id: 0,
                node_birth: None,
            },
            last_snapshot: RwLock::new(TxgId::NONE),
            verify_faults: RwLock::new(HashSet::new()),
            read_faults: RwLock::new(HashSet::new()),
        }
    }

    /// Creates an empty object and returns its shape.
    pub fn create(&self, object: ObjectId, kind: ObjectKind, data_block_size: u64) -> ObjectInfo {
        let info = ObjectInfo {
            object,
            kind,
            data_block_size,
            indirect_block_shift: MAX_INDIRECT_SHIFT,
            levels: 1,
            max_block_id: 0,
            node_birth: None,
        };
        self.insert(info.clone());
        info
    }

    /// Inserts an object with an explicit shape (no blocks allocated).
    pub fn insert(&self, info: ObjectInfo) {
        self.objects.write().insert(
            info.object,
            MemObject {
                info,
                data: Vec::new(),
                blocks: BTreeMap::new(),
                zap: None,
            },
        );
    }

    /// Removes an object.
    pub fn remove(&self, object: ObjectId) -> bool {
        self.objects.write().remove(&object).is_some()
    }

    /// Writes data as if group `txg` had synced it, allocating every
    /// touched data block and the indirect blocks above it.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ObjectUnavailable`] if the object does not exist.
    pub fn write(&self, object: ObjectId, offset: u64, data: &[u8], txg: TxgId) -> CoreResult<()> {
        let mut objects = self.objects.write();
        let obj = objects
            .get_mut(&object)
            .ok_or_else(|| CoreError::object_unavailable(object, "no such object"))?;
        if data.is_empty() {
            return Ok(());
        }

        let end = offset as usize + data.len();
        if obj.data.len() < end {
            obj.data.resize(end, 0);
        }
        obj.data[offset as usize..end].copy_from_slice(data);

        let info = &mut obj.info;
        let first = offset / info.data_block_size;
        let last = (end as u64 - 1) / info.data_block_size;
        info.max_block_id = info.max_block_id.max(last);
        info.levels = levels_for(info.max_block_id, info.epb_shift());
        info.node_birth = Some(txg);

        let epbs = u32::from(info.epb_shift());
        for block in first..=last {
            obj.blocks.insert(
                (0, block),
                BlockPointer {
                    birth: txg,
                    allocated_size: info.data_block_size,
                },
            );
            for level in 1..info.levels {
                let parent = block.checked_shr(epbs * u32::from(level)).unwrap_or(0);
                obj.blocks.insert(
                    (level, parent),
                    BlockPointer {
                        birth: txg,
                        allocated_size: 1 << info.indirect_block_shift,
                    },
                );
            }
        }
        Ok(())
    }

    /// Sets the fill statistics reported for a container.
    pub fn set_zap_stats(&self, object: ObjectId, stats: ZapStats) {
        if let Some(obj) = self.objects.write().get_mut(&object) {
            obj.zap = Some(stats);
        }
    }

    /// Records a snapshot taken in `txg`. Every block born at or before it
    /// stays referenced.
    pub fn take_snapshot(&self, txg: TxgId) {
        *self.last_snapshot.write() = txg;
    }

    /// Makes verification reads of one block fail.
    pub fn inject_verify_fault(&self, object: ObjectId, level: u8, block: u64) {
        self.verify_faults.write().insert((object, level, block));
    }

    /// Makes data reads of an object fail.
    pub fn inject_read_fault(&self, object: ObjectId) {
        self.read_faults.write().insert(object);
    }

    /// Removes every injected fault.
    pub fn clear_faults(&self) {
        self.verify_faults.write().clear();
        self.read_faults.write().clear();
    }
}

fn levels_for(max_block_id: u64, epb_shift: u8) -> u8 {
    let mut levels = 1u8;
    let mut covered = max_block_id;
    while covered > 0 {
        covered >>= epb_shift;
        levels += 1;
    }
    levels
}

impl ObjectStore for InMemoryObjectStore {
    fn lookup(&self, object: ObjectId) -> CoreResult<ObjectInfo> {
        self.objects
            .read()
            .get(&object)
            .map(|obj| obj.info.clone())
            .ok_or_else(|| CoreError::object_unavailable(object, "no such object"))
    }

    fn read_verify(&self, object: ObjectId, level: u8, block: u64) -> CoreResult<()> {
        if self.verify_faults.read().contains(&(object, level, block)) {
            return Err(CoreError::VerifyFailed {
                object,
                level,
                block,
                message: "injected checksum error".to_string(),
            });
        }
        if !self.objects.read().contains_key(&object) {
            return Err(CoreError::object_unavailable(object, "no such object"));
        }
        Ok(())
    }

    fn read(&self, object: ObjectId, offset: u64, len: u64) -> CoreResult<Vec<u8>> {
        if self.read_faults.read().contains(&object) {
            return Err(CoreError::VerifyFailed {
                object,
                level: 0,
                block: offset,
                message: "injected read error".to_string(),
            });
        }
        let objects = self.objects.read();
        let obj = objects
            .get(&object)
            .ok_or_else(|| CoreError::object_unavailable(object, "no such object"))?;

        let mut out = vec![0u8; len as usize];
        let start = offset as usize;
        if start < obj.data.len() {
            let end = (start + len as usize).min(obj.data.len());
            out[..end - start].copy_from_slice(&obj.data[start..end]);
        }
        Ok(out)
    }

    fn block(&self, object: ObjectId, level: u8, block: u64) -> Option<BlockPointer> {
        self.objects
            .read()
            .get(&object)
            .and_then(|obj| obj.blocks.get(&(level, block)).copied())
    }

    fn is_block_still_referenced(&self, _object: ObjectId, birth: TxgId) -> bool {
        birth <= *self.last_snapshot.read()
    }

    fn next_allocated(&self, object: ObjectId, level: u8, from: u64) -> Option<u64> {
        let objects = self.objects.read();
        let obj = objects.get(&object)?;
        obj.blocks
            .range((level, from)..=(level, u64::MAX))
            .next()
            .map(|(&(_, block), _)| block)
    }

    fn zap_stats(&self, object: ObjectId) -> Option<ZapStats> {
        self.objects.read().get(&object).and_then(|obj| obj.zap)
    }

    fn meta_object(&self) -> ObjectInfo {
        self.meta.clone()
    }

    fn last_snapshot_txg(&self) -> TxgId {
        *self.last_snapshot.read()
    }

    fn sync_block(&self, object: ObjectId, offset: u64) -> CoreResult<BlockPointer> {
        let objects = self.objects.read();
        let obj = objects
            .get(&object)
            .ok_or_else(|| CoreError::object_unavailable(object, "no such object"))?;
        let block = offset / obj.info.data_block_size;
        obj.blocks.get(&(0, block)).copied().ok_or_else(|| {
            CoreError::object_unavailable(object, format!("block {block} was never written"))
        })
    }
}
