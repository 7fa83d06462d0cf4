//! A namespace model rebuilt from intent log records.
//!
//! [`NamespaceModel`] is both the expected state a test builds up as it
//! issues operations and a [`ReplayHandler`] that applies replayed records,
//! so a test can compare "what was acknowledged" with "what recovery saw".

use cowtx_core::{
    CoreResult, CreateRecord, LinkRecord, ObjectId, RemoveRecord, RenameRecord, ReplayHandler,
    SetAttrRecord, SymlinkRecord, TruncateRecord, WriteRecord, WriteState,
};
use std::collections::BTreeMap;

/// Directory entries and file contents.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamespaceModel {
    entries: BTreeMap<(ObjectId, String), ObjectId>,
    files: BTreeMap<ObjectId, Vec<u8>>,
    modes: BTreeMap<ObjectId, u64>,
    links: BTreeMap<ObjectId, String>,
    /// Writes that referenced a block instead of carrying data.
    pub indirect_writes: u64,
}

impl NamespaceModel {
    /// Creates an empty model.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an entry and an empty file.
    pub fn apply_create(&mut self, parent: ObjectId, name: &str, object: ObjectId) {
        self.entries.insert((parent, name.to_string()), object);
        self.files.entry(object).or_default();
    }

    /// Removes an entry. The file is dropped once no entry refers to it.
    pub fn apply_remove(&mut self, parent: ObjectId, name: &str) {
        if let Some(object) = self.entries.remove(&(parent, name.to_string())) {
            if !self.entries.values().any(|o| *o == object) {
                self.files.remove(&object);
                self.modes.remove(&object);
                self.links.remove(&object);
            }
        }
    }

    /// Moves an entry.
    pub fn apply_rename(&mut self, src: (ObjectId, &str), dst: (ObjectId, &str)) {
        if let Some(object) = self.entries.remove(&(src.0, src.1.to_string())) {
            self.entries.insert((dst.0, dst.1.to_string()), object);
        }
    }

    /// Writes `data` at `offset`, growing the file with zeros as needed.
    pub fn apply_write(&mut self, object: ObjectId, offset: u64, data: &[u8]) {
        let file = self.files.entry(object).or_default();
        let start = offset as usize;
        let end = start + data.len();
        if file.len() < end {
            file.resize(end, 0);
        }
        file[start..end].copy_from_slice(data);
    }

    /// Zeroes a range; a range reaching past the end shrinks the file.
    pub fn apply_truncate(&mut self, object: ObjectId, offset: u64, length: u64) {
        let file = self.files.entry(object).or_default();
        let start = (offset as usize).min(file.len());
        let end = offset.saturating_add(length);
        if end >= file.len() as u64 {
            file.truncate(start);
        } else {
            file[start..end as usize].fill(0);
        }
    }

    /// Object named `name` in `parent`.
    pub fn lookup(&self, parent: ObjectId, name: &str) -> Option<ObjectId> {
        self.entries.get(&(parent, name.to_string())).copied()
    }

    /// Contents of a file.
    pub fn contents(&self, object: ObjectId) -> Option<&[u8]> {
        self.files.get(&object).map(Vec::as_slice)
    }

    /// Number of directory entries.
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Mode last set on an object.
    pub fn mode(&self, object: ObjectId) -> Option<u64> {
        self.modes.get(&object).copied()
    }
}

impl ReplayHandler for NamespaceModel {
    fn create(&mut self, record: &CreateRecord) -> CoreResult<()> {
        self.apply_create(record.parent, &record.name, record.object);
        self.modes.insert(record.object, record.mode);
        Ok(())
    }

    fn remove(&mut self, record: &RemoveRecord) -> CoreResult<()> {
        self.apply_remove(record.parent, &record.name);
        Ok(())
    }

    fn link(&mut self, record: &LinkRecord) -> CoreResult<()> {
        self.entries
            .insert((record.parent, record.name.clone()), record.object);
        Ok(())
    }

    fn symlink(&mut self, record: &SymlinkRecord) -> CoreResult<()> {
        self.apply_create(record.parent, &record.name, record.object);
        self.links.insert(record.object, record.target.clone());
        Ok(())
    }

    fn rename(&mut self, record: &RenameRecord) -> CoreResult<()> {
        self.apply_rename(
            (record.src_parent, &record.src_name),
            (record.dst_parent, &record.dst_name),
        );
        Ok(())
    }

    fn write(&mut self, record: &WriteRecord) -> CoreResult<()> {
        match (&record.data, record.state) {
            (Some(data), _) => self.apply_write(record.object, record.offset, data),
            (None, WriteState::Indirect) => {
                // The data lives in a block the store already synced.
                self.indirect_writes += 1;
                let file = self.files.entry(record.object).or_default();
                let end = (record.offset + record.length) as usize;
                if file.len() < end {
                    file.resize(end, 0);
                }
            }
            (None, _) => {}
        }
        Ok(())
    }

    fn truncate(&mut self, record: &TruncateRecord) -> CoreResult<()> {
        self.apply_truncate(record.object, record.offset, record.length);
        Ok(())
    }

    fn setattr(&mut self, record: &SetAttrRecord) -> CoreResult<()> {
        self.modes.insert(record.object, record.mode);
        Ok(())
    }
}
