//! In-memory log device.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::sync::Arc;

/// An in-memory log device.
///
/// Clones share the same buffer, so a test can hand one handle to an intent
/// log and keep another to inspect or "reboot" from the bytes that were
/// written.
///
/// # Example
///
/// ```rust
/// use cowtx_storage::{StorageBackend, InMemoryBackend};
///
/// let mut device = InMemoryBackend::new();
/// let observer = device.clone();
/// device.append(b"block").unwrap();
/// assert_eq!(observer.size().unwrap(), 5);
/// ```
#[derive(Debug, Default, Clone)]
pub struct InMemoryBackend {
    data: Arc<RwLock<Vec<u8>>>,
}

impl InMemoryBackend {
    /// Creates a new empty device.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a device holding `data`, as if it had been written before a crash.
    #[must_use]
    pub fn with_data(data: Vec<u8>) -> Self {
        Self {
            data: Arc::new(RwLock::new(data)),
        }
    }

    /// Returns a copy of all bytes on the device.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.data.read().clone()
    }

    /// Overwrites one byte in place. Used to simulate media corruption.
    pub fn corrupt_byte(&self, offset: usize, value: u8) {
        if let Some(byte) = self.data.write().get_mut(offset) {
            *byte = value;
        }
    }
}

impl StorageBackend for InMemoryBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let data = self.data.read();
        let size = data.len() as u64;
        let end = offset.saturating_add(len as u64);

        if end > size {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }

        let start = offset as usize;
        Ok(data[start..start + len].to_vec())
    }

    fn append(&mut self, bytes: &[u8]) -> StorageResult<u64> {
        let mut data = self.data.write();
        let offset = data.len() as u64;
        data.extend_from_slice(bytes);
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.data.read().len() as u64)
    }

    fn sync(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let mut data = self.data.write();
        let size = data.len() as u64;
        if new_size > size {
            return Err(StorageError::TruncateBeyondEnd {
                requested: new_size,
                size,
            });
        }
        data.truncate(new_size as usize);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn new_device_is_empty() {
        let device = InMemoryBackend::new();
        assert_eq!(device.size().unwrap(), 0);
        assert!(device.data().is_empty());
    }

    #[test]
    fn append_returns_offsets_in_order() {
        let mut device = InMemoryBackend::new();
        assert_eq!(device.append(b"hello").unwrap(), 0);
        assert_eq!(device.append(b" world").unwrap(), 5);
        assert_eq!(device.size().unwrap(), 11);
        assert_eq!(device.read_at(6, 5).unwrap(), b"world");
    }

    #[test]
    fn read_past_end_fails() {
        let mut device = InMemoryBackend::new();
        device.append(b"hello").unwrap();

        assert!(matches!(
            device.read_at(10, 5),
            Err(StorageError::ReadPastEnd { .. })
        ));
        assert!(matches!(
            device.read_at(3, 10),
            Err(StorageError::ReadPastEnd { .. })
        ));
        assert!(device.read_at(5, 0).unwrap().is_empty());
    }

    #[test]
    fn clones_share_bytes() {
        let mut writer = InMemoryBackend::new();
        let reader = writer.clone();
        writer.append(b"abc").unwrap();
        assert_eq!(reader.data(), b"abc");

        reader.corrupt_byte(1, b'X');
        assert_eq!(writer.read_at(0, 3).unwrap(), b"aXc");
    }

    #[test]
    fn with_data_preloads_device() {
        let device = InMemoryBackend::with_data(b"preloaded".to_vec());
        assert_eq!(device.size().unwrap(), 9);
        assert_eq!(device.read_at(0, 9).unwrap(), b"preloaded");
    }

    #[test]
    fn truncate_shrinks_but_never_grows() {
        let mut device = InMemoryBackend::new();
        device.append(b"hello world").unwrap();

        device.truncate(5).unwrap();
        assert_eq!(device.read_at(0, 5).unwrap(), b"hello");

        assert!(matches!(
            device.truncate(100),
            Err(StorageError::TruncateBeyondEnd { requested: 100, size: 5 })
        ));

        device.truncate(0).unwrap();
        assert_eq!(device.size().unwrap(), 0);
    }
    proptest! {
        #[test]
        fn appended_chunks_read_back_until_truncated(
            chunks in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 0..256), 1..16),
            keep in 0usize..16,
        ) {
            let mut device = InMemoryBackend::new();
            let mut offsets = Vec::new();
            for chunk in &chunks {
                offsets.push(device.append(chunk).unwrap());
            }
            for (chunk, offset) in chunks.iter().zip(&offsets) {
                prop_assert_eq!(&device.read_at(*offset, chunk.len()).unwrap(), chunk);
            }

            // Cut after the first `keep` chunks; those stay readable.
            let keep = keep.min(chunks.len());
            let cut = chunks[..keep].iter().map(Vec::len).sum::<usize>() as u64;
            device.truncate(cut).unwrap();
            prop_assert_eq!(device.size().unwrap(), cut);
            for (chunk, offset) in chunks[..keep].iter().zip(&offsets) {
                prop_assert_eq!(&device.read_at(*offset, chunk.len()).unwrap(), chunk);
            }
            prop_assert_eq!(device.append(b"next").unwrap(), cut);
        }
    }
}
