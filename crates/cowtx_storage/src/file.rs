//! File-backed log device.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// A regular file used as a dedicated log device.
///
/// # Durability
///
/// - `flush()` pushes buffered bytes and calls `File::sync_data()`, which is
///   the barrier the commit protocol relies on
/// - `sync()` calls `File::sync_all()` so the file length is durable too
///
/// # Example
///
/// ```no_run
/// use cowtx_storage::{StorageBackend, FileBackend};
/// use std::path::Path;
///
/// let mut device = FileBackend::open(Path::new("pool.zil")).unwrap();
/// device.append(b"log block").unwrap();
/// device.flush().unwrap();
/// ```
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    inner: Mutex<FileState>,
}

#[derive(Debug)]
struct FileState {
    file: File,
    size: u64,
}

impl FileBackend {
    /// Opens or creates a log file at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or created.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        let size = file.metadata()?.len();

        Ok(Self {
            path: path.to_path_buf(),
            inner: Mutex::new(FileState { file, size }),
        })
    }

    /// Opens or creates a log file, creating parent directories if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if directories cannot be created or the file cannot be opened.
    pub fn open_with_create_dirs(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::open(path)
    }

    /// Returns the path to the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StorageBackend for FileBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let mut state = self.inner.lock();
        let size = state.size;
        if offset.saturating_add(len as u64) > size {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }
        if len == 0 {
            return Ok(Vec::new());
        }

        state.file.seek(SeekFrom::Start(offset))?;
        let mut buffer = vec![0u8; len];
        state.file.read_exact(&mut buffer)?;
        Ok(buffer)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let state = self.inner.get_mut();
        let offset = state.size;
        if data.is_empty() {
            return Ok(offset);
        }

        state.file.seek(SeekFrom::Start(offset))?;
        state.file.write_all(data)?;
        state.size += data.len() as u64;
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        let state = self.inner.get_mut();
        state.file.flush()?;
        state.file.sync_data()?;
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.inner.lock().size)
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.inner.get_mut().file.sync_all()?;
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let state = self.inner.get_mut();
        if new_size > state.size {
            return Err(StorageError::TruncateBeyondEnd {
                requested: new_size,
                size: state.size,
            });
        }

        state.file.set_len(new_size)?;
        state.file.sync_all()?;
        state.size = new_size;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::tempdir;

    #[test]
    fn open_creates_empty_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pool.zil");

        let device = FileBackend::open(&path).unwrap();
        assert_eq!(device.size().unwrap(), 0);
        assert!(path.exists());
        assert_eq!(device.path(), path);
    }

    #[test]
    fn append_and_read_back() {
        let dir = tempdir().unwrap();
        let mut device = FileBackend::open(&dir.path().join("pool.zil")).unwrap();

        assert_eq!(device.append(b"hello").unwrap(), 0);
        assert_eq!(device.append(b" world").unwrap(), 5);
        assert_eq!(device.append(b"").unwrap(), 11);
        device.flush().unwrap();

        assert_eq!(device.read_at(0, 11).unwrap(), b"hello world");
        assert_eq!(device.read_at(6, 5).unwrap(), b"world");
        assert!(matches!(
            device.read_at(10, 5),
            Err(StorageError::ReadPastEnd { .. })
        ));
    }

    #[test]
    fn contents_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pool.zil");

        {
            let mut device = FileBackend::open(&path).unwrap();
            device.append(b"persistent block").unwrap();
            device.sync().unwrap();
        }

        let device = FileBackend::open(&path).unwrap();
        assert_eq!(device.size().unwrap(), 16);
        assert_eq!(device.read_at(0, 16).unwrap(), b"persistent block");
    }

    #[test]
    fn truncate_then_append_reuses_space() {
        let dir = tempdir().unwrap();
        let mut device = FileBackend::open(&dir.path().join("pool.zil")).unwrap();
        device.append(b"stale chain").unwrap();

        device.truncate(0).unwrap();
        assert_eq!(device.append(b"new").unwrap(), 0);
        assert_eq!(device.read_at(0, 3).unwrap(), b"new");
        assert!(device.truncate(64).is_err());
    }

    #[test]
    fn open_with_create_dirs_builds_parents() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("log").join("pool.zil");

        let device = FileBackend::open_with_create_dirs(&path).unwrap();
        assert_eq!(device.size().unwrap(), 0);
        assert!(path.exists());
    }
    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn appended_chunks_survive_reopen(
            chunks in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 1..512), 1..8),
        ) {
            let dir = tempdir().unwrap();
            let path = dir.path().join("log.bin");
            let mut offsets = Vec::new();
            {
                let mut device = FileBackend::open(&path).unwrap();
                for chunk in &chunks {
                    offsets.push(device.append(chunk).unwrap());
                }
                device.flush().unwrap();
            }

            let device = FileBackend::open(&path).unwrap();
            let total: usize = chunks.iter().map(Vec::len).sum();
            prop_assert_eq!(device.size().unwrap(), total as u64);
            for (chunk, offset) in chunks.iter().zip(&offsets) {
                prop_assert_eq!(&device.read_at(*offset, chunk.len()).unwrap(), chunk);
            }
        }
    }
}
