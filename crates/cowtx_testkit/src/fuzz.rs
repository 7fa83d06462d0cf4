//! Fuzz testing harnesses for the intent log.
//!
//! This module provides fuzz targets that can be used with cargo-fuzz
//! or other fuzzing frameworks.

use crate::fixtures::{LogDevice, TestPool};
use crate::model::NamespaceModel;
use cowtx_core::{Config, LogRecord};
use cowtx_storage::InMemoryBackend;

/// Fuzz target for record decoding.
///
/// Tests that arbitrary byte sequences either:
/// - Decode to a record that re-encodes to an equal record, or
/// - Return a proper error (no panics)
pub fn fuzz_record_decode(data: &[u8]) {
    if let Ok((record, used)) = LogRecord::decode(data) {
        assert!(used <= data.len());
        let mut buf = Vec::new();
        if record.encode_into(&mut buf).is_ok() {
            let (again, again_used) =
                LogRecord::decode(&buf).expect("Re-encoded record must decode");
            assert_eq!(again_used, buf.len());
            assert_eq!(again.body(), record.body(), "Roundtrip mismatch");
        }
    }
}

/// Fuzz target for opening and replaying a log device.
///
/// Arbitrary device contents must be treated as a (possibly empty) chain
/// followed by garbage: opening truncates the garbage and replay never
/// panics.
pub fn fuzz_log_device(data: &[u8]) {
    let device = InMemoryBackend::with_data(data.to_vec());
    let pool = TestPool::with_device(Config::default(), LogDevice::Memory(device.clone()));
    assert!(device.data().len() <= data.len());
    assert_eq!(&data[..device.data().len()], device.data().as_slice());

    let mut model = NamespaceModel::new();
    let _ = pool.log.replay(&mut model);
}

/// Fuzz target for operation sequences.
///
/// Tests that arbitrary operation sequences don't cause panics and that
/// every fsynced file replays.
pub fn fuzz_file_operations(data: &[u8]) {
    let pool = TestPool::new();
    let mut files = Vec::new();
    let mut offset = 0;

    while offset + 4 <= data.len() {
        let op = data[offset];
        let arg = u16::from_le_bytes([data[offset + 1], data[offset + 2]]);
        let len = usize::from(data[offset + 3]);
        offset += 4;

        match op % 5 {
            0 => {
                if let Ok(file) = pool.create(&format!("f{}", files.len())) {
                    files.push(file);
                }
            }
            1 if !files.is_empty() => {
                let file = files[usize::from(arg) % files.len()];
                let end = (offset + len).min(data.len());
                let payload = if end > offset {
                    data[offset..end].to_vec()
                } else {
                    vec![0u8; len.max(1)]
                };
                offset = end;
                let _ = pool.write(file, u64::from(arg), &payload, op & 0x80 != 0);
            }
            2 if !files.is_empty() => {
                let file = files[usize::from(arg) % files.len()];
                let _ = pool.truncate(file, u64::from(arg), len as u64 + 1);
            }
            3 if !files.is_empty() => {
                let _ = pool.fsync(files[usize::from(arg) % files.len()]);
            }
            4 => {
                pool.sync();
            }
            _ => {}
        }
    }

    let _ = pool.log.commit(None);
    let _ = pool.crash_and_replay();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fuzz_record_decode_garbage() {
        fuzz_record_decode(&[]);
        fuzz_record_decode(&[0xFF; 64]);
        fuzz_record_decode(&[9, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_fuzz_log_device_garbage() {
        fuzz_log_device(&[]);
        fuzz_log_device(b"CTXL");
        fuzz_log_device(&[0xAB; 512]);
    }

    #[test]
    fn test_fuzz_log_device_valid_prefix() {
        let pool = TestPool::new();
        let file = pool.create("a").unwrap();
        pool.write(file, 0, b"abc", true).unwrap();
        pool.fsync(file).unwrap();
        let LogDevice::Memory(device) = pool.device() else {
            unreachable!()
        };
        let mut data = device.data();
        data.extend_from_slice(&[0x5A; 40]);
        fuzz_log_device(&data);
    }

    #[test]
    fn test_fuzz_file_operations() {
        fuzz_file_operations(&[]);
        fuzz_file_operations(&[0, 0, 0, 0, 1, 5, 0, 10, 3, 0, 0, 0, 4, 0, 0, 0]);
        let seq: Vec<u8> = (0..=255).collect();
        fuzz_file_operations(&seq);
    }
}
