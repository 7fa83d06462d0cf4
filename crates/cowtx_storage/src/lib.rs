//! # cowtx storage
//!
//! Byte-store backends that back the intent log.
//!
//! A backend is an **opaque, append-only byte store**. The intent log owns the
//! log block layout; backends never look inside the bytes they hold.
//!
//! ## Design Principles
//!
//! - Append returns the offset the bytes landed at
//! - `flush` is the durability barrier the commit protocol waits on
//! - `truncate` reclaims the log once every block in it is stable elsewhere
//! - Backends are `Send + Sync` so one device can serve many committers
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - Shared in-memory device for tests and ephemeral pools
//! - [`FileBackend`] - A regular file used as a dedicated log device
//!
//! ## Example
//!
//! ```rust
//! use cowtx_storage::{StorageBackend, InMemoryBackend};
//!
//! let mut device = InMemoryBackend::new();
//! let offset = device.append(b"log block").unwrap();
//! device.flush().unwrap();
//! assert_eq!(device.read_at(offset, 9).unwrap(), b"log block");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
