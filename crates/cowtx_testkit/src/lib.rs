//! # CowTx Testkit
//!
//! Test utilities for cowtx.
//!
//! This crate provides:
//! - Test fixtures wiring an in-memory pool to an intent log
//! - Property-based test generators using proptest
//! - A replay model that rebuilds file contents from the log
//! - A log device that simulates crashes and torn writes
//! - Fuzz testing harnesses
//! - Stress testing utilities
//!
//! ## Usage
//!
//! ```rust,ignore
//! use cowtx_testkit::prelude::*;
//!
//! #[test]
//! fn fsync_survives_crash() {
//!     let pool = TestPool::new();
//!     let file = pool.create("a").unwrap();
//!     pool.write(file, 0, b"hello", false).unwrap();
//!     pool.fsync(file).unwrap();
//!     let model = pool.crash_and_replay();
//!     assert_eq!(model.contents(file), Some(&b"hello"[..]));
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod fuzz;
pub mod generators;
pub mod model;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::fixtures::*;
    pub use crate::fuzz::*;
    pub use crate::generators::*;
    pub use crate::model::*;
    pub use crate::stress::*;
}

pub use crash::*;
pub use fixtures::*;
pub use fuzz::*;
pub use generators::*;
pub use model::*;
pub use stress::*;

/// Installs a `tracing` subscriber for tests, filtered by `RUST_LOG`.
///
/// Safe to call from every test; only the first call installs it.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
