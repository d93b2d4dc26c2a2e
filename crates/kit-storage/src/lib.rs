//! Kit Storage - record store for the kit control-plane provisioner
//!
//! This crate provides:
//! - KVStore trait for storage abstraction
//! - redb-based implementation, on disk or in memory
//! - StateStore: typed records, merge-patch status writes, finalizers and
//!   change notifications

pub mod error;
pub mod kv;
pub mod patch;
pub mod redb_backend;
pub mod state;

// Re-export commonly used types
pub use error::{Result, StorageError};
pub use kv::{KVStore, Transaction};
pub use patch::merge_diff;
pub use redb_backend::RedbBackend;
pub use state::StateStore;
