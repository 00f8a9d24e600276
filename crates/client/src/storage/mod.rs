//! Durable key-value storage.
//!
//! The session core persists three string values (credential bundle, user
//! profile, selected shop). [`KeyValueStore`] is the port; two adapters are
//! provided:
//!
//! - [`FileStore`] - one JSON document on disk, replaced atomically on every write
//! - [`MemoryStore`] - process-local map for tests and ephemeral sessions
//!
//! Nothing outside [`crate::token_store`] talks to a store directly.

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use thiserror::Error;

/// Errors raised by a storage backend.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Reading or writing the backing file failed.
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The stored document could not be (de)serialized.
    #[error("storage serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The backend is not available at all.
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Durable string key-value store.
///
/// Implementations must make `remove_all` atomic from the caller's
/// perspective: after it returns either every key is gone or the call failed
/// and none of them were touched.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read a value.
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Write a value, replacing any previous one.
    async fn set(&self, key: &str, value: String) -> Result<(), StorageError>;

    /// Remove several keys as one operation.
    async fn remove_all(&self, keys: &[&str]) -> Result<(), StorageError>;
}
