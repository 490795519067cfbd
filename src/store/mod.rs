//! Durable key-value store contract and reference implementations.
//!
//! The engine only requires get/set/exists by key; which backing store sits
//! behind the trait is the embedding service's choice. `InMemoryStore` backs
//! tests, `FileStore` persists one JSON document per key.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

pub mod fs;
pub mod memory;

pub use fs::FileStore;
pub use memory::InMemoryStore;

/// Errors raised by a durable store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store backend error: {reason}")]
    Backend { reason: String },
}

/// Durable key-value store the engine checkpoints into.
///
/// No transactions and no TTL semantics are required; a `set` must be atomic
/// from the engine's point of view (a reader never observes a half-written
/// value for the key).
#[async_trait]
pub trait DurableStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;

    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError>;

    async fn exists(&self, key: &str) -> Result<bool, StoreError>;
}
