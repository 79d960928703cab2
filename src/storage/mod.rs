//! Storage backends for persisted data.
//!
//! A store is rooted at a name (e.g. `pings`) and addressed with hierarchical
//! string-segment indices relative to that root. Missing paths are never errors.

pub mod memory;
#[cfg(feature = "sled-store")]
pub mod sled_store;
pub mod utils;

pub use memory::MemoryStore;
#[cfg(feature = "sled-store")]
pub use sled_store::SledStore;

use futures::future::BoxFuture;
use serde_json::Value;
use thiserror::Error;

/// Computes the new value of an entry from its current value.
pub type StoreTransform = Box<dyn FnOnce(Option<Value>) -> Value + Send>;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Invalid store index: {0}")]
    InvalidIndex(String),

    #[error("Store entry could not be (de)serialized: {0}")]
    Serialization(#[from] serde_json::Error),

    #[cfg(feature = "sled-store")]
    #[error("Sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("Blocking storage task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// An asynchronous hierarchical key-value store.
pub trait Store: Send + Sync {
    /// Name of the root this store is bound to.
    fn name(&self) -> &str;

    /// Returns the value under `index`, or the whole root for an empty index.
    fn get<'a>(&'a self, index: &'a [&'a str]) -> BoxFuture<'a, Result<Option<Value>, StorageError>>;

    /// Replaces the value under `index` with `transform(current)`.
    ///
    /// Missing or non-object intermediate entries are replaced with empty objects.
    fn update<'a>(
        &'a self,
        index: &'a [&'a str],
        transform: StoreTransform,
    ) -> BoxFuture<'a, Result<(), StorageError>>;

    /// Removes the value under `index`. An empty index clears the store.
    fn delete<'a>(&'a self, index: &'a [&'a str]) -> BoxFuture<'a, Result<(), StorageError>>;
}
