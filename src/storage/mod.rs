//! Key-value persistence
//!
//! Every component keeps its state as one JSON document under a fixed key.
//! Documents are rewritten whole on every mutation.

mod file;
mod memory;

pub use file::JsonFileStore;
pub use memory::MemoryStore;

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;

/// Storage keys
pub mod keys {
    pub const PROXY_POOL: &str = "proxy_pool";
    pub const ACCOUNT_PROXIES: &str = "account_proxies";
    pub const STATUS: &str = "status";
    pub const ACCOUNTS: &str = "accounts";
}

/// Raw byte storage keyed by name
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Load the document stored under `key`, if any
    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Replace the document stored under `key`
    async fn save(&self, key: &str, bytes: &[u8]) -> Result<()>;
}

/// Shared handle adding JSON (de)serialization on top of a [`KeyValueStore`]
#[derive(Clone)]
pub struct Store {
    inner: Arc<dyn KeyValueStore>,
}

impl Store {
    pub fn new(inner: Arc<dyn KeyValueStore>) -> Self {
        Self { inner }
    }

    /// Store backed by process memory
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    pub async fn load_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.inner.load(key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Load a document, falling back to `T::default()` when the key is absent
    pub async fn load_json_or_default<T: DeserializeOwned + Default>(&self, key: &str) -> Result<T> {
        Ok(self.load_json(key).await?.unwrap_or_default())
    }

    pub async fn save_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(value)?;
        self.inner.save(key, &bytes).await
    }
}
