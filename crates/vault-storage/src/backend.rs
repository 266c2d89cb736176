//! Physical key/value backend trait and the in-memory implementation.
//!
//! The engine talks to storage exclusively through [`StorageBackend`], so a
//! browser-style quota-limited medium, a directory of files, or a test map
//! all plug in the same way. All operations are async to support remote or
//! blocking media.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::{Result, StorageError};

/// Trait for physical key/value storage media.
///
/// Keys and values are opaque strings; the engine layers records, chunking,
/// and checksums on top.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Reads the value at `key`, or `None` when absent.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Writes `value` at `key`, replacing any previous value.
    ///
    /// Returns [`StorageError::QuotaExceeded`] when the medium is full.
    async fn put(&self, key: &str, value: &str) -> Result<()>;

    /// Removes the value at `key`. Returns whether a value existed.
    async fn remove(&self, key: &str) -> Result<bool>;

    /// Lists every key currently present.
    async fn keys(&self) -> Result<Vec<String>>;
}

/// In-memory backend.
///
/// Used in tests and as a scratch medium. An optional byte capacity makes it
/// behave like a quota-limited store.
pub struct MemoryBackend {
    entries: RwLock<HashMap<String, String>>,
    capacity: Option<usize>,
}

impl MemoryBackend {
    /// Creates an unbounded in-memory backend.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            capacity: None,
        }
    }

    /// Creates a backend that rejects writes once total stored bytes would
    /// exceed `capacity`.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            capacity: Some(capacity),
        }
    }

    fn lock_err(reason: impl std::fmt::Display) -> StorageError {
        StorageError::Backend(format!("lock poisoned: {}", reason))
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self.entries.read().map_err(|e| Self::lock_err(e))?;
        Ok(entries.get(key).cloned())
    }

    async fn put(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.entries.write().map_err(|e| Self::lock_err(e))?;

        if let Some(capacity) = self.capacity {
            let current: usize = entries
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(k, v)| k.len() + v.len())
                .sum();
            if current + key.len() + value.len() > capacity {
                return Err(StorageError::QuotaExceeded {
                    key: key.to_string(),
                });
            }
        }

        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<bool> {
        let mut entries = self.entries.write().map_err(|e| Self::lock_err(e))?;
        Ok(entries.remove(key).is_some())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let entries = self.entries.read().map_err(|e| Self::lock_err(e))?;
        Ok(entries.keys().cloned().collect())
    }
}
