//! Key-value store contract and in-memory implementation.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::warn;

/// Storage errors.
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    /// The backing store could not be read.
    #[error("read failed for key {key}: {reason}")]
    ReadFailed {
        /// Key being read.
        key: String,
        /// Backend-specific reason.
        reason: String,
    },

    /// The backing store could not be written.
    #[error("write failed for key {key}: {reason}")]
    WriteFailed {
        /// Key being written.
        key: String,
        /// Backend-specific reason.
        reason: String,
    },
}

/// Durable string key-value store.
///
/// All operations may fail. Callers in this crate treat a failed read as
/// "key absent" and a failed write as logged-and-ignored.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read a value.
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Write a value.
    async fn set(&self, key: &str, value: String) -> Result<(), StorageError>;

    /// Remove a value. Removing a missing key is not an error.
    async fn remove(&self, key: &str) -> Result<(), StorageError>;

    /// Remove several values.
    async fn multi_remove(&self, keys: &[&str]) -> Result<(), StorageError> {
        for key in keys {
            self.remove(key).await?;
        }
        Ok(())
    }
}

/// Read a key, degrading any failure to "absent".
pub async fn read_or_absent(store: &dyn KeyValueStore, key: &str) -> Option<String> {
    match store.get(key).await {
        Ok(value) => value,
        Err(e) => {
            warn!("Treating {} as absent: {}", key, e);
            None
        }
    }
}

/// Write a key, logging and ignoring failure. Returns whether it was written.
pub async fn write_or_log(store: &dyn KeyValueStore, key: &str, value: String) -> bool {
    match store.set(key, value).await {
        Ok(()) => true,
        Err(e) => {
            warn!("Failed to persist {}: {}", key, e);
            false
        }
    }
}

/// Remove keys, logging and ignoring failure.
pub async fn remove_or_log(store: &dyn KeyValueStore, keys: &[&str]) {
    if let Err(e) = store.multi_remove(keys).await {
        warn!("Failed to remove {:?}: {}", keys, e);
    }
}

/// In-memory store.
///
/// Reads and writes can be switched to fail, to exercise the
/// degrade-to-default paths.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, String>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    writes: AtomicU64,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent read fail (or succeed again).
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent write and remove fail (or succeed again).
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of successful `set`/`remove` calls so far.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Snapshot of a key, bypassing failure injection.
    pub async fn peek(&self, key: &str) -> Option<String> {
        self.entries.read().await.get(key).cloned()
    }

    /// Number of stored keys.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Check if the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    fn check_write(&self, key: &str) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::WriteFailed {
                key: key.to_string(),
                reason: "injected failure".into(),
            });
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StorageError::ReadFailed {
                key: key.to_string(),
                reason: "injected failure".into(),
            });
        }
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<(), StorageError> {
        self.check_write(key)?;
        self.entries.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.check_write(key)?;
        self.entries.write().await.remove(key);
        Ok(())
    }
}
