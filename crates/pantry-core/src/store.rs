use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Errors produced by key-value store implementations.
///
/// The `Display` text is returned verbatim to HTTP callers, so it must describe
/// the failure without leaking stored values.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StorageError {
    /// Reading or writing the backing medium failed.
    #[error("storage i/o failure: {reason}")]
    Io { reason: String },
    /// A value or the persisted document could not be (de)serialized.
    #[error("storage serialization failure: {reason}")]
    Serialization { reason: String },
    /// Backend-specific fault (poisoned lock, worker panic, ...).
    #[error("storage backend failure: {reason}")]
    Backend { reason: String },
}

impl StorageError {
    pub fn io(err: impl ToString) -> Self {
        StorageError::Io {
            reason: err.to_string(),
        }
    }

    pub fn serialization(err: impl ToString) -> Self {
        StorageError::Serialization {
            reason: err.to_string(),
        }
    }

    pub fn backend(err: impl ToString) -> Self {
        StorageError::Backend {
            reason: err.to_string(),
        }
    }
}

/// Flat string-keyed store of JSON values.
///
/// Implementations must tolerate concurrent calls for distinct keys. Concurrent
/// writes to the same key resolve as "last write observed by the store wins".
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Persist `value` under `key`, overwriting any existing entry.
    async fn put(&self, key: &str, value: Value) -> Result<(), StorageError>;

    /// Fetch the value stored under `key`.
    ///
    /// `Ok(None)` means nothing was ever stored; a stored JSON `null` comes back
    /// as `Ok(Some(Value::Null))`.
    async fn fetch(&self, key: &str) -> Result<Option<Value>, StorageError>;
}

#[async_trait]
impl<S: KeyValueStore + ?Sized> KeyValueStore for Arc<S> {
    async fn put(&self, key: &str, value: Value) -> Result<(), StorageError> {
        (**self).put(key, value).await
    }

    async fn fetch(&self, key: &str) -> Result<Option<Value>, StorageError> {
        (**self).fetch(key).await
    }
}

/// Volatile store for tests and `--in-memory` runs. Contents vanish with the process.
#[derive(Debug, Default, Clone)]
pub struct InMemoryStore {
    inner: Arc<RwLock<HashMap<String, Value>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.read().map(|map| map.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl KeyValueStore for InMemoryStore {
    async fn put(&self, key: &str, value: Value) -> Result<(), StorageError> {
        let mut map = self
            .inner
            .write()
            .map_err(|err| StorageError::backend(format!("lock poisoned: {err}")))?;
        map.insert(key.to_string(), value);
        Ok(())
    }

    async fn fetch(&self, key: &str) -> Result<Option<Value>, StorageError> {
        let map = self
            .inner
            .read()
            .map_err(|err| StorageError::backend(format!("lock poisoned: {err}")))?;
        Ok(map.get(key).cloned())
    }
}
