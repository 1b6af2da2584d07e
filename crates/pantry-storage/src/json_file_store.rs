use std::{
    collections::BTreeMap,
    fs::{self, File},
    io::{Read, Write},
    path::{Path, PathBuf},
    sync::RwLock,
};

use async_trait::async_trait;
use pantry_core::store::{KeyValueStore, StorageError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tempfile::NamedTempFile;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

/// File-backed store holding the full key → value mapping in one JSON document.
///
/// Reads come from memory. Each `put` rewrites the document atomically and only
/// then publishes the new map; writers queue on an async mutex so the file and
/// the map never diverge.
pub struct JsonFileStore {
    path: PathBuf,
    entries: RwLock<BTreeMap<String, Value>>,
    writer: Mutex<()>,
}

#[derive(Debug, Default, Deserialize)]
struct StoredDocument {
    #[serde(default)]
    entries: BTreeMap<String, Value>,
}

#[derive(Serialize)]
struct StoredDocumentRef<'a> {
    entries: &'a BTreeMap<String, Value>,
}

impl JsonFileStore {
    /// Load the store from `path`. A missing or empty file yields an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        let document = read_document(&path)?;
        debug!(?path, records = document.entries.len(), "opened json file store");
        Ok(Self {
            path,
            entries: RwLock::new(document.entries),
            writer: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of records currently held.
    pub fn len(&self) -> Result<usize, StorageError> {
        let entries = self.entries.read().map_err(poisoned)?;
        Ok(entries.len())
    }

    pub fn is_empty(&self) -> Result<bool, StorageError> {
        Ok(self.len()? == 0)
    }
}

#[async_trait]
impl KeyValueStore for JsonFileStore {
    #[instrument(skip(self, value))]
    async fn put(&self, key: &str, value: Value) -> Result<(), StorageError> {
        let _writer = self.writer.lock().await;

        // Readers keep seeing the committed map until the new document is on disk.
        let mut staged = self.entries.read().map_err(poisoned)?.clone();
        staged.insert(key.to_string(), value);
        let bytes = serde_json::to_vec(&StoredDocumentRef { entries: &staged })
            .map_err(StorageError::serialization)?;

        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_document(&path, &bytes))
            .await
            .map_err(|err| StorageError::backend(format!("write task failed: {err}")))??;

        *self.entries.write().map_err(poisoned)? = staged;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn fetch(&self, key: &str) -> Result<Option<Value>, StorageError> {
        let entries = self.entries.read().map_err(poisoned)?;
        Ok(entries.get(key).cloned())
    }
}

fn read_document(path: &Path) -> Result<StoredDocument, StorageError> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Ok(StoredDocument::default())
        }
        Err(err) => return Err(StorageError::io(err)),
    };

    let mut buf = Vec::new();
    file.read_to_end(&mut buf).map_err(StorageError::io)?;
    if buf.iter().all(u8::is_ascii_whitespace) {
        return Ok(StoredDocument::default());
    }
    serde_json::from_slice(&buf).map_err(StorageError::serialization)
}

fn write_document(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).map_err(StorageError::io)?;

    let mut tmp = NamedTempFile::new_in(parent).map_err(StorageError::io)?;
    tmp.write_all(bytes).map_err(StorageError::io)?;
    tmp.as_file().sync_all().map_err(StorageError::io)?;
    tmp.persist(path).map_err(|e| StorageError::io(e.error))?;
    Ok(())
}

fn poisoned<E: std::fmt::Display>(err: E) -> StorageError {
    StorageError::backend(format!("lock poisoned: {err}"))
}
