//! Durable storage for story state.
//!
//! Everything the engine keeps between runs is a named JSON blob. A
//! [`BlobStore`] holds the blobs; [`save_versioned`] and [`load_versioned`]
//! wrap typed values in a versioned envelope so an incompatible save is
//! rejected instead of half-read.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::fs;
use tokio::sync::Mutex;

/// Errors from persistence operations.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid save format in {0}")]
    InvalidFormat(String),

    #[error("Version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
}

/// Current envelope version.
pub const SAVE_VERSION: u32 = 1;

/// Key-value storage for named JSON blobs.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `value` under `name`, replacing any previous blob.
    async fn persist(&self, name: &str, value: &Value) -> Result<(), PersistError>;

    /// Fetch the blob stored under `name`, if any.
    async fn load(&self, name: &str) -> Result<Option<Value>, PersistError>;
}

/// A typed value with its format version and save time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub version: u32,
    pub saved_at: DateTime<Utc>,
    pub data: T,
}

/// Save `data` under `name` wrapped in a versioned envelope.
pub async fn save_versioned<S, T>(store: &S, name: &str, data: &T) -> Result<(), PersistError>
where
    S: BlobStore + ?Sized,
    T: Serialize + Sync,
{
    let envelope = Envelope {
        version: SAVE_VERSION,
        saved_at: Utc::now(),
        data,
    };
    let value = serde_json::to_value(&envelope)?;
    store.persist(name, &value).await
}

/// Load a value saved with [`save_versioned`]. An absent blob is `Ok(None)`.
pub async fn load_versioned<S, T>(store: &S, name: &str) -> Result<Option<T>, PersistError>
where
    S: BlobStore + ?Sized,
    T: DeserializeOwned,
{
    let Some(value) = store.load(name).await? else {
        return Ok(None);
    };

    // Check the version before decoding the payload
    #[derive(Deserialize)]
    struct Header {
        version: u32,
    }

    let header: Header = serde_json::from_value(value.clone())
        .map_err(|_| PersistError::InvalidFormat(name.to_string()))?;
    if header.version != SAVE_VERSION {
        return Err(PersistError::VersionMismatch {
            expected: SAVE_VERSION,
            found: header.version,
        });
    }

    let envelope: Envelope<T> = serde_json::from_value(value)?;
    Ok(Some(envelope.data))
}

/// Blob name for a chapter's text.
pub fn chapter_blob(chapter: u32) -> String {
    format!("chapter_{chapter:03}")
}

/// Blob name for the entities extracted from one chapter.
pub fn chapter_entities_blob(chapter: u32) -> String {
    format!("chapter_{chapter:03}_entities")
}

/// Blob name for the entities extracted from one batch of outlines.
pub fn batch_entities_blob(batch: u32) -> String {
    format!("batch_{batch:03}_entities")
}

/// Stores each blob as a pretty-printed JSON file in one directory.
#[derive(Debug, Clone)]
pub struct JsonDirStore {
    root: PathBuf,
}

impl JsonDirStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File path for a blob name.
    pub fn path_for(&self, name: &str) -> PathBuf {
        self.root.join(format!("{}.json", sanitize(name)))
    }
}

#[async_trait]
impl BlobStore for JsonDirStore {
    async fn persist(&self, name: &str, value: &Value) -> Result<(), PersistError> {
        fs::create_dir_all(&self.root).await?;

        let path = self.path_for(name);
        let tmp = self.root.join(format!(".{}.json.tmp", sanitize(name)));
        let content = serde_json::to_string_pretty(value)?;

        // Write then rename so a crash never leaves a torn file
        fs::write(&tmp, content).await?;
        fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn load(&self, name: &str) -> Result<Option<Value>, PersistError> {
        let content = match fs::read_to_string(self.path_for(name)).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_str(&content)?))
    }
}

/// In-memory blob store. Clones share the same storage.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    blobs: Arc<Mutex<HashMap<String, Value>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.blobs.lock().await.contains_key(name)
    }

    /// Names of all stored blobs, sorted.
    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.blobs.lock().await.keys().cloned().collect();
        names.sort();
        names
    }
}

#[async_trait]
impl BlobStore for MemoryStore {
    async fn persist(&self, name: &str, value: &Value) -> Result<(), PersistError> {
        self.blobs
            .lock()
            .await
            .insert(name.to_string(), value.clone());
        Ok(())
    }

    async fn load(&self, name: &str) -> Result<Option<Value>, PersistError> {
        Ok(self.blobs.lock().await.get(name).cloned())
    }
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}
