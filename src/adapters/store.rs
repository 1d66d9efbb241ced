//! Key-value persistence for alerts and session flags.
//!
//! `FileStore` keeps every key in one JSON object file. Each operation takes
//! an exclusive lock on a sidecar `.lock` file, and writes land through a temp
//! file plus rename so a crash never leaves a torn file behind.

use std::collections::{BTreeMap, HashMap};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tempfile::NamedTempFile;
use thiserror::Error;
use tokio::sync::Mutex;

/// Errors raised by key-value stores
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store task failed: {0}")]
    Task(String),
}

/// String key-value persistence
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    async fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// Read and deserialize a JSON value
pub async fn load_json<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
) -> Result<Option<T>, StoreError> {
    match store.get(key).await? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

/// Serialize and write a JSON value
pub async fn save_json<T: Serialize + ?Sized>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T,
) -> Result<(), StoreError> {
    let raw = serde_json::to_string(value)?;
    store.set(key, &raw).await
}

/// In-memory store. Clones share the same entries, which lets tests
/// simulate a restart by building a second consumer on a clone.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys held
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries
            .lock()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.entries.lock().await.remove(key);
        Ok(())
    }
}

/// Durable store backed by a single JSON file
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Open the store at the configured location ($JOJO_HOME/store.json)
    pub fn open_default() -> anyhow::Result<Self> {
        Ok(Self::new(crate::config::store_path()?))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `op` against the locked map on the blocking pool
    async fn with_map<R, F>(&self, write: bool, op: F) -> Result<R, StoreError>
    where
        R: Send + 'static,
        F: FnOnce(&mut BTreeMap<String, String>) -> R + Send + 'static,
    {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || locked(&path, write, op))
            .await
            .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let key = key.to_string();
        self.with_map(false, move |map| map.get(&key).cloned()).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let key = key.to_string();
        let value = value.to_string();
        self.with_map(true, move |map| {
            map.insert(key, value);
        })
        .await
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        let key = key.to_string();
        self.with_map(true, move |map| {
            map.remove(&key);
        })
        .await
    }
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

fn locked<R, F>(path: &Path, write: bool, op: F) -> Result<R, StoreError>
where
    F: FnOnce(&mut BTreeMap<String, String>) -> R,
{
    let dir = parent_dir(path);
    std::fs::create_dir_all(dir)?;

    let lock_path = path.with_extension("lock");
    let lock_file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&lock_path)?;
    lock_file.lock_exclusive()?;

    let mut map = read_map(path)?;
    let result = op(&mut map);
    if write {
        write_map(path, &map)?;
    }

    FileExt::unlock(&lock_file)?;
    Ok(result)
}

fn read_map(path: &Path) -> Result<BTreeMap<String, String>, StoreError> {
    if !path.exists() {
        return Ok(BTreeMap::new());
    }

    let content = std::fs::read_to_string(path)?;
    if content.trim().is_empty() {
        return Ok(BTreeMap::new());
    }

    Ok(serde_json::from_str(&content)?)
}

fn write_map(path: &Path, map: &BTreeMap<String, String>) -> Result<(), StoreError> {
    let mut tmp = NamedTempFile::new_in(parent_dir(path))?;
    serde_json::to_writer_pretty(&mut tmp, map)?;
    tmp.flush()?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| StoreError::Io(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_memory_store_clones_share_entries() {
        let store = MemoryStore::new();
        let clone = store.clone();

        store.set("jojo.hands_free", "true").await.unwrap();
        assert_eq!(
            clone.get("jojo.hands_free").await.unwrap(),
            Some("true".to_string())
        );

        clone.remove("jojo.hands_free").await.unwrap();
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_file_store_survives_reopen() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("state").join("store.json");

        let store = FileStore::new(&path);
        store.set("a", "1").await.unwrap();
        store.set("b", "2").await.unwrap();
        store.remove("a").await.unwrap();
        drop(store);

        let reopened = FileStore::new(&path);
        assert_eq!(reopened.get("a").await.unwrap(), None);
        assert_eq!(reopened.get("b").await.unwrap(), Some("2".to_string()));
    }

    #[tokio::test]
    async fn test_missing_file_reads_empty() {
        let temp = TempDir::new().unwrap();
        let store = FileStore::new(temp.path().join("nope.json"));
        assert_eq!(store.get("anything").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_json_helpers() {
        let store = MemoryStore::new();
        save_json(&store, "list", &vec![1, 2, 3]).await.unwrap();

        let loaded: Option<Vec<u32>> = load_json(&store, "list").await.unwrap();
        assert_eq!(loaded, Some(vec![1, 2, 3]));

        let missing: Option<Vec<u32>> = load_json(&store, "other").await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_concurrent_file_writes_keep_every_key() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(FileStore::new(temp.path().join("store.json")));

        let mut tasks = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                store.set(&format!("key{}", i), "v").await.unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        for i in 0..8 {
            assert!(store.get(&format!("key{}", i)).await.unwrap().is_some());
        }
    }
}
