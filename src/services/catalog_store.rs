use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::fs;
use tracing::debug;

use crate::error::{LauncherError, Result};

/// Durable storage for the serialized project catalog: one blob.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// `None` when nothing has been saved yet.
    async fn load(&self) -> Result<Option<Vec<u8>>>;
    async fn save(&self, bytes: Vec<u8>) -> Result<()>;
}

/// Catalog kept in a JSON file, replaced atomically on save.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl CatalogStore for JsonFileStore {
    async fn load(&self) -> Result<Option<Vec<u8>>> {
        match fs::read(&self.path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, bytes: Vec<u8>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| LauncherError::Persistence(format!("create {}: {}", parent.display(), e)))?;
        }

        // Write beside the target and rename so a crash never leaves half a file.
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, &bytes)
            .await
            .map_err(|e| LauncherError::Persistence(format!("write {}: {}", tmp.display(), e)))?;
        fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| LauncherError::Persistence(format!("rename to {}: {}", self.path.display(), e)))?;

        debug!(path = %self.path.display(), bytes = bytes.len(), "catalog written");
        Ok(())
    }
}

/// In-memory store for embedding and tests. Counts saves and can be told to
/// fail them.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: Mutex<Option<Vec<u8>>>,
    saves: AtomicUsize,
    failing: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_contents(bytes: Vec<u8>) -> Self {
        Self {
            data: Mutex::new(Some(bytes)),
            ..Self::default()
        }
    }

    /// Number of successful saves so far.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn contents(&self) -> Option<Vec<u8>> {
        self.data
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl CatalogStore for MemoryStore {
    async fn load(&self) -> Result<Option<Vec<u8>>> {
        Ok(self.contents())
    }

    async fn save(&self, bytes: Vec<u8>) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(LauncherError::Persistence("store unavailable".to_string()));
        }
        *self
            .data
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(bytes);
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_file_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("projects.json"));
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_creates_parent_and_replaces_contents() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("nested/projects.json"));

        store.save(b"[1]".to_vec()).await.unwrap();
        store.save(b"[2]".to_vec()).await.unwrap();

        assert_eq!(store.load().await.unwrap().as_deref(), Some(&b"[2]"[..]));
        assert!(!dir.path().join("nested/projects.json.tmp").exists());
    }

    #[tokio::test]
    async fn memory_store_failure_keeps_previous_contents() {
        let store = MemoryStore::with_contents(b"old".to_vec());
        store.set_failing(true);
        assert!(store.save(b"new".to_vec()).await.is_err());
        assert_eq!(store.contents().as_deref(), Some(&b"old"[..]));
        assert_eq!(store.save_count(), 0);
    }
}
