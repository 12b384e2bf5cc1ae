//! Key/value object stores backing checkpoints and history.
//!
//! A flat namespace of string keys mapping to byte blobs. [DiskStore] maps keys to
//! paths under a base directory; [MemoryStore] keeps everything in a map. Other
//! backends (blob storage, databases) implement [ObjectStore] themselves.

use async_trait::async_trait;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object not found: {0}")]
    NotFound(String),
    #[error("invalid object key {0:?}")]
    InvalidKey(String),
    #[error("I/O error on {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// Fails with [StoreError::NotFound] when the key was never written.
    async fn read(&self, key: &str) -> Result<Vec<u8>, StoreError>;

    async fn write(&self, key: &str, body: &[u8]) -> Result<(), StoreError>;

    /// Append to an object, creating it if missing.
    ///
    /// The default is read-concat-write for backends without a native append.
    async fn append(&self, key: &str, body: &[u8]) -> Result<(), StoreError> {
        let mut current = match self.read(key).await {
            Ok(bytes) => bytes,
            Err(StoreError::NotFound(_)) => Vec::new(),
            Err(e) => return Err(e),
        };
        current.extend_from_slice(body);
        self.write(key, &current).await
    }
}

/// In-memory store. Cheap to clone via `Arc`; contents die with the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.objects.read().await.contains_key(key))
    }

    async fn read(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        self.objects
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn write(&self, key: &str, body: &[u8]) -> Result<(), StoreError> {
        self.objects
            .write()
            .await
            .insert(key.to_string(), body.to_vec());
        Ok(())
    }

    async fn append(&self, key: &str, body: &[u8]) -> Result<(), StoreError> {
        self.objects
            .write()
            .await
            .entry(key.to_string())
            .or_default()
            .extend_from_slice(body);
        Ok(())
    }
}

/// Filesystem store: key `a/b/c` lives at `<base>/a/b/c`. Keys must be relative and
/// free of `..`; writes go through a temporary file renamed into place.
#[derive(Debug, Clone)]
pub struct DiskStore {
    base_path: PathBuf,
}

impl DiskStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        let rel = Path::new(key);
        let plain = !key.is_empty() && rel.components().all(|c| matches!(c, Component::Normal(_)));
        if !plain {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.base_path.join(rel))
    }

    async fn make_parent(&self, key: &str, path: &Path) -> Result<(), StoreError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|source| StoreError::Io {
                key: key.to_string(),
                source,
            })?;
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for DiskStore {
    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        match tokio::fs::metadata(self.path_for(key)?).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(source) => Err(StoreError::Io {
                key: key.to_string(),
                source,
            }),
        }
    }

    async fn read(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        tokio::fs::read(self.path_for(key)?).await.map_err(|source| {
            if source.kind() == ErrorKind::NotFound {
                StoreError::NotFound(key.to_string())
            } else {
                tracing::error!(key, reason = %source, "unable to read object");
                StoreError::Io {
                    key: key.to_string(),
                    source,
                }
            }
        })
    }

    async fn write(&self, key: &str, body: &[u8]) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        self.make_parent(key, &path).await?;
        let io_err = |source: std::io::Error| {
            tracing::error!(key, reason = %source, "unable to write object");
            StoreError::Io {
                key: key.to_string(),
                source,
            }
        };
        let mut tmp = path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        let mut file = tokio::fs::File::create(&tmp).await.map_err(io_err)?;
        file.write_all(body).await.map_err(io_err)?;
        file.sync_all().await.map_err(io_err)?;
        drop(file);
        // Readers see either the old object or the new one, never a truncated file.
        tokio::fs::rename(&tmp, &path).await.map_err(io_err)
    }

    async fn append(&self, key: &str, body: &[u8]) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        self.make_parent(key, &path).await?;
        let io_err = |source: std::io::Error| {
            tracing::error!(key, reason = %source, "unable to append object");
            StoreError::Io {
                key: key.to_string(),
                source,
            }
        };
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(io_err)?;
        file.write_all(body).await.map_err(io_err)?;
        file.flush().await.map_err(io_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Store relying on the default read-concat-write append.
    #[derive(Default)]
    struct NoAppend(MemoryStore);

    #[async_trait]
    impl ObjectStore for NoAppend {
        async fn exists(&self, key: &str) -> Result<bool, StoreError> {
            self.0.exists(key).await
        }
        async fn read(&self, key: &str) -> Result<Vec<u8>, StoreError> {
            self.0.read(key).await
        }
        async fn write(&self, key: &str, body: &[u8]) -> Result<(), StoreError> {
            self.0.write(key, body).await
        }
    }

    #[tokio::test]
    async fn memory_store_crud() {
        let store = MemoryStore::new();
        assert!(!store.exists("LAST_BLOCK").await.unwrap());
        assert!(matches!(
            store.read("LAST_BLOCK").await,
            Err(StoreError::NotFound(k)) if k == "LAST_BLOCK"
        ));
        store.write("LAST_BLOCK", b"42").await.unwrap();
        assert!(store.exists("LAST_BLOCK").await.unwrap());
        assert_eq!(store.read("LAST_BLOCK").await.unwrap(), b"42");
        store.append("log", b"a\n").await.unwrap();
        store.append("log", b"b\n").await.unwrap();
        assert_eq!(store.read("log").await.unwrap(), b"a\nb\n");
    }

    #[tokio::test]
    async fn default_append_creates_missing_key() {
        let store = NoAppend::default();
        store.append("k", b"one").await.unwrap();
        store.append("k", b"two").await.unwrap();
        assert_eq!(store.read("k").await.unwrap(), b"onetwo");
    }

    #[tokio::test]
    async fn disk_store_creates_nested_paths() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::new(dir.path());
        assert!(!store.exists("history/0xabc").await.unwrap());
        store.write("history/0xabc", b"[]").await.unwrap();
        assert!(store.exists("history/0xabc").await.unwrap());
        assert_eq!(store.read("history/0xabc").await.unwrap(), b"[]");

        store.append("deep/nested/log", b"x;").await.unwrap();
        store.append("deep/nested/log", b"y;").await.unwrap();
        assert_eq!(store.read("deep/nested/log").await.unwrap(), b"x;y;");
        assert!(matches!(
            store.read("missing").await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn disk_store_rejects_keys_outside_base() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::new(dir.path().join("state"));
        for key in ["../escape", "/etc/passwd", "history/../../x", ""] {
            assert!(
                matches!(store.write(key, b"1").await, Err(StoreError::InvalidKey(_))),
                "key {:?} accepted",
                key
            );
            assert!(matches!(store.read(key).await, Err(StoreError::InvalidKey(_))));
            assert!(matches!(store.append(key, b"1").await, Err(StoreError::InvalidKey(_))));
        }
        assert!(!dir.path().join("escape").exists());
    }

    #[tokio::test]
    async fn disk_store_write_replaces_whole_object() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::new(dir.path());
        store.write("ns/LAST_BLOCK", b"1000").await.unwrap();
        store.write("ns/LAST_BLOCK", b"7").await.unwrap();
        assert_eq!(store.read("ns/LAST_BLOCK").await.unwrap(), b"7");
        let names: Vec<_> = std::fs::read_dir(dir.path().join("ns"))
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("LAST_BLOCK")]);
    }
}
