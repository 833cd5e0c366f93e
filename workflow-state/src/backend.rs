//! ABOUTME: Pluggable byte-level storage backend: in-memory and sled-backed implementations
//! ABOUTME: Instance/suspension/async-task stores sit on top, encoding to and from JSON bytes

use async_trait::async_trait;
use dashmap::DashMap;
use std::path::Path;
use std::sync::Arc;

/// A pluggable key/value backend. Durability is swappable: in-memory for
/// tests, persistent for production. The engine only ever stores
/// namespaced keys and opaque bytes — encoding is the caller's concern.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>>;
    async fn set(&self, key: &str, value: Vec<u8>) -> anyhow::Result<()>;
    async fn delete(&self, key: &str) -> anyhow::Result<()>;
    async fn exists(&self, key: &str) -> anyhow::Result<bool>;
    async fn list_keys(&self, prefix: &str) -> anyhow::Result<Vec<String>>;
}

/// In-process backend used by tests and by `workflow-testing`'s harness.
#[derive(Default)]
pub struct MemoryBackend {
    data: DashMap<String, Vec<u8>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<dyn StorageBackend> {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(self.data.get(key).map(|v| v.clone()))
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> anyhow::Result<()> {
        self.data.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> anyhow::Result<()> {
        self.data.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> anyhow::Result<bool> {
        Ok(self.data.contains_key(key))
    }

    async fn list_keys(&self, prefix: &str) -> anyhow::Result<Vec<String>> {
        Ok(self
            .data
            .iter()
            .map(|entry| entry.key().clone())
            .filter(|k| k.starts_with(prefix))
            .collect())
    }
}

/// Persistent backend over an embedded `sled` tree, for process
/// restarts and multi-invocation CLI use where [`MemoryBackend`] would
/// lose everything between runs. `sled::Db` clones cheaply (it's
/// reference-counted internally), so this type is `Clone`.
#[derive(Clone)]
pub struct SledBackend {
    db: sled::Db,
}

impl SledBackend {
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    /// An ephemeral on-disk tree, useful for integration tests that want
    /// real persistence semantics without a fixed path.
    pub fn temporary() -> anyhow::Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db })
    }

    pub fn shared(path: impl AsRef<Path>) -> anyhow::Result<Arc<dyn StorageBackend>> {
        Ok(Arc::new(Self::open(path)?))
    }
}

#[async_trait]
impl StorageBackend for SledBackend {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        let db = self.db.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || Ok(db.get(key.as_bytes())?.map(|v| v.to_vec()))).await?
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> anyhow::Result<()> {
        let db = self.db.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || {
            db.insert(key.as_bytes(), value)?;
            db.flush()?;
            Ok(())
        })
        .await?
    }

    async fn delete(&self, key: &str) -> anyhow::Result<()> {
        let db = self.db.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || {
            db.remove(key.as_bytes())?;
            db.flush()?;
            Ok(())
        })
        .await?
    }

    async fn exists(&self, key: &str) -> anyhow::Result<bool> {
        let db = self.db.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || Ok(db.contains_key(key.as_bytes())?)).await?
    }

    async fn list_keys(&self, prefix: &str) -> anyhow::Result<Vec<String>> {
        let db = self.db.clone();
        let prefix = prefix.to_string();
        tokio::task::spawn_blocking(move || {
            db.scan_prefix(prefix.as_bytes())
                .keys()
                .map(|k| k.map(|k| String::from_utf8_lossy(&k).into_owned()).map_err(anyhow::Error::from))
                .collect::<anyhow::Result<Vec<String>>>()
        })
        .await?
    }
}
