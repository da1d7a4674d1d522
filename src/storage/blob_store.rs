use async_trait::async_trait;
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("Invalid storage key: {0}")]
    InvalidKey(String),
}

impl StorageError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        StorageError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Minimal key-value interface behind both the message log and the summary
/// archive. `put` replaces the whole value atomically.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    async fn put(&self, namespace: &str, key: &str, value: &[u8]) -> Result<(), StorageError>;

    /// Keys in `namespace` starting with `prefix`, sorted ascending.
    async fn keys(&self, namespace: &str, prefix: &str) -> Result<Vec<String>, StorageError>;
}

fn validate_key(key: &str) -> Result<(), StorageError> {
    if key.is_empty()
        || key.starts_with('.')
        || key.contains('/')
        || key.contains('\\')
        || key.contains("..")
    {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(())
}

// ============================================
// FILESYSTEM BACKEND
// ============================================

/// One directory per namespace under `root`, one `{key}.json` file per value.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    const EXTENSION: &'static str = ".json";

    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn namespace_dir(&self, namespace: &str) -> Result<PathBuf, StorageError> {
        validate_key(namespace)?;
        Ok(self.root.join(namespace))
    }

    fn value_path(&self, namespace: &str, key: &str) -> Result<PathBuf, StorageError> {
        validate_key(key)?;
        Ok(self
            .namespace_dir(namespace)?
            .join(format!("{}{}", key, Self::EXTENSION)))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let path = self.value_path(namespace, key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::io(&path, e)),
        }
    }

    async fn put(&self, namespace: &str, key: &str, value: &[u8]) -> Result<(), StorageError> {
        let dir = self.namespace_dir(namespace)?;
        let path = self.value_path(namespace, key)?;

        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| StorageError::io(&dir, e))?;

        // Readers never observe a half-written value.
        let tmp = dir.join(format!(".{}.{}.tmp", key, uuid::Uuid::new_v4()));
        if let Err(e) = tokio::fs::write(&tmp, value).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(StorageError::io(&tmp, e));
        }
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(StorageError::io(&path, e));
        }
        Ok(())
    }

    async fn keys(&self, namespace: &str, prefix: &str) -> Result<Vec<String>, StorageError> {
        let dir = self.namespace_dir(namespace)?;
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::io(&dir, e)),
        };

        let mut keys = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StorageError::io(&dir, e))?
        {
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            if let Some(key) = name.strip_suffix(Self::EXTENSION) {
                if key.starts_with(prefix) {
                    keys.push(key.to_string());
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}

// ============================================
// IN-MEMORY BACKEND
// ============================================

#[derive(Default)]
pub struct MemoryBlobStore {
    values: RwLock<BTreeMap<(String, String), Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        validate_key(key)?;
        let values = self.values.read().await;
        Ok(values
            .get(&(namespace.to_string(), key.to_string()))
            .cloned())
    }

    async fn put(&self, namespace: &str, key: &str, value: &[u8]) -> Result<(), StorageError> {
        validate_key(key)?;
        self.values
            .write()
            .await
            .insert((namespace.to_string(), key.to_string()), value.to_vec());
        Ok(())
    }

    async fn keys(&self, namespace: &str, prefix: &str) -> Result<Vec<String>, StorageError> {
        let values = self.values.read().await;
        Ok(values
            .keys()
            .filter(|(ns, key)| ns == namespace && key.starts_with(prefix))
            .map(|(_, key)| key.clone())
            .collect())
    }
}
