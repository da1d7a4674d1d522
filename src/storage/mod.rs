pub mod blob_store;
pub mod message_store;
pub mod retriever;
pub mod summary_archive;

use std::path::Path;
use std::sync::Arc;

use crate::config::ConfigError;

pub use blob_store::{BlobStore, FsBlobStore, MemoryBlobStore, StorageError};
pub use message_store::MessageStore;
pub use retriever::WindowRetriever;
pub use summary_archive::SummaryArchive;

/// Builds the blob backend named by `storage_backend`.
pub fn init_blob_store(backend: &str, data_dir: &Path) -> Result<Arc<dyn BlobStore>, ConfigError> {
    match backend {
        "fs" => {
            tracing::info!("Using filesystem storage at {}", data_dir.display());
            Ok(Arc::new(FsBlobStore::new(data_dir)))
        }
        "memory" => {
            tracing::warn!("Using in-memory storage; nothing survives a restart");
            Ok(Arc::new(MemoryBlobStore::new()))
        }
        other => Err(ConfigError::UnsupportedStorage(other.to_string())),
    }
}
