//! Disk-backed blob storage for message attachments.
//!
//! Each blob is written under an opaque UUID key with a JSON sidecar
//! carrying the metadata needed to serve it back (original name, MIME
//! type).  Keys are generated here, so stored paths can never escape the
//! base directory.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, info};
use uuid::Uuid;

use missive_shared::constants::FILES_URL_PREFIX;

use crate::error::ServerError;

/// Metadata persisted alongside each blob.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlobMeta {
    pub original_name: String,
    pub mime_type: String,
    pub size: u64,
}

/// Result of storing a blob.
#[derive(Debug, Clone)]
pub struct StoredBlob {
    pub key: Uuid,
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct BlobStore {
    base_path: PathBuf,
}

impl BlobStore {
    pub async fn new(base_path: PathBuf) -> Result<Self, ServerError> {
        fs::create_dir_all(&base_path).await.map_err(|e| {
            ServerError::Blob(format!(
                "Failed to create blob directory '{}': {}",
                base_path.display(),
                e
            ))
        })?;

        info!(path = %base_path.display(), "Blob store initialized");

        Ok(Self { base_path })
    }

    /// Store a blob, returning its key and the URL clients fetch it from.
    pub async fn put(
        &self,
        data: &[u8],
        original_name: &str,
        mime_type: &str,
    ) -> Result<StoredBlob, ServerError> {
        if data.is_empty() {
            return Err(ServerError::Blob("Empty blob".to_string()));
        }

        let key = Uuid::new_v4();
        let meta = BlobMeta {
            original_name: original_name.to_string(),
            mime_type: mime_type.to_string(),
            size: data.len() as u64,
        };

        let meta_json = serde_json::to_vec(&meta)
            .map_err(|e| ServerError::Blob(format!("Failed to encode metadata: {}", e)))?;
        fs::write(self.meta_path(&key), meta_json)
            .await
            .map_err(|e| {
                ServerError::Blob(format!("Failed to write metadata for {}: {}", key, e))
            })?;

        fs::write(self.blob_path(&key), data)
            .await
            .map_err(|e| ServerError::Blob(format!("Failed to write blob {}: {}", key, e)))?;

        debug!(key = %key, size = data.len(), "Stored blob");
        Ok(StoredBlob {
            key,
            url: format!("{FILES_URL_PREFIX}/{key}"),
        })
    }

    /// Open a blob for streaming, together with its metadata.
    pub async fn open_stream(&self, key: Uuid) -> Result<(fs::File, BlobMeta), ServerError> {
        let meta = self.read_meta(key).await?;

        let file = fs::File::open(self.blob_path(&key))
            .await
            .map_err(|e| ServerError::Blob(format!("Failed to open blob {}: {}", key, e)))?;

        Ok((file, meta))
    }

    /// Read an entire blob into memory.
    pub async fn get(&self, key: Uuid) -> Result<(Vec<u8>, BlobMeta), ServerError> {
        let meta = self.read_meta(key).await?;

        let data = fs::read(self.blob_path(&key))
            .await
            .map_err(|e| ServerError::Blob(format!("Failed to read blob {}: {}", key, e)))?;

        debug!(key = %key, size = data.len(), "Retrieved blob");
        Ok((data, meta))
    }

    /// Remove a blob and its metadata.
    pub async fn delete(&self, key: Uuid) -> Result<(), ServerError> {
        let path = self.blob_path(&key);

        if !path.exists() {
            return Err(ServerError::NotFound(format!("blob {key}")));
        }

        fs::remove_file(&path)
            .await
            .map_err(|e| ServerError::Blob(format!("Failed to delete blob {}: {}", key, e)))?;
        let _ = fs::remove_file(self.meta_path(&key)).await;

        debug!(key = %key, "Deleted blob");
        Ok(())
    }

    async fn read_meta(&self, key: Uuid) -> Result<BlobMeta, ServerError> {
        let meta_path = self.meta_path(&key);

        if !meta_path.exists() {
            return Err(ServerError::NotFound(format!("blob {key}")));
        }

        let raw = fs::read(&meta_path)
            .await
            .map_err(|e| ServerError::Blob(format!("Failed to read metadata for {}: {}", key, e)))?;

        serde_json::from_slice(&raw)
            .map_err(|e| ServerError::Blob(format!("Corrupt metadata for {}: {}", key, e)))
    }

    fn blob_path(&self, key: &Uuid) -> PathBuf {
        self.base_path.join(key.to_string())
    }

    fn meta_path(&self, key: &Uuid) -> PathBuf {
        self.base_path.join(format!("{key}.meta"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn test_store() -> (BlobStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = BlobStore::new(dir.path().to_path_buf()).await.unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn test_store_and_get() {
        let (store, _dir) = test_store().await;
        let data = b"attachment-bytes";

        let stored = store.put(data, "notes.txt", "text/plain").await.unwrap();
        assert!(stored.url.ends_with(&stored.key.to_string()));

        let (retrieved, meta) = store.get(stored.key).await.unwrap();
        assert_eq!(retrieved, data);
        assert_eq!(meta.original_name, "notes.txt");
        assert_eq!(meta.mime_type, "text/plain");
        assert_eq!(meta.size, data.len() as u64);
    }

    #[tokio::test]
    async fn test_delete() {
        let (store, _dir) = test_store().await;
        let stored = store.put(b"delete-me", "x.bin", "application/octet-stream")
            .await
            .unwrap();

        store.delete(stored.key).await.unwrap();
        assert!(store.get(stored.key).await.is_err());
        assert!(store.delete(stored.key).await.is_err());
    }

    #[tokio::test]
    async fn test_not_found() {
        let (store, _dir) = test_store().await;
        let missing = Uuid::new_v4();
        assert!(matches!(
            store.get(missing).await,
            Err(ServerError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_empty_blob_rejected() {
        let (store, _dir) = test_store().await;
        assert!(store.put(b"", "empty", "text/plain").await.is_err());
    }
}
