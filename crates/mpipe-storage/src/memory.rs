//! In-memory blob store.
//!
//! Clones share state, so a test keeps one handle for assertions while each
//! worker gets its own "connection".

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::error::{StorageError, StorageResult};
use crate::gateway::{
    download_path, plan_directory_upload, BlobConnector, BlobStore, UploadSummary,
};

#[derive(Debug, Default)]
struct MemoryState {
    uploads: HashMap<String, Vec<u8>>,
    objects: BTreeMap<String, (Vec<u8>, &'static str)>,
    downloads: usize,
    directory_uploads: usize,
    connections: usize,
    refuse_connections: bool,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryBlobStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Place an original upload in the upload bucket.
    pub fn put_upload(&self, key: impl Into<String>, data: impl Into<Vec<u8>>) {
        self.state().uploads.insert(key.into(), data.into());
    }

    /// Keys in the storage bucket, sorted.
    pub fn object_keys(&self) -> Vec<String> {
        self.state().objects.keys().cloned().collect()
    }

    pub fn content_type(&self, key: &str) -> Option<&'static str> {
        self.state().objects.get(key).map(|(_, ct)| *ct)
    }

    pub fn download_count(&self) -> usize {
        self.state().downloads
    }

    pub fn upload_count(&self) -> usize {
        self.state().directory_uploads
    }

    pub fn connection_count(&self) -> usize {
        self.state().connections
    }

    /// Make every later `connect` fail.
    pub fn refuse_connections(&self) {
        self.state().refuse_connections = true;
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn download(&self, key: &str, dest_dir: &Path) -> StorageResult<PathBuf> {
        let path = download_path(key, dest_dir)?;
        let data = {
            let mut state = self.state();
            state.downloads += 1;
            state
                .uploads
                .get(key)
                .cloned()
                .ok_or_else(|| StorageError::not_found(key))?
        };

        tokio::fs::create_dir_all(dest_dir).await?;
        tokio::fs::write(&path, data).await?;
        Ok(path)
    }

    async fn upload_directory(
        &self,
        local_dir: &Path,
        remote_prefix: &str,
    ) -> StorageResult<UploadSummary> {
        self.state().directory_uploads += 1;
        let (planned, skipped) = plan_directory_upload(local_dir, remote_prefix).await?;

        let mut summary = UploadSummary {
            uploaded: Vec::with_capacity(planned.len()),
            skipped,
        };
        for upload in planned {
            let data = tokio::fs::read(&upload.path).await?;
            self.state()
                .objects
                .insert(upload.key.clone(), (data, upload.content_type));
            summary.uploaded.push(upload.key);
        }
        Ok(summary)
    }
}

#[async_trait]
impl BlobConnector for MemoryBlobStore {
    async fn connect(&self) -> StorageResult<Box<dyn BlobStore>> {
        let mut state = self.state();
        if state.refuse_connections {
            return Err(StorageError::config_error("connection refused"));
        }
        state.connections += 1;
        Ok(Box::new(self.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_download_and_upload() {
        let store = MemoryBlobStore::new();
        store.put_upload("clip.mp4", b"source".to_vec());
        let dir = TempDir::new().unwrap();

        let path = store.download("clip.mp4", dir.path()).await.unwrap();
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"source");

        let out = dir.path().join("clip");
        tokio::fs::create_dir(&out).await.unwrap();
        tokio::fs::write(out.join("clip.mpd"), b"<MPD/>").await.unwrap();
        tokio::fs::write(out.join("clip_passlog-0.log"), b"").await.unwrap();

        let summary = store.upload_directory(&out, "clip").await.unwrap();
        assert_eq!(summary.uploaded, ["clip/clip.mpd"]);
        assert_eq!(summary.skipped, 1);
        assert_eq!(store.content_type("clip/clip.mpd"), Some("application/dash+xml"));
        assert_eq!(store.download_count(), 1);
    }

    #[tokio::test]
    async fn test_missing_upload() {
        let store = MemoryBlobStore::new();
        let dir = TempDir::new().unwrap();
        let err = store.download("gone.mp4", dir.path()).await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_connections_share_state() {
        let store = MemoryBlobStore::new();
        let conn = store.connect().await.unwrap();
        store.put_upload("a.mp4", b"x".to_vec());

        let dir = TempDir::new().unwrap();
        conn.download("a.mp4", dir.path()).await.unwrap();
        assert_eq!(store.download_count(), 1);
        assert_eq!(store.connection_count(), 1);

        store.refuse_connections();
        assert!(store.connect().await.is_err());
    }
}
