//! Blob store seam.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::content_type::content_type_for;
use crate::error::{StorageError, StorageResult};

/// Result of a directory upload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadSummary {
    /// Keys written, in upload order
    pub uploaded: Vec<String>,
    /// Files skipped because their extension is not on the allow-list
    pub skipped: usize,
}

/// One worker's exclusive connection to the blob store.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Fetch the original upload `key` into `dest_dir`, returning the local path.
    async fn download(&self, key: &str, dest_dir: &Path) -> StorageResult<PathBuf>;

    /// Upload every allow-listed file under `local_dir` to `remote_prefix/`.
    async fn upload_directory(
        &self,
        local_dir: &Path,
        remote_prefix: &str,
    ) -> StorageResult<UploadSummary>;
}

/// Opens blob store connections. Each worker calls `connect` once.
#[async_trait]
pub trait BlobConnector: Send + Sync {
    async fn connect(&self) -> StorageResult<Box<dyn BlobStore>>;
}

/// A file selected for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedUpload {
    pub path: PathBuf,
    pub key: String,
    pub content_type: &'static str,
}

/// Walk `local_dir` and pair each allow-listed file with its remote key.
///
/// Keys are `remote_prefix/<path relative to local_dir>` with `/` separators.
pub async fn plan_directory_upload(
    local_dir: &Path,
    remote_prefix: &str,
) -> StorageResult<(Vec<PlannedUpload>, usize)> {
    let prefix = remote_prefix.trim_matches('/');
    let mut planned = Vec::new();
    let mut skipped = 0;
    let mut pending = vec![local_dir.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if entry.file_type().await?.is_dir() {
                pending.push(path);
                continue;
            }

            let Some(content_type) = content_type_for(&path) else {
                skipped += 1;
                continue;
            };

            let relative = path
                .strip_prefix(local_dir)
                .map_err(|_| StorageError::InvalidKey(path.display().to_string()))?;
            let relative = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            let key = if prefix.is_empty() {
                relative
            } else {
                format!("{}/{}", prefix, relative)
            };

            planned.push(PlannedUpload {
                path,
                key,
                content_type,
            });
        }
    }

    planned.sort_by(|a, b| a.key.cmp(&b.key));
    Ok((planned, skipped))
}

/// Local path for a downloaded key. Keys may not leave `dest_dir`.
pub fn download_path(key: &str, dest_dir: &Path) -> StorageResult<PathBuf> {
    let valid = !key.is_empty()
        && !key.contains('/')
        && !key.contains('\\')
        && !key.contains("..");
    if !valid {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(dest_dir.join(key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_plan_directory_upload() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        tokio::fs::write(root.join("clip.mpd"), b"").await.unwrap();
        tokio::fs::write(root.join("clip_h264_640p.mp4"), b"").await.unwrap();
        tokio::fs::write(root.join("notes.txt"), b"").await.unwrap();
        tokio::fs::create_dir(root.join("seg")).await.unwrap();
        tokio::fs::write(root.join("seg/segment_1.m4s"), b"").await.unwrap();

        let (planned, skipped) = plan_directory_upload(root, "clip/").await.unwrap();
        let keys: Vec<_> = planned.iter().map(|p| p.key.as_str()).collect();

        assert_eq!(keys, ["clip/clip.mpd", "clip/clip_h264_640p.mp4", "clip/seg/segment_1.m4s"]);
        assert_eq!(skipped, 1);
        assert_eq!(planned[0].content_type, "application/dash+xml");
    }

    #[test]
    fn test_download_path_rejects_escapes() {
        let dest = Path::new("/scratch/worker-0");
        assert_eq!(
            download_path("clip.mp4", dest).unwrap(),
            PathBuf::from("/scratch/worker-0/clip.mp4")
        );
        assert!(download_path("../clip.mp4", dest).is_err());
        assert!(download_path("a/clip.mp4", dest).is_err());
        assert!(download_path("", dest).is_err());
    }
}
