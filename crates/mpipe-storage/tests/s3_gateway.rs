//! S3 gateway tests.
//!
//! These tests require an S3-compatible endpoint (e.g. MinIO) configured
//! through the `S3_*` environment variables.
//! Run with: `cargo test -p mpipe-storage -- --ignored`

use mpipe_storage::{BlobStore, S3Config, S3Gateway, StorageError};

async fn gateway() -> S3Gateway {
    let config = S3Config::from_env().expect("S3_* variables must be set");
    S3Gateway::connect(&config).await.expect("connect")
}

#[tokio::test]
#[ignore = "requires an S3-compatible endpoint"]
async fn test_upload_directory_filters_extensions() {
    let gateway = gateway().await;
    let dir = tempfile::tempdir().unwrap();
    tokio::fs::write(dir.path().join("clip.mpd"), b"<MPD/>").await.unwrap();
    tokio::fs::write(dir.path().join("segment_1_1.m4s"), b"seg").await.unwrap();
    tokio::fs::write(dir.path().join("notes.txt"), b"skip me").await.unwrap();

    let prefix = format!("it-{}", std::process::id());
    let summary = gateway.upload_directory(dir.path(), &prefix).await.unwrap();

    assert_eq!(
        summary.uploaded,
        [format!("{prefix}/clip.mpd"), format!("{prefix}/segment_1_1.m4s")]
    );
    assert_eq!(summary.skipped, 1);
}

#[tokio::test]
#[ignore = "requires an S3-compatible endpoint"]
async fn test_download_missing_key() {
    let gateway = gateway().await;
    let dir = tempfile::tempdir().unwrap();

    let err = gateway
        .download("does-not-exist.mp4", dir.path())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        StorageError::NotFound(_) | StorageError::DownloadFailed(_)
    ));
}
