//! Worker error types.

use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Storage error: {0}")]
    Storage(#[from] mpipe_storage::StorageError),

    #[error("Media error: {0}")]
    Media(#[from] mpipe_media::MediaError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    /// No redelivery can make this file succeed.
    pub fn is_terminal(&self) -> bool {
        match self {
            WorkerError::Media(e) => e.is_terminal(),
            WorkerError::Storage(mpipe_storage::StorageError::InvalidKey(_)) => true,
            _ => false,
        }
    }

    /// Check if error is retryable.
    pub fn is_retryable(&self) -> bool {
        !self.is_terminal()
    }

    /// Short label used in logs and metrics.
    pub fn stage(&self) -> &'static str {
        match self {
            WorkerError::Media(e) => e.stage().map(|s| s.as_str()).unwrap_or("pipeline"),
            WorkerError::Storage(mpipe_storage::StorageError::UploadFailed(_)) => "upload",
            WorkerError::Storage(_) => "download",
            WorkerError::Io(_) => "scratch",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mpipe_media::{MediaError, PipelineStage};

    #[test]
    fn test_classification() {
        let unsupported = WorkerError::from(MediaError::UnsupportedContent("text/plain".into()));
        assert!(unsupported.is_terminal());
        assert!(!unsupported.is_retryable());
        assert_eq!(unsupported.stage(), "dispatch");

        let encode = WorkerError::from(
            MediaError::tool_failed("ffmpeg", "exit 1", None, Some(1))
                .at_stage(PipelineStage::EncodeRenditions),
        );
        assert!(!encode.is_terminal());
        assert!(encode.is_retryable());
        assert_eq!(encode.stage(), "encode_renditions");

        let upload = WorkerError::from(mpipe_storage::StorageError::upload_failed("503"));
        assert!(upload.is_retryable());
        assert_eq!(upload.stage(), "upload");
    }
}
