//! Error types for media operations.

use std::path::PathBuf;
use thiserror::Error;

use crate::pipeline::PipelineStage;

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors that can occur during media processing.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("{0} not found in PATH")]
    ToolNotFound(&'static str),

    #[error("{tool} command failed: {message}")]
    ToolFailed {
        tool: &'static str,
        message: String,
        stderr: Option<String>,
        exit_code: Option<i32>,
    },

    #[error("{tool} timed out after {secs} seconds")]
    Timeout { tool: &'static str, secs: u64 },

    #[error("Unsupported content type: {0}")]
    UnsupportedContent(String),

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Invalid pipeline input: {0}")]
    InvalidInput(String),

    #[error("Pipeline stage {stage} failed: {source}")]
    Stage {
        stage: PipelineStage,
        #[source]
        source: Box<MediaError>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MediaError {
    /// Create a tool failure error.
    pub fn tool_failed(
        tool: &'static str,
        message: impl Into<String>,
        stderr: Option<String>,
        exit_code: Option<i32>,
    ) -> Self {
        Self::ToolFailed {
            tool,
            message: message.into(),
            stderr,
            exit_code,
        }
    }

    /// Attribute an error to the pipeline stage it happened in.
    pub fn at_stage(self, stage: PipelineStage) -> Self {
        match self {
            // Already attributed, or terminal before any stage ran.
            e @ (MediaError::Stage { .. }
            | MediaError::UnsupportedContent(_)
            | MediaError::InvalidInput(_)) => e,
            e => MediaError::Stage {
                stage,
                source: Box::new(e),
            },
        }
    }

    /// Stage that failed, if the error came out of the pipeline.
    pub fn stage(&self) -> Option<PipelineStage> {
        match self {
            MediaError::Stage { stage, .. } => Some(*stage),
            MediaError::UnsupportedContent(_) | MediaError::InvalidInput(_) => {
                Some(PipelineStage::Dispatch)
            }
            _ => None,
        }
    }

    /// Terminal errors can never succeed on redelivery.
    pub fn is_terminal(&self) -> bool {
        match self {
            MediaError::UnsupportedContent(_) | MediaError::InvalidInput(_) => true,
            MediaError::Stage { source, .. } => source.is_terminal(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_attribution() {
        let err = MediaError::tool_failed("ffmpeg", "exit 1", None, Some(1))
            .at_stage(PipelineStage::EncodeRenditions);
        assert_eq!(err.stage(), Some(PipelineStage::EncodeRenditions));
        assert!(!err.is_terminal());

        // Re-attributing keeps the innermost stage.
        let err = err.at_stage(PipelineStage::Cleanup);
        assert_eq!(err.stage(), Some(PipelineStage::EncodeRenditions));
    }

    #[test]
    fn test_unsupported_is_terminal() {
        let err = MediaError::UnsupportedContent("text/plain".to_string())
            .at_stage(PipelineStage::EncodeAudio);
        assert!(err.is_terminal());
        assert_eq!(err.stage(), Some(PipelineStage::Dispatch));
    }
}
