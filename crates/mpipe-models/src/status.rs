//! Ledger processing status.

use std::str::FromStr;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Processing status of one uploaded file.
///
/// Stored verbatim (`IN_QUEUE`, `PROCESSING`, `SUCCESS`, `FAIL`) in the
/// ledger's status column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessStatus {
    /// Upload recorded, waiting for a worker
    #[default]
    InQueue,
    /// A worker is running the pipeline
    Processing,
    /// Outputs are uploaded; terminal
    Success,
    /// Last attempt failed; eligible for retry
    Fail,
}

impl ProcessStatus {
    pub const ALL: [ProcessStatus; 4] = [
        ProcessStatus::InQueue,
        ProcessStatus::Processing,
        ProcessStatus::Success,
        ProcessStatus::Fail,
    ];

    /// Get string representation of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessStatus::InQueue => "IN_QUEUE",
            ProcessStatus::Processing => "PROCESSING",
            ProcessStatus::Success => "SUCCESS",
            ProcessStatus::Fail => "FAIL",
        }
    }

    /// No transition out of `SUCCESS` is permitted.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProcessStatus::Success)
    }

    /// Whether a worker may start processing a file in this state.
    pub fn can_start(&self) -> bool {
        matches!(self, ProcessStatus::InQueue | ProcessStatus::Fail)
    }
}

impl std::fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Error)]
#[error("Unknown process status: {0}")]
pub struct ParseStatusError(pub String);

impl FromStr for ProcessStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ProcessStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ParseStatusError(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_strings() {
        for status in ProcessStatus::ALL {
            assert_eq!(status.as_str().parse::<ProcessStatus>().unwrap(), status);
        }
        assert!("DONE".parse::<ProcessStatus>().is_err());
    }

    #[test]
    fn test_serde_matches_column_values() {
        assert_eq!(serde_json::to_string(&ProcessStatus::InQueue).unwrap(), "\"IN_QUEUE\"");
        assert_eq!(serde_json::to_string(&ProcessStatus::Fail).unwrap(), "\"FAIL\"");
    }

    #[test]
    fn test_terminal() {
        assert!(ProcessStatus::Success.is_terminal());
        assert!(!ProcessStatus::Fail.is_terminal());
        assert!(ProcessStatus::Fail.can_start());
        assert!(!ProcessStatus::Processing.can_start());
    }
}
