//! Per-file log context.

use mpipe_models::FileEvent;
use tracing::{info_span, Span};

/// Immutable context attached to everything logged while one file is
/// processed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileContext {
    pub worker_id: usize,
    pub filename: String,
    pub owner_id: i64,
    /// Trace ID of the originating notification
    pub trace_id: Option<String>,
    /// Stream delivery, for correlating acknowledgments
    pub delivery: Option<String>,
}

impl FileContext {
    pub fn new(worker_id: usize, event: &FileEvent) -> Self {
        Self {
            worker_id,
            filename: event.filename.clone(),
            owner_id: event.owner_id,
            trace_id: event
                .trace
                .as_ref()
                .and_then(|t| t.trace_id())
                .map(str::to_string),
            delivery: event.delivery.as_ref().map(ToString::to_string),
        }
    }

    /// Span carrying this context as fields.
    pub fn span(&self) -> Span {
        info_span!(
            "process_file",
            worker_id = self.worker_id,
            filename = %self.filename,
            owner_id = self.owner_id,
            trace_id = self.trace_id.as_deref().unwrap_or(""),
            delivery = self.delivery.as_deref().unwrap_or(""),
        )
    }
}
