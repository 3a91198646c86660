//! File-upload events.
//!
//! A [`FileEvent`] is created by deserializing one stream record and is
//! consumed exactly once by a worker.

use std::collections::HashMap;
use std::path::Path;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Header carrying the W3C trace parent.
pub const TRACEPARENT_HEADER: &str = "traceparent";
/// Header carrying vendor trace state.
pub const TRACESTATE_HEADER: &str = "tracestate";

/// Errors raised while turning a stream record into a [`FileEvent`].
#[derive(Debug, Error)]
pub enum EventError {
    #[error("Malformed event payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("Invalid filename {filename:?}: {reason}")]
    InvalidFilename { filename: String, reason: &'static str },

    #[error("Missing content type for {0}")]
    MissingContentType(String),
}

/// Wire body of an upload notification.
///
/// The uploading service historically sent `userId`; both spellings are
/// accepted.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct EventBody {
    pub filename: String,
    #[serde(rename = "contentType")]
    pub content_type: String,
    #[serde(rename = "ownerId", alias = "userId")]
    pub owner_id: i64,
}

/// Opaque token used to acknowledge the source record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeliveryHandle {
    /// Stream the record was read from
    pub stream: String,
    /// Record ID within the stream
    pub message_id: String,
}

impl DeliveryHandle {
    pub fn new(stream: impl Into<String>, message_id: impl Into<String>) -> Self {
        Self {
            stream: stream.into(),
            message_id: message_id.into(),
        }
    }
}

impl std::fmt::Display for DeliveryHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.stream, self.message_id)
    }
}

/// Trace correlation carried from the producer of the notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceContext {
    pub traceparent: String,
    pub tracestate: Option<String>,
}

impl TraceContext {
    /// Extract trace metadata from record headers.
    ///
    /// Returns `None` when no `traceparent` header is present.
    pub fn from_headers(headers: &HashMap<String, String>) -> Option<Self> {
        let traceparent = headers.get(TRACEPARENT_HEADER)?.trim();
        if traceparent.is_empty() {
            return None;
        }
        Some(Self {
            traceparent: traceparent.to_string(),
            tracestate: headers
                .get(TRACESTATE_HEADER)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
        })
    }

    /// Trace ID portion of a `version-traceid-spanid-flags` parent.
    pub fn trace_id(&self) -> Option<&str> {
        let mut parts = self.traceparent.split('-');
        let _version = parts.next()?;
        let trace_id = parts.next()?;
        let span_id = parts.next()?;
        let is_hex = |s: &str| s.chars().all(|c| c.is_ascii_hexdigit());
        if trace_id.len() == 32 && span_id.len() == 16 && is_hex(trace_id) && is_hex(span_id) {
            Some(trace_id)
        } else {
            None
        }
    }

    /// Parent span ID of the originating notification.
    pub fn parent_span_id(&self) -> Option<&str> {
        self.trace_id()?;
        self.traceparent.split('-').nth(2)
    }
}

/// One notification of an uploaded file awaiting processing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEvent {
    /// Object key in the upload bucket, unique per processing cycle
    pub filename: String,
    /// Declared MIME type of the upload
    pub content_type: String,
    /// Uploading user
    pub owner_id: i64,
    /// Handle needed to acknowledge the source record
    pub delivery: Option<DeliveryHandle>,
    /// Trace metadata of the originating notification
    pub trace: Option<TraceContext>,
}

impl FileEvent {
    /// Create an event without delivery metadata.
    pub fn new(filename: impl Into<String>, content_type: impl Into<String>, owner_id: i64) -> Self {
        Self {
            filename: filename.into(),
            content_type: content_type.into(),
            owner_id,
            delivery: None,
            trace: None,
        }
    }

    /// Deserialize a record payload and validate it.
    pub fn from_payload(payload: &[u8]) -> Result<Self, EventError> {
        let body: EventBody = serde_json::from_slice(payload)?;
        validate_filename(&body.filename)?;
        if body.content_type.trim().is_empty() {
            return Err(EventError::MissingContentType(body.filename));
        }
        Ok(Self::new(body.filename, body.content_type, body.owner_id))
    }

    /// Deserialize a full stream record: payload, headers and handle.
    pub fn from_record(
        payload: &[u8],
        headers: &HashMap<String, String>,
        delivery: DeliveryHandle,
    ) -> Result<Self, EventError> {
        let mut event = Self::from_payload(payload)?;
        event.trace = TraceContext::from_headers(headers);
        event.delivery = Some(delivery);
        Ok(event)
    }

    pub fn with_delivery(mut self, delivery: DeliveryHandle) -> Self {
        self.delivery = Some(delivery);
        self
    }

    pub fn with_trace(mut self, trace: TraceContext) -> Self {
        self.trace = Some(trace);
        self
    }

    /// Filename without its final extension.
    ///
    /// Used as the output directory name and remote prefix.
    pub fn basename(&self) -> &str {
        Path::new(&self.filename)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(&self.filename)
    }

    /// Serialize the wire body of this event.
    pub fn to_payload(&self) -> Result<Vec<u8>, EventError> {
        let body = EventBody {
            filename: self.filename.clone(),
            content_type: self.content_type.clone(),
            owner_id: self.owner_id,
        };
        Ok(serde_json::to_vec(&body)?)
    }
}

/// Filenames become local scratch paths, so anything that could escape the
/// worker directory is rejected.
fn validate_filename(filename: &str) -> Result<(), EventError> {
    let invalid = |reason| EventError::InvalidFilename {
        filename: filename.to_string(),
        reason,
    };

    if filename.trim().is_empty() {
        return Err(invalid("empty"));
    }
    if filename.contains('/') || filename.contains('\\') {
        return Err(invalid("contains a path separator"));
    }
    if filename.contains("..") {
        return Err(invalid("contains a parent reference"));
    }
    if filename.starts_with('.') {
        return Err(invalid("hidden file"));
    }
    if filename.chars().any(|c| c.is_control()) {
        return Err(invalid("contains control characters"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_payload() {
        let event = FileEvent::from_payload(
            br#"{"filename":"clip.mp4","contentType":"video/mp4","ownerId":7}"#,
        )
        .unwrap();
        assert_eq!(event.filename, "clip.mp4");
        assert_eq!(event.content_type, "video/mp4");
        assert_eq!(event.owner_id, 7);
        assert!(event.delivery.is_none());
    }

    #[test]
    fn test_parse_legacy_user_id() {
        let event = FileEvent::from_payload(
            br#"{"filename":"clip.mp4","contentType":"video/mp4","userId":12}"#,
        )
        .unwrap();
        assert_eq!(event.owner_id, 12);
    }

    #[test]
    fn test_malformed_payload() {
        let err = FileEvent::from_payload(b"not json").unwrap_err();
        assert!(matches!(err, EventError::Payload(_)));

        let err = FileEvent::from_payload(br#"{"filename":"clip.mp4"}"#).unwrap_err();
        assert!(matches!(err, EventError::Payload(_)));
    }

    #[test]
    fn test_rejects_path_traversal() {
        for name in ["../etc/passwd", "a/b.mp4", "..mp4", ".hidden.mp4", "  "] {
            let payload = format!(
                r#"{{"filename":"{}","contentType":"video/mp4","ownerId":1}}"#,
                name
            );
            let err = FileEvent::from_payload(payload.as_bytes()).unwrap_err();
            assert!(
                matches!(err, EventError::InvalidFilename { .. }),
                "{name} should be rejected"
            );
        }
    }

    #[test]
    fn test_basename() {
        assert_eq!(FileEvent::new("clip.mp4", "video/mp4", 1).basename(), "clip");
        assert_eq!(FileEvent::new("my.clip.mov", "video/quicktime", 1).basename(), "my.clip");
        assert_eq!(FileEvent::new("noext", "video/mp4", 1).basename(), "noext");
    }

    #[test]
    fn test_from_record_attaches_trace() {
        let mut headers = HashMap::new();
        headers.insert(
            TRACEPARENT_HEADER.to_string(),
            "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01".to_string(),
        );
        let event = FileEvent::from_record(
            br#"{"filename":"clip.mp4","contentType":"video/mp4","ownerId":7}"#,
            &headers,
            DeliveryHandle::new("uploads", "1-0"),
        )
        .unwrap();

        let trace = event.trace.as_ref().unwrap();
        assert_eq!(trace.trace_id(), Some("4bf92f3577b34da6a3ce929d0e0e4736"));
        assert_eq!(trace.parent_span_id(), Some("00f067aa0ba902b7"));
        assert_eq!(event.delivery.unwrap().message_id, "1-0");
    }

    #[test]
    fn test_trace_id_rejects_garbage() {
        let trace = TraceContext {
            traceparent: "not-a-trace".to_string(),
            tracestate: None,
        };
        assert_eq!(trace.trace_id(), None);
        assert_eq!(TraceContext::from_headers(&HashMap::new()), None);
    }
}
