//! Supported media categories.

use serde::{Deserialize, Serialize};

/// Media category of an upload, derived from its declared content type.
///
/// Closed set: anything that does not map to a variant is rejected before
/// any encoding work starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    /// `video/*`: video renditions, audio track and manifest
    Video,
    /// `audio/*`: audio track and manifest
    Audio,
}

impl MediaKind {
    /// Classify a MIME type. Parameters (`; codecs=...`) are ignored.
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        let (top, sub) = essence.split_once('/')?;
        if sub.is_empty() {
            return None;
        }
        match top {
            "video" => Some(MediaKind::Video),
            "audio" => Some(MediaKind::Audio),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Video => "video",
            MediaKind::Audio => "audio",
        }
    }

    /// Whether the pipeline encodes the video ladder for this kind.
    pub fn has_video(&self) -> bool {
        matches!(self, MediaKind::Video)
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert_eq!(MediaKind::from_content_type("video/mp4"), Some(MediaKind::Video));
        assert_eq!(MediaKind::from_content_type("Video/QuickTime"), Some(MediaKind::Video));
        assert_eq!(
            MediaKind::from_content_type("audio/ogg; codecs=opus"),
            Some(MediaKind::Audio)
        );
        assert_eq!(MediaKind::from_content_type("text/plain"), None);
        assert_eq!(MediaKind::from_content_type("image/png"), None);
        assert_eq!(MediaKind::from_content_type("video"), None);
        assert_eq!(MediaKind::from_content_type("video/"), None);
        assert_eq!(MediaKind::from_content_type(""), None);
    }
}
