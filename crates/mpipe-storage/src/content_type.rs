//! Upload allow-list.

use std::path::Path;

/// Extensions that are uploaded, with the content type sent for each.
pub const ALLOWED_CONTENT_TYPES: [(&str, &str); 5] = [
    ("mpd", "application/dash+xml"),
    ("mp4", "video/mp4"),
    ("m4s", "video/iso.segment"),
    ("webm", "video/webm"),
    ("m4a", "audio/mp4"),
];

/// Content type for an output file, or `None` if it must not be uploaded.
pub fn content_type_for(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    ALLOWED_CONTENT_TYPES
        .iter()
        .find(|(allowed, _)| *allowed == ext)
        .map(|(_, content_type)| *content_type)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allow_list() {
        assert_eq!(content_type_for(Path::new("clip.mpd")), Some("application/dash+xml"));
        assert_eq!(content_type_for(Path::new("clip_h264_640p.mp4")), Some("video/mp4"));
        assert_eq!(content_type_for(Path::new("segment_audio_1.m4s")), Some("video/iso.segment"));
        assert_eq!(content_type_for(Path::new("clip_vp9_640p.WEBM")), Some("video/webm"));
        assert_eq!(content_type_for(Path::new("clip.m4a")), Some("audio/mp4"));
    }

    #[test]
    fn test_skips_everything_else() {
        assert_eq!(content_type_for(Path::new("clip_vp9_640p_passlog-0.log")), None);
        assert_eq!(content_type_for(Path::new("clip.txt")), None);
        assert_eq!(content_type_for(Path::new("noext")), None);
    }
}
