//! Rendition ladder configuration.
//!
//! A [`RenditionProfile`] describes one codec family: the video ladder, the
//! encode mode and the matching audio track. The active [`RenditionLadder`]
//! is the set of enabled profiles; it is immutable per deployment.

use std::collections::HashSet;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default segment duration for manifest packaging, in milliseconds.
pub const DEFAULT_SEGMENT_MS: u32 = 2000;
/// Default frame rate passed to the packager.
pub const DEFAULT_PACKAGE_FPS: u32 = 30;

/// Errors raised while building or validating a ladder.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProfileError {
    #[error("Unknown codec profile: {0}")]
    UnknownProfile(String),

    #[error("Rendition ladder is empty")]
    EmptyLadder,

    #[error("Profile {0} has no renditions")]
    NoRenditions(String),

    #[error("Duplicate output name: {0}")]
    DuplicateName(String),

    #[error("Invalid rendition {name}: {reason}")]
    InvalidRendition { name: String, reason: String },

    #[error("Profile {profile} uses container {found}, ladder uses {expected}")]
    MixedContainers {
        profile: String,
        expected: String,
        found: String,
    },
}

/// How a profile's video renditions are encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum EncodeMode {
    /// Single pass, constant quality (CRF)
    ConstantQuality,
    /// Two passes sharing a pass log, constrained bitrate
    MultiPass,
}

impl EncodeMode {
    /// Number of engine invocations per rendition.
    pub fn passes(&self) -> u8 {
        match self {
            EncodeMode::ConstantQuality => 1,
            EncodeMode::MultiPass => 2,
        }
    }
}

/// One entry of the video ladder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct RenditionTarget {
    /// Output name; becomes `<basename>_<name>.<container>`
    pub name: String,
    pub width: u32,
    pub height: u32,
    /// Constant rate factor
    #[serde(default)]
    pub crf: Option<u8>,
    /// Target video bitrate (e.g. "750k")
    #[serde(default)]
    pub bitrate: Option<String>,
    #[serde(default)]
    pub min_rate: Option<String>,
    #[serde(default)]
    pub max_rate: Option<String>,
    /// Additional encoder arguments for this rendition only
    #[serde(default)]
    pub extra_args: Vec<String>,
}

impl RenditionTarget {
    pub fn new(name: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            name: name.into(),
            width,
            height,
            crf: None,
            bitrate: None,
            min_rate: None,
            max_rate: None,
            extra_args: Vec::new(),
        }
    }

    pub fn with_crf(mut self, crf: u8) -> Self {
        self.crf = Some(crf);
        self
    }

    pub fn with_bitrate(
        mut self,
        bitrate: impl Into<String>,
        min_rate: impl Into<String>,
        max_rate: impl Into<String>,
    ) -> Self {
        self.bitrate = Some(bitrate.into());
        self.min_rate = Some(min_rate.into());
        self.max_rate = Some(max_rate.into());
        self
    }

    pub fn with_extra_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extra_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Scale filter value, `WIDTHxHEIGHT`.
    pub fn scale(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }
}

/// Audio-only rendition of a codec family.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct AudioTrack {
    /// Output name; becomes `<basename>_<name>.<extension>`
    pub name: String,
    pub codec: String,
    #[serde(default)]
    pub bitrate: Option<String>,
    /// File extension without the dot
    pub extension: String,
}

/// Encoding recipe for one codec family.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct RenditionProfile {
    /// Profile identifier (e.g. "h264")
    pub id: String,
    /// Encoder passed to `-c:v`
    pub video_codec: String,
    /// Container extension without the dot
    pub container: String,
    pub mode: EncodeMode,
    /// Keyframe interval
    pub gop: u32,
    #[serde(default)]
    pub preset: Option<String>,
    /// Encoder arguments shared by every rendition
    #[serde(default)]
    pub extra_args: Vec<String>,
    pub renditions: Vec<RenditionTarget>,
    pub audio: AudioTrack,
}

impl RenditionProfile {
    /// H.264 ladder: single pass, CRF 25, three portrait resolutions, AAC audio.
    pub fn h264() -> Self {
        let target = |name: &str, w, h| RenditionTarget::new(name, w, h).with_crf(25);
        Self {
            id: "h264".to_string(),
            video_codec: "libx264".to_string(),
            container: "mp4".to_string(),
            mode: EncodeMode::ConstantQuality,
            gop: 30,
            preset: Some("slow".to_string()),
            extra_args: Vec::new(),
            renditions: vec![
                target("h264_640p", 320, 640),
                target("h264_1280p", 720, 1280),
                target("h264_1920p", 1080, 1920),
            ],
            audio: AudioTrack {
                name: "audio".to_string(),
                codec: "aac".to_string(),
                bitrate: None,
                extension: "mp4".to_string(),
            },
        }
    }

    /// VP9 ladder: two-pass constrained bitrate, Opus audio.
    pub fn vp9() -> Self {
        let target = |name: &str, w, h, crf, rates: (&str, &str, &str), tiles: u8, threads: u8| {
            RenditionTarget::new(name, w, h)
                .with_crf(crf)
                .with_bitrate(rates.0, rates.1, rates.2)
                .with_extra_args([
                    "-tile-columns".to_string(),
                    tiles.to_string(),
                    "-threads".to_string(),
                    threads.to_string(),
                ])
        };
        Self {
            id: "vp9".to_string(),
            video_codec: "libvpx-vp9".to_string(),
            container: "webm".to_string(),
            mode: EncodeMode::MultiPass,
            gop: 240,
            preset: None,
            extra_args: ["-quality", "good", "-speed", "4"]
                .into_iter()
                .map(String::from)
                .collect(),
            renditions: vec![
                target("vp9_640p", 360, 640, 33, ("750k", "375k", "1088k"), 1, 4),
                target("vp9_1280p", 720, 1280, 32, ("1024k", "512k", "1485k"), 2, 8),
                target("vp9_1920p", 1080, 1920, 31, ("1800k", "900k", "2610k"), 3, 8),
            ],
            audio: AudioTrack {
                name: "vp9_audio".to_string(),
                codec: "libopus".to_string(),
                bitrate: None,
                extension: "webm".to_string(),
            },
        }
    }

    /// Look up a built-in profile by identifier.
    pub fn builtin(id: &str) -> Result<Self, ProfileError> {
        match id.trim().to_ascii_lowercase().as_str() {
            "h264" => Ok(Self::h264()),
            "vp9" => Ok(Self::vp9()),
            other => Err(ProfileError::UnknownProfile(other.to_string())),
        }
    }

    /// Encoder arguments for one rendition, excluding input, pass and output.
    pub fn video_args(&self, target: &RenditionTarget) -> Vec<String> {
        let mut args = vec![
            "-c:v".to_string(),
            self.video_codec.clone(),
            "-vf".to_string(),
            format!("scale={}", target.scale()),
            "-g".to_string(),
            self.gop.to_string(),
        ];

        if let Some(crf) = target.crf {
            args.extend(["-crf".to_string(), crf.to_string()]);
        }
        if let Some(ref bitrate) = target.bitrate {
            args.extend(["-b:v".to_string(), bitrate.clone()]);
        }
        if let Some(ref min_rate) = target.min_rate {
            args.extend(["-minrate".to_string(), min_rate.clone()]);
        }
        if let Some(ref max_rate) = target.max_rate {
            args.extend(["-maxrate".to_string(), max_rate.clone()]);
        }
        if let Some(ref preset) = self.preset {
            args.extend(["-preset".to_string(), preset.clone()]);
        }

        args.extend(self.extra_args.iter().cloned());
        args.extend(target.extra_args.iter().cloned());

        // Video renditions carry no audio; the audio track is separate.
        args.push("-an".to_string());
        args
    }

    /// Encoder arguments for the audio-only track.
    pub fn audio_args(&self) -> Vec<String> {
        let mut args = vec![
            "-vn".to_string(),
            "-c:a".to_string(),
            self.audio.codec.clone(),
        ];
        if let Some(ref bitrate) = self.audio.bitrate {
            args.extend(["-b:a".to_string(), bitrate.clone()]);
        }
        args
    }

    fn validate(&self) -> Result<(), ProfileError> {
        if self.renditions.is_empty() {
            return Err(ProfileError::NoRenditions(self.id.clone()));
        }
        for target in &self.renditions {
            let invalid = |reason: &str| ProfileError::InvalidRendition {
                name: target.name.clone(),
                reason: reason.to_string(),
            };
            if target.width == 0 || target.height == 0 {
                return Err(invalid("zero dimension"));
            }
            if self.mode == EncodeMode::MultiPass && target.bitrate.is_none() {
                return Err(invalid("multi-pass encode requires a target bitrate"));
            }
            if self.mode == EncodeMode::ConstantQuality && target.crf.is_none() {
                return Err(invalid("constant-quality encode requires a CRF"));
            }
        }
        Ok(())
    }
}

/// The enabled profiles, in encode order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct RenditionLadder {
    pub profiles: Vec<RenditionProfile>,
}

impl Default for RenditionLadder {
    fn default() -> Self {
        Self {
            profiles: vec![RenditionProfile::h264()],
        }
    }
}

impl RenditionLadder {
    /// Build and validate a ladder from profiles.
    pub fn new(profiles: Vec<RenditionProfile>) -> Result<Self, ProfileError> {
        let ladder = Self { profiles };
        ladder.validate()?;
        Ok(ladder)
    }

    /// Build from a comma-separated list of built-in profile identifiers.
    pub fn from_codec_list(list: &str) -> Result<Self, ProfileError> {
        let profiles = list
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(RenditionProfile::builtin)
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(profiles)
    }

    /// Output names must be unique across the whole ladder because every
    /// output lands in the same directory. Every profile must share one
    /// container, since all tracks are packaged into a single manifest.
    pub fn validate(&self) -> Result<(), ProfileError> {
        let Some(first) = self.profiles.first() else {
            return Err(ProfileError::EmptyLadder);
        };

        let mut names = HashSet::new();
        for profile in &self.profiles {
            profile.validate()?;
            if profile.container != first.container {
                return Err(ProfileError::MixedContainers {
                    profile: profile.id.clone(),
                    expected: first.container.clone(),
                    found: profile.container.clone(),
                });
            }
            let outputs = profile
                .renditions
                .iter()
                .map(|r| r.name.as_str())
                .chain(std::iter::once(profile.audio.name.as_str()));
            for name in outputs {
                if name.is_empty() || name.contains('/') {
                    return Err(ProfileError::InvalidRendition {
                        name: name.to_string(),
                        reason: "name must be a plain file-name fragment".to_string(),
                    });
                }
                if !names.insert(name) {
                    return Err(ProfileError::DuplicateName(name.to_string()));
                }
            }
        }
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = &RenditionProfile> {
        self.profiles.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_ladder_is_h264() {
        let ladder = RenditionLadder::default();
        assert!(ladder.validate().is_ok());
        assert_eq!(ladder.profiles.len(), 1);
        assert_eq!(ladder.profiles[0].id, "h264");
        assert_eq!(ladder.profiles[0].renditions.len(), 3);
    }

    #[test]
    fn test_from_codec_list() {
        let ladder = RenditionLadder::from_codec_list(" vp9 ").unwrap();
        assert_eq!(ladder.profiles.len(), 1);
        assert_eq!(ladder.profiles[0].mode, EncodeMode::MultiPass);

        assert_eq!(
            RenditionLadder::from_codec_list("av1").unwrap_err(),
            ProfileError::UnknownProfile("av1".to_string())
        );
        assert_eq!(
            RenditionLadder::from_codec_list(" , ").unwrap_err(),
            ProfileError::EmptyLadder
        );
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let mut other = RenditionProfile::h264();
        other.id = "h264_alt".to_string();
        for rendition in &mut other.renditions {
            rendition.name = format!("alt_{}", rendition.name);
        }
        let err = RenditionLadder::new(vec![RenditionProfile::h264(), other]).unwrap_err();
        assert_eq!(err, ProfileError::DuplicateName("audio".to_string()));
    }

    #[test]
    fn test_mixed_containers_rejected() {
        let err = RenditionLadder::from_codec_list("h264,vp9").unwrap_err();
        assert_eq!(
            err,
            ProfileError::MixedContainers {
                profile: "vp9".to_string(),
                expected: "mp4".to_string(),
                found: "webm".to_string(),
            }
        );
    }

    #[test]
    fn test_multipass_requires_bitrate() {
        let mut profile = RenditionProfile::vp9();
        profile.renditions[0].bitrate = None;
        let err = RenditionLadder::new(vec![profile]).unwrap_err();
        assert!(matches!(err, ProfileError::InvalidRendition { .. }));
    }

    #[test]
    fn test_h264_video_args() {
        let profile = RenditionProfile::h264();
        let args = profile.video_args(&profile.renditions[0]);
        assert_eq!(&args[..4], ["-c:v", "libx264", "-vf", "scale=320x640"]);
        assert!(args.windows(2).any(|w| w == ["-crf", "25"]));
        assert!(args.windows(2).any(|w| w == ["-preset", "slow"]));
        assert_eq!(args.last().map(String::as_str), Some("-an"));
    }

    #[test]
    fn test_vp9_video_args() {
        let profile = RenditionProfile::vp9();
        let args = profile.video_args(&profile.renditions[1]);
        assert!(args.windows(2).any(|w| w == ["-b:v", "1024k"]));
        assert!(args.windows(2).any(|w| w == ["-maxrate", "1485k"]));
        assert!(args.windows(2).any(|w| w == ["-tile-columns", "2"]));
        assert!(args.windows(2).any(|w| w == ["-quality", "good"]));
    }

    #[test]
    fn test_audio_args() {
        assert_eq!(RenditionProfile::h264().audio_args(), ["-vn", "-c:a", "aac"]);
        assert_eq!(RenditionProfile::vp9().audio_args(), ["-vn", "-c:a", "libopus"]);
    }
}
