//! Transcoding engine and manifest packager seams.
//!
//! The pipeline only talks to these traits; [`FfmpegEngine`] and
//! [`Mp4BoxPackager`] are the production adapters.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::command::{FfmpegCommand, Mp4BoxCommand, ProcessRunner, TrackKind};
use crate::error::MediaResult;

/// One pass of a multi-pass encode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassSpec {
    /// 1-based pass number
    pub number: u8,
    /// Prefix of the pass log shared by every pass of one rendition
    pub log_prefix: PathBuf,
}

/// A single engine invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodeRequest {
    pub input: PathBuf,
    pub output: PathBuf,
    /// Encoder arguments, excluding input, pass and output
    pub args: Vec<String>,
    pub pass: Option<PassSpec>,
}

/// A track referenced by the manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageTrack {
    pub path: PathBuf,
    pub kind: TrackKind,
    /// Representation ID in the manifest
    pub id: String,
}

/// A single segmenter invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageRequest {
    /// Directory receiving the manifest and segments
    pub output_dir: PathBuf,
    pub manifest: PathBuf,
    pub tracks: Vec<PackageTrack>,
    pub segment_ms: u32,
}

/// Produces one output file per call. Exit status is the only contract.
#[async_trait]
pub trait TranscodeEngine: Send + Sync {
    async fn encode(&self, request: &EncodeRequest) -> MediaResult<()>;
}

/// Segments tracks and writes the adaptive-streaming manifest.
#[async_trait]
pub trait ManifestPackager: Send + Sync {
    async fn package(&self, request: &PackageRequest) -> MediaResult<()>;
}

/// [`TranscodeEngine`] backed by the `ffmpeg` CLI.
#[derive(Debug, Clone, Default)]
pub struct FfmpegEngine {
    runner: ProcessRunner,
}

impl FfmpegEngine {
    pub fn new(runner: ProcessRunner) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl TranscodeEngine for FfmpegEngine {
    async fn encode(&self, request: &EncodeRequest) -> MediaResult<()> {
        let mut cmd = FfmpegCommand::new(&request.input, &request.output)
            .output_args(request.args.iter().cloned());
        if let Some(ref pass) = request.pass {
            cmd = cmd.pass(pass.number, &pass.log_prefix);
        }
        self.runner.run_ffmpeg(&cmd).await
    }
}

/// [`ManifestPackager`] backed by the `MP4Box` CLI.
#[derive(Debug, Clone, Default)]
pub struct Mp4BoxPackager {
    runner: ProcessRunner,
}

impl Mp4BoxPackager {
    pub fn new(runner: ProcessRunner) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl ManifestPackager for Mp4BoxPackager {
    async fn package(&self, request: &PackageRequest) -> MediaResult<()> {
        // MP4Box writes segments next to the manifest, so it runs inside the
        // output directory with relative paths.
        let relative = |path: &Path| -> PathBuf {
            path.strip_prefix(&request.output_dir)
                .map(Path::to_path_buf)
                .unwrap_or_else(|_| path.to_path_buf())
        };

        let mut cmd = Mp4BoxCommand::new(relative(&request.manifest)).segment_ms(request.segment_ms);
        for track in &request.tracks {
            cmd = cmd.track(relative(&track.path), track.kind, &track.id);
        }

        self.runner.run_mp4box(&cmd, &request.output_dir).await
    }
}
