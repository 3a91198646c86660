//! Rendition pipeline orchestrator.
//!
//! Per file: `Dispatch → {EncodeRenditions → EncodeAudio} per profile →
//! PackageManifest → Cleanup`. Stages run strictly in order and the first
//! failure ends the run; cleanup runs either way.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::Counter;
use mpipe_models::encoding::{DEFAULT_SEGMENT_MS, RenditionTarget};
use mpipe_models::{MediaKind, ProfileError, RenditionLadder, RenditionProfile};
use tracing::{debug, info};

use crate::cleanup::{remove_intermediates, CleanupReport};
use crate::command::{ProcessRunner, TrackKind};
use crate::engine::{
    EncodeRequest, FfmpegEngine, ManifestPackager, Mp4BoxPackager, PackageRequest, PackageTrack,
    PassSpec, TranscodeEngine,
};
use crate::error::{MediaError, MediaResult};

/// A step of the per-file state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineStage {
    Dispatch,
    EncodeRenditions,
    EncodeAudio,
    PackageManifest,
    Cleanup,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::Dispatch => "dispatch",
            PipelineStage::EncodeRenditions => "encode_renditions",
            PipelineStage::EncodeAudio => "encode_audio",
            PipelineStage::PackageManifest => "package_manifest",
            PipelineStage::Cleanup => "cleanup",
        }
    }
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pipeline configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Enabled codec profiles
    pub ladder: RenditionLadder,
    /// Manifest segment duration
    pub segment_ms: u32,
    /// Kill engine invocations running longer than this
    pub engine_timeout: Option<Duration>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            ladder: RenditionLadder::default(),
            segment_ms: DEFAULT_SEGMENT_MS,
            engine_timeout: None,
        }
    }
}

impl PipelineConfig {
    /// Create config from environment variables.
    ///
    /// Fails when `PIPELINE_CODECS` names an unknown profile or the
    /// resulting ladder does not validate.
    pub fn from_env() -> Result<Self, ProfileError> {
        let ladder = match std::env::var("PIPELINE_CODECS") {
            Ok(list) if !list.trim().is_empty() => RenditionLadder::from_codec_list(&list)?,
            _ => RenditionLadder::default(),
        };

        Ok(Self {
            ladder,
            segment_ms: std::env::var("PIPELINE_SEGMENT_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|ms| *ms > 0)
                .unwrap_or(DEFAULT_SEGMENT_MS),
            engine_timeout: std::env::var("PIPELINE_ENGINE_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
        })
    }
}

/// Files produced by a completed run.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub kind: MediaKind,
    /// `<scratch>/<basename>/`
    pub output_dir: PathBuf,
    pub manifest: PathBuf,
    pub renditions: Vec<PathBuf>,
    pub audio_tracks: Vec<PathBuf>,
    pub cleanup: CleanupReport,
}

/// Outputs accumulated while stages run.
#[derive(Default)]
struct Artifacts {
    renditions: Vec<PathBuf>,
    audio_tracks: Vec<PathBuf>,
    tracks: Vec<PackageTrack>,
    pass_logs: Vec<PathBuf>,
}

/// Sequences engine and packager invocations for one file at a time.
#[derive(Clone)]
pub struct RenditionPipeline {
    config: Arc<PipelineConfig>,
    engine: Arc<dyn TranscodeEngine>,
    packager: Arc<dyn ManifestPackager>,
    cleanup_failures: Counter,
}

impl RenditionPipeline {
    pub fn new(
        config: PipelineConfig,
        engine: Arc<dyn TranscodeEngine>,
        packager: Arc<dyn ManifestPackager>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            engine,
            packager,
            cleanup_failures: Counter::noop(),
        }
    }

    /// Pipeline over the `ffmpeg` and `MP4Box` CLIs.
    pub fn with_cli_tools(config: PipelineConfig) -> Self {
        let mut runner = ProcessRunner::new();
        if let Some(timeout) = config.engine_timeout {
            runner = runner.with_timeout(timeout);
        }
        Self::new(
            config,
            Arc::new(FfmpegEngine::new(runner.clone())),
            Arc::new(Mp4BoxPackager::new(runner)),
        )
    }

    /// Count cleanup failures on `counter`.
    pub fn with_cleanup_counter(mut self, counter: Counter) -> Self {
        self.cleanup_failures = counter;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Map a declared content type to a media kind.
    pub fn dispatch(content_type: &str) -> MediaResult<MediaKind> {
        MediaKind::from_content_type(content_type)
            .ok_or_else(|| MediaError::UnsupportedContent(content_type.to_string()))
    }

    /// Run every stage for the file at `input`.
    ///
    /// Outputs are written to a directory named after the input's basename,
    /// next to the input. The input itself and any pass logs are removed
    /// before returning, on success and on failure.
    pub async fn run(&self, input: &Path, content_type: &str) -> MediaResult<PipelineOutput> {
        let kind = Self::dispatch(content_type)?;
        let (basename, output_dir) = output_location(input)?;

        if !tokio::fs::try_exists(input).await.unwrap_or(false) {
            return Err(MediaError::FileNotFound(input.to_path_buf()).at_stage(PipelineStage::Dispatch));
        }
        tokio::fs::create_dir_all(&output_dir)
            .await
            .map_err(|e| MediaError::from(e).at_stage(PipelineStage::Dispatch))?;

        let started = Instant::now();
        info!(kind = %kind, basename = %basename, "Starting rendition pipeline");

        let mut artifacts = Artifacts::default();
        let result = self
            .encode_and_package(kind, input, &basename, &output_dir, &mut artifacts)
            .await;

        let cleanup = remove_intermediates(input, &output_dir, &artifacts.pass_logs).await;
        if cleanup.failures > 0 {
            self.cleanup_failures.increment(cleanup.failures as u64);
        }

        let manifest = result?;
        info!(
            renditions = artifacts.renditions.len(),
            audio_tracks = artifacts.audio_tracks.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Rendition pipeline completed"
        );

        Ok(PipelineOutput {
            kind,
            output_dir,
            manifest,
            renditions: artifacts.renditions,
            audio_tracks: artifacts.audio_tracks,
            cleanup,
        })
    }

    async fn encode_and_package(
        &self,
        kind: MediaKind,
        input: &Path,
        basename: &str,
        output_dir: &Path,
        artifacts: &mut Artifacts,
    ) -> MediaResult<PathBuf> {
        for profile in self.config.ladder.iter() {
            if kind.has_video() {
                for target in &profile.renditions {
                    self.encode_rendition(profile, target, input, basename, output_dir, artifacts)
                        .await
                        .map_err(|e| e.at_stage(PipelineStage::EncodeRenditions))?;
                }
            }

            self.encode_audio(profile, input, basename, output_dir, artifacts)
                .await
                .map_err(|e| e.at_stage(PipelineStage::EncodeAudio))?;
        }

        let manifest = output_dir.join(format!("{}.mpd", basename));
        let request = PackageRequest {
            output_dir: output_dir.to_path_buf(),
            manifest: manifest.clone(),
            tracks: artifacts.tracks.clone(),
            segment_ms: self.config.segment_ms,
        };
        debug!(tracks = request.tracks.len(), "Packaging manifest");
        self.packager
            .package(&request)
            .await
            .map_err(|e| e.at_stage(PipelineStage::PackageManifest))?;

        Ok(manifest)
    }

    async fn encode_rendition(
        &self,
        profile: &RenditionProfile,
        target: &RenditionTarget,
        input: &Path,
        basename: &str,
        output_dir: &Path,
        artifacts: &mut Artifacts,
    ) -> MediaResult<()> {
        let output = output_dir.join(format!("{}_{}.{}", basename, target.name, profile.container));
        let args = profile.video_args(target);
        let passes = profile.mode.passes();

        let log_prefix = (passes > 1).then(|| {
            let prefix = output_dir.join(format!("{}_{}_passlog", basename, target.name));
            artifacts.pass_logs.push(prefix.clone());
            prefix
        });

        for number in 1..=passes {
            debug!(rendition = %target.name, pass = number, "Encoding rendition");
            let request = EncodeRequest {
                input: input.to_path_buf(),
                output: output.clone(),
                args: args.clone(),
                pass: log_prefix.as_ref().map(|prefix| PassSpec {
                    number,
                    log_prefix: prefix.clone(),
                }),
            };
            self.engine.encode(&request).await?;
        }

        artifacts.tracks.push(PackageTrack {
            path: output.clone(),
            kind: TrackKind::Video,
            id: target.name.clone(),
        });
        artifacts.renditions.push(output);
        Ok(())
    }

    async fn encode_audio(
        &self,
        profile: &RenditionProfile,
        input: &Path,
        basename: &str,
        output_dir: &Path,
        artifacts: &mut Artifacts,
    ) -> MediaResult<()> {
        let audio = &profile.audio;
        let output = output_dir.join(format!("{}_{}.{}", basename, audio.name, audio.extension));

        debug!(track = %audio.name, codec = %audio.codec, "Encoding audio track");
        self.engine
            .encode(&EncodeRequest {
                input: input.to_path_buf(),
                output: output.clone(),
                args: profile.audio_args(),
                pass: None,
            })
            .await?;

        artifacts.tracks.push(PackageTrack {
            path: output.clone(),
            kind: TrackKind::Audio,
            id: audio.name.clone(),
        });
        artifacts.audio_tracks.push(output);
        Ok(())
    }
}

/// Basename and output directory for an input path.
fn output_location(input: &Path) -> MediaResult<(String, PathBuf)> {
    let invalid = |reason: &str| {
        MediaError::InvalidInput(format!("{}: {}", input.display(), reason))
    };

    let file_name = input
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| invalid("no file name"))?;
    let basename = input
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| invalid("no file name"))?;

    // The output directory would collide with the input file itself.
    if basename == file_name {
        return Err(invalid("file name has no extension"));
    }

    let parent = input.parent().unwrap_or_else(|| Path::new("."));
    Ok((basename.to_string(), parent.join(basename)))
}
