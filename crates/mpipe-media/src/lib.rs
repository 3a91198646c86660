//! Rendition pipeline over external media tools.
//!
//! This crate provides:
//! - Type-safe FFmpeg and MP4Box command building
//! - A process runner with timeouts and stderr capture
//! - The [`TranscodeEngine`] and [`ManifestPackager`] seams
//! - The per-file [`RenditionPipeline`] state machine and its cleanup step
//! - Scripted engines for tests in [`testing`]

pub mod cleanup;
pub mod command;
pub mod engine;
pub mod error;
pub mod pipeline;
pub mod progress;
pub mod testing;

pub use cleanup::CleanupReport;
pub use command::{check_ffmpeg, check_mp4box, FfmpegCommand, Mp4BoxCommand, ProcessRunner, TrackKind};
pub use engine::{
    EncodeRequest, FfmpegEngine, ManifestPackager, Mp4BoxPackager, PackageRequest, PackageTrack,
    PassSpec, TranscodeEngine,
};
pub use error::{MediaError, MediaResult};
pub use pipeline::{PipelineConfig, PipelineOutput, PipelineStage, RenditionPipeline};
