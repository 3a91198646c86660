//! FFmpeg and MP4Box command builders and the process runner.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, trace, warn};

use crate::error::{MediaError, MediaResult};
use crate::progress::{parse_progress_line, FfmpegProgress};

pub const FFMPEG: &str = "ffmpeg";
pub const MP4BOX: &str = "MP4Box";

/// Lines of stderr kept for error reports.
const STDERR_TAIL_LINES: usize = 20;

/// Builder for FFmpeg commands.
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    /// Input file path
    input: PathBuf,
    /// Output file path; `None` discards output (first pass)
    output: Option<PathBuf>,
    /// Output arguments (after -i)
    output_args: Vec<String>,
    /// Whether to overwrite output
    overwrite: bool,
}

impl FfmpegCommand {
    /// Create a new FFmpeg command.
    pub fn new(input: impl AsRef<Path>, output: impl AsRef<Path>) -> Self {
        Self {
            input: input.as_ref().to_path_buf(),
            output: Some(output.as_ref().to_path_buf()),
            output_args: Vec::new(),
            overwrite: true,
        }
    }

    /// Add output arguments (after -i).
    pub fn output_arg(mut self, arg: impl Into<String>) -> Self {
        self.output_args.push(arg.into());
        self
    }

    /// Add multiple output arguments.
    pub fn output_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Select a pass of a multi-pass encode.
    ///
    /// Pass 1 only produces the pass log, so its media output is discarded.
    pub fn pass(mut self, number: u8, log_prefix: impl AsRef<Path>) -> Self {
        self = self
            .output_arg("-pass")
            .output_arg(number.to_string())
            .output_arg("-passlogfile")
            .output_arg(log_prefix.as_ref().to_string_lossy().to_string());
        if number == 1 {
            self.output = None;
        }
        self
    }

    /// Build the command arguments.
    pub fn build_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        if self.overwrite {
            args.push("-y".to_string());
        }

        args.push("-v".to_string());
        args.push("error".to_string());

        // Progress output to stderr
        args.push("-progress".to_string());
        args.push("pipe:2".to_string());

        args.push("-i".to_string());
        args.push(self.input.to_string_lossy().to_string());

        args.extend(self.output_args.clone());

        match self.output {
            Some(ref output) => args.push(output.to_string_lossy().to_string()),
            None => {
                args.push("-f".to_string());
                args.push("null".to_string());
                args.push("-".to_string());
            }
        }

        args
    }
}

/// Track role inside a DASH manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Video,
    Audio,
}

/// Builder for the MP4Box DASH segmenter.
#[derive(Debug, Clone)]
pub struct Mp4BoxCommand {
    manifest: PathBuf,
    tracks: Vec<(PathBuf, TrackKind, String)>,
    segment_ms: u32,
    segment_name: String,
}

impl Mp4BoxCommand {
    pub fn new(manifest: impl AsRef<Path>) -> Self {
        Self {
            manifest: manifest.as_ref().to_path_buf(),
            tracks: Vec::new(),
            segment_ms: mpipe_models::encoding::DEFAULT_SEGMENT_MS,
            segment_name: "segment_$RepresentationID$_".to_string(),
        }
    }

    /// Segment and fragment duration in milliseconds.
    pub fn segment_ms(mut self, ms: u32) -> Self {
        self.segment_ms = ms;
        self
    }

    pub fn track(mut self, path: impl AsRef<Path>, kind: TrackKind, id: impl Into<String>) -> Self {
        self.tracks
            .push((path.as_ref().to_path_buf(), kind, id.into()));
        self
    }

    pub fn build_args(&self) -> Vec<String> {
        let mut args = vec![
            "-dash".to_string(),
            self.segment_ms.to_string(),
            "-frag".to_string(),
            self.segment_ms.to_string(),
            "-segment-name".to_string(),
            self.segment_name.clone(),
            "-fps".to_string(),
            mpipe_models::encoding::DEFAULT_PACKAGE_FPS.to_string(),
        ];

        for (path, kind, id) in &self.tracks {
            let selector = match kind {
                TrackKind::Video => format!("#video:id={}", id),
                TrackKind::Audio => format!("#audio:id={}:role=main", id),
            };
            args.push(format!("{}{}", path.to_string_lossy(), selector));
        }

        args.push("-out".to_string());
        args.push(self.manifest.to_string_lossy().to_string());
        args
    }
}

/// Runs external media tools to completion.
///
/// The runner never reacts to worker cancellation: an invocation that has
/// started is always awaited so the file it belongs to can finish.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner {
    /// Timeout per invocation
    timeout: Option<Duration>,
}

impl ProcessRunner {
    /// Create a new runner.
    pub fn new() -> Self {
        Self::default()
    }

    /// Kill invocations that run longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Run an FFmpeg command.
    pub async fn run_ffmpeg(&self, cmd: &FfmpegCommand) -> MediaResult<()> {
        self.run(FFMPEG, &cmd.build_args(), None).await
    }

    /// Run an MP4Box command from `cwd`, where segments are written.
    pub async fn run_mp4box(&self, cmd: &Mp4BoxCommand, cwd: &Path) -> MediaResult<()> {
        self.run(MP4BOX, &cmd.build_args(), Some(cwd)).await
    }

    async fn run(&self, tool: &'static str, args: &[String], cwd: Option<&Path>) -> MediaResult<()> {
        which::which(tool).map_err(|_| MediaError::ToolNotFound(tool))?;

        debug!("Running {}: {} {}", tool, tool, args.join(" "));

        let mut command = Command::new(tool);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = cwd {
            command.current_dir(cwd);
        }

        let mut child = command.spawn()?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| MediaError::tool_failed(tool, "stderr not captured", None, None))?;

        // Keep a short tail of non-progress output for the error report.
        let reader = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
            let mut progress = FfmpegProgress::default();
            let mut last = None;

            while let Ok(Some(line)) = lines.next_line().await {
                if let Some(snapshot) = parse_progress_line(&line, &mut progress) {
                    last = Some(snapshot);
                    continue;
                }
                if line.contains('=') && !line.contains(' ') {
                    continue;
                }
                if tail.len() == STDERR_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line);
            }

            (tail.into_iter().collect::<Vec<_>>().join("\n"), last)
        });

        let result = self.wait_for_completion(tool, &mut child).await;
        let (stderr_tail, progress) = reader.await.unwrap_or_default();

        if let Some(progress) = progress {
            trace!(
                tool,
                frames = progress.frame,
                speed = progress.speed,
                "Encode finished"
            );
        }

        match result {
            Ok(None) => Ok(()),
            Ok(Some(code)) => Err(MediaError::tool_failed(
                tool,
                format!("exited with status {:?}", code),
                Some(stderr_tail).filter(|s| !s.is_empty()),
                code,
            )),
            Err(e) => Err(e),
        }
    }

    /// Wait for the child. `Ok(None)` on success, `Ok(Some(code))` on a
    /// non-zero exit.
    async fn wait_for_completion(
        &self,
        tool: &'static str,
        child: &mut Child,
    ) -> MediaResult<Option<Option<i32>>> {
        let status = match self.timeout {
            Some(timeout) => match tokio::time::timeout(timeout, child.wait()).await {
                Ok(status) => status?,
                Err(_) => {
                    warn!("{} timed out after {:?}, killing process", tool, timeout);
                    let _ = child.kill().await;
                    return Err(MediaError::Timeout {
                        tool,
                        secs: timeout.as_secs(),
                    });
                }
            },
            None => child.wait().await?,
        };

        if status.success() {
            Ok(None)
        } else {
            Ok(Some(status.code()))
        }
    }
}

/// Check if FFmpeg is available.
pub fn check_ffmpeg() -> MediaResult<PathBuf> {
    which::which(FFMPEG).map_err(|_| MediaError::ToolNotFound(FFMPEG))
}

/// Check if MP4Box is available.
pub fn check_mp4box() -> MediaResult<PathBuf> {
    which::which(MP4BOX).map_err(|_| MediaError::ToolNotFound(MP4BOX))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_builder() {
        let cmd = FfmpegCommand::new("in.mp4", "out.mp4")
            .output_args(["-c:v", "libx264", "-crf", "25"]);

        let args = cmd.build_args();
        assert_eq!(args[0], "-y");
        assert!(args.windows(2).any(|w| w == ["-i", "in.mp4"]));
        assert!(args.windows(2).any(|w| w == ["-crf", "25"]));
        assert_eq!(args.last().map(String::as_str), Some("out.mp4"));
    }

    #[test]
    fn test_first_pass_discards_output() {
        let args = FfmpegCommand::new("in.mp4", "out.webm")
            .pass(1, "/scratch/clip/clip_vp9_640p_pass")
            .build_args();

        assert!(args.windows(2).any(|w| w == ["-pass", "1"]));
        assert!(args
            .windows(2)
            .any(|w| w == ["-passlogfile", "/scratch/clip/clip_vp9_640p_pass"]));
        assert!(args.ends_with(&["-f".to_string(), "null".to_string(), "-".to_string()]));
        assert!(!args.contains(&"out.webm".to_string()));
    }

    #[test]
    fn test_second_pass_writes_output() {
        let args = FfmpegCommand::new("in.mp4", "out.webm")
            .pass(2, "log")
            .build_args();
        assert!(args.windows(2).any(|w| w == ["-pass", "2"]));
        assert_eq!(args.last().map(String::as_str), Some("out.webm"));
    }

    #[test]
    fn test_mp4box_builder() {
        let args = Mp4BoxCommand::new("clip.mpd")
            .segment_ms(4000)
            .track("clip_h264_640p.mp4", TrackKind::Video, "h264_640p")
            .track("clip_audio.mp4", TrackKind::Audio, "audio")
            .build_args();

        assert_eq!(&args[..4], ["-dash", "4000", "-frag", "4000"]);
        assert!(args.contains(&"clip_h264_640p.mp4#video:id=h264_640p".to_string()));
        assert!(args.contains(&"clip_audio.mp4#audio:id=audio:role=main".to_string()));
        assert!(args.ends_with(&["-out".to_string(), "clip.mpd".to_string()]));
    }
}
