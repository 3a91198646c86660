//! Scripted engine and packager for exercising the pipeline without the CLI
//! tools installed.
//!
//! Both fakes write small placeholder files where the real tools would, so
//! directory uploads and cleanup can be observed end to end.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use crate::command::{FFMPEG, MP4BOX};
use crate::engine::{EncodeRequest, ManifestPackager, PackageRequest, TranscodeEngine};
use crate::error::{MediaError, MediaResult};

/// Records every invocation and fails those whose output name contains a
/// scripted fragment.
#[derive(Debug, Default)]
pub struct ScriptedEngine {
    invocations: Mutex<Vec<EncodeRequest>>,
    failures: Mutex<HashSet<String>>,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every invocation whose output file name contains `fragment`.
    pub fn fail_on(&self, fragment: impl Into<String>) {
        self.failures.lock().unwrap_or_else(PoisonError::into_inner).insert(fragment.into());
    }

    /// Stop failing.
    pub fn heal(&self) {
        self.failures.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    pub fn invocations(&self) -> Vec<EncodeRequest> {
        self.invocations.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl TranscodeEngine for ScriptedEngine {
    async fn encode(&self, request: &EncodeRequest) -> MediaResult<()> {
        self.invocations.lock().unwrap_or_else(PoisonError::into_inner).push(request.clone());

        let name = request
            .output
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let failing = self
            .failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|fragment| name.contains(fragment.as_str()));
        if failing {
            return Err(MediaError::tool_failed(
                FFMPEG,
                format!("scripted failure for {}", name),
                None,
                Some(1),
            ));
        }

        match request.pass {
            Some(ref pass) if pass.number == 1 => {
                let log = format!("{}-0.log", pass.log_prefix.to_string_lossy());
                tokio::fs::write(log, b"pass log").await?;
            }
            _ => tokio::fs::write(&request.output, b"encoded").await?,
        }
        Ok(())
    }
}

/// Writes the manifest and one segment per track.
#[derive(Debug, Default)]
pub struct ScriptedPackager {
    requests: Mutex<Vec<PackageRequest>>,
    failing: AtomicBool,
}

impl ScriptedPackager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    pub fn requests(&self) -> Vec<PackageRequest> {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl ManifestPackager for ScriptedPackager {
    async fn package(&self, request: &PackageRequest) -> MediaResult<()> {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner).push(request.clone());

        if self.failing.load(Ordering::SeqCst) {
            return Err(MediaError::tool_failed(MP4BOX, "scripted failure", None, Some(1)));
        }

        for track in &request.tracks {
            let segment = request.output_dir.join(format!("segment_{}_1.m4s", track.id));
            tokio::fs::write(segment, b"segment").await?;
        }
        tokio::fs::write(&request.manifest, b"<MPD/>").await?;
        Ok(())
    }
}
