//! Removal of pipeline inputs and intermediates.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::warn;

/// What cleanup removed and how many removals failed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub removed: Vec<PathBuf>,
    pub failures: usize,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.failures == 0
    }

    async fn remove(&mut self, path: &Path) {
        match tokio::fs::remove_file(path).await {
            Ok(()) => self.removed.push(path.to_path_buf()),
            // Already gone counts as cleaned.
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to remove pipeline artifact");
                self.failures += 1;
            }
        }
    }
}

/// Delete the original input and every multi-pass log in `output_dir`.
///
/// A pass log is any file whose name starts with the file name of one of
/// `log_prefixes`; the engine appends its own suffixes. Failures are logged
/// and counted, never returned.
pub async fn remove_intermediates(
    input: &Path,
    output_dir: &Path,
    log_prefixes: &[PathBuf],
) -> CleanupReport {
    let mut report = CleanupReport::default();
    report.remove(input).await;

    let stems: Vec<String> = log_prefixes
        .iter()
        .filter_map(|p| p.file_name())
        .map(|n| n.to_string_lossy().to_string())
        .collect();
    if stems.is_empty() {
        return report;
    }

    let mut entries = match tokio::fs::read_dir(output_dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return report,
        Err(e) => {
            warn!(dir = %output_dir.display(), error = %e, "Failed to scan output directory");
            report.failures += 1;
            return report;
        }
    };

    loop {
        match entries.next_entry().await {
            Ok(Some(entry)) => {
                let name = entry.file_name().to_string_lossy().to_string();
                if stems.iter().any(|stem| name.starts_with(stem.as_str())) {
                    report.remove(&entry.path()).await;
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!(dir = %output_dir.display(), error = %e, "Failed to scan output directory");
                report.failures += 1;
                break;
            }
        }
    }

    report
}
