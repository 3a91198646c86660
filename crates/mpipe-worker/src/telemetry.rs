//! Worker telemetry handle.
//!
//! Every counter and histogram is registered once at startup and passed
//! down explicitly. Core code never reaches for the global recorder.

use std::time::Duration;

use metrics::{counter, histogram, Counter, Histogram};
use mpipe_ledger::LedgerMetrics;
use mpipe_queue::GateMetrics;

/// Metric name constants for consistency.
pub mod names {
    /// Files finished by outcome.
    pub const FILES_PROCESSED_TOTAL: &str = "mpipe_files_processed_total";

    /// Wall time of one file, download to acknowledgment.
    pub const FILE_PROCESS_SECONDS: &str = "mpipe_file_process_seconds";

    /// Pipeline artifacts that could not be removed.
    pub const CLEANUP_FAILURES_TOTAL: &str = "mpipe_cleanup_failures_total";
}

/// How a worker finished with one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOutcome {
    /// Processed, uploaded, acknowledged
    Succeeded,
    /// Already `SUCCESS`; acknowledged without work
    Skipped,
    /// Unsupported or unprocessable; dead-lettered
    Rejected,
    /// Failed; left for redelivery
    Failed,
    /// Failed too many times; dead-lettered
    DeadLettered,
    /// Ledger unreachable before any work; left for redelivery
    Deferred,
}

impl FileOutcome {
    pub const ALL: [FileOutcome; 6] = [
        FileOutcome::Succeeded,
        FileOutcome::Skipped,
        FileOutcome::Rejected,
        FileOutcome::Failed,
        FileOutcome::DeadLettered,
        FileOutcome::Deferred,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FileOutcome::Succeeded => "succeeded",
            FileOutcome::Skipped => "skipped",
            FileOutcome::Rejected => "rejected",
            FileOutcome::Failed => "failed",
            FileOutcome::DeadLettered => "dead_lettered",
            FileOutcome::Deferred => "deferred",
        }
    }

    /// Whether the source record was acknowledged.
    pub fn is_acknowledged(&self) -> bool {
        !matches!(self, FileOutcome::Failed | FileOutcome::Deferred)
    }
}

/// Metric handles shared by the gate, the ledger and every worker.
#[derive(Clone)]
pub struct Telemetry {
    pub gate: GateMetrics,
    pub ledger: LedgerMetrics,
    pub cleanup_failures: Counter,
    files: [Counter; 6],
    process_seconds: Histogram,
}

impl Telemetry {
    /// Handles that record nothing.
    pub fn noop() -> Self {
        Self {
            gate: GateMetrics::noop(),
            ledger: LedgerMetrics::noop(),
            cleanup_failures: Counter::noop(),
            files: std::array::from_fn(|_| Counter::noop()),
            process_seconds: Histogram::noop(),
        }
    }

    /// Register every series with the installed recorder.
    pub fn register() -> Self {
        Self {
            gate: GateMetrics::register(),
            ledger: LedgerMetrics::register(),
            cleanup_failures: counter!(names::CLEANUP_FAILURES_TOTAL),
            files: FileOutcome::ALL.map(|outcome| {
                counter!(names::FILES_PROCESSED_TOTAL, "outcome" => outcome.as_str())
            }),
            process_seconds: histogram!(names::FILE_PROCESS_SECONDS),
        }
    }

    /// Record one finished file.
    pub fn record_file(&self, outcome: FileOutcome, elapsed: Duration) {
        self.files[outcome as usize].increment(1);
        self.process_seconds.record(elapsed.as_secs_f64());
    }
}

impl std::fmt::Debug for Telemetry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Telemetry").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_index_matches_all() {
        for (i, outcome) in FileOutcome::ALL.iter().enumerate() {
            assert_eq!(*outcome as usize, i);
        }
    }

    #[test]
    fn test_acknowledged_outcomes() {
        assert!(FileOutcome::Succeeded.is_acknowledged());
        assert!(FileOutcome::Rejected.is_acknowledged());
        assert!(!FileOutcome::Failed.is_acknowledged());
        assert!(!FileOutcome::Deferred.is_acknowledged());
    }

    #[test]
    fn test_noop_records() {
        Telemetry::noop().record_file(FileOutcome::Succeeded, Duration::from_millis(5));
    }
}
