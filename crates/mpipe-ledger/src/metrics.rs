//! Ledger metrics.
//!
//! Counters are registered once when [`LedgerMetrics::register`] is called
//! and then carried by the ledger; nothing is looked up per update.

use std::collections::HashMap;

use metrics::{counter, Counter};
use mpipe_models::ProcessStatus;

use crate::error::LedgerError;

/// Metric name constants for consistency.
pub mod names {
    /// Status updates by requested status and result.
    pub const UPDATES_TOTAL: &str = "mpipe_ledger_updates_total";
}

const RESULTS: [&str; 5] = ["ok", "already_succeeded", "not_found", "database", "other"];

/// Handles for `mpipe_ledger_updates_total{status, result}`.
#[derive(Clone, Default)]
pub struct LedgerMetrics {
    updates: HashMap<(ProcessStatus, &'static str), Counter>,
}

impl LedgerMetrics {
    /// Handles that record nothing.
    pub fn noop() -> Self {
        Self::default()
    }

    /// Register every `{status, result}` series with the installed recorder.
    pub fn register() -> Self {
        let mut updates = HashMap::new();
        for status in ProcessStatus::ALL {
            for result in RESULTS {
                let handle = counter!(
                    names::UPDATES_TOTAL,
                    "status" => status.as_str(),
                    "result" => result
                );
                updates.insert((status, result), handle);
            }
        }
        Self { updates }
    }

    /// Record the outcome of one `update_status` call.
    pub fn record_update(&self, status: ProcessStatus, outcome: Result<(), &LedgerError>) {
        let result = match outcome {
            Ok(()) => "ok",
            Err(e) => match e.kind() {
                kind @ ("already_succeeded" | "not_found" | "database") => kind,
                _ => "other",
            },
        };
        if let Some(counter) = self.updates.get(&(status, result)) {
            counter.increment(1);
        }
    }
}

impl std::fmt::Debug for LedgerMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerMetrics")
            .field("series", &self.updates.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_names() {
        assert!(names::UPDATES_TOTAL.starts_with("mpipe_"));
    }

    #[test]
    fn test_register_covers_every_series() {
        // Without an installed recorder the handles are no-ops.
        let metrics = LedgerMetrics::register();
        assert_eq!(metrics.updates.len(), ProcessStatus::ALL.len() * RESULTS.len());
        metrics.record_update(ProcessStatus::Success, Ok(()));
        metrics.record_update(
            ProcessStatus::Fail,
            Err(&LedgerError::not_found("clip.mp4")),
        );
    }
}
