//! In-memory ledger.
//!
//! Same transition rules as the Postgres ledger, plus a history of applied
//! transitions and switches for simulating outages and vanished rows.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use mpipe_models::ProcessStatus;

use crate::error::{LedgerError, LedgerResult};
use crate::ledger::{classify_unapplied, StatusLedger};
use crate::metrics::LedgerMetrics;

#[derive(Debug, Default)]
struct MemoryState {
    rows: HashMap<String, ProcessStatus>,
    transitions: Vec<(String, ProcessStatus)>,
    unavailable: bool,
    read_only: bool,
    missing_on: HashSet<ProcessStatus>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryLedger {
    state: Arc<Mutex<MemoryState>>,
    metrics: LedgerMetrics,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_metrics(mut self, metrics: LedgerMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a new upload as `IN_QUEUE`.
    pub fn register(&self, filename: impl Into<String>) {
        self.state()
            .rows
            .entry(filename.into())
            .or_insert(ProcessStatus::InQueue);
    }

    /// Set a row directly, bypassing transition rules.
    pub fn seed(&self, filename: impl Into<String>, status: ProcessStatus) {
        self.state().rows.insert(filename.into(), status);
    }

    /// Applied transitions in order, across all files.
    pub fn transitions(&self) -> Vec<(String, ProcessStatus)> {
        self.state().transitions.clone()
    }

    /// Applied transitions for one file.
    pub fn history(&self, filename: &str) -> Vec<ProcessStatus> {
        self.state()
            .transitions
            .iter()
            .filter(|(f, _)| f == filename)
            .map(|(_, s)| *s)
            .collect()
    }

    /// Make every call fail as if the database were unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state().unavailable = unavailable;
    }

    /// Serve reads but fail every update as if writes were timing out.
    pub fn set_read_only(&self, read_only: bool) {
        self.state().read_only = read_only;
    }

    /// Report `NotFound` for updates targeting `status`, as if the row had
    /// been deleted underneath the worker.
    pub fn vanish_on(&self, status: ProcessStatus) {
        self.state().missing_on.insert(status);
    }

    fn apply(&self, filename: &str, status: ProcessStatus) -> LedgerResult<()> {
        let mut state = self.state();
        if state.unavailable || state.read_only {
            return Err(LedgerError::Database(sqlx::Error::PoolTimedOut));
        }
        if state.missing_on.contains(&status) {
            return Err(LedgerError::not_found(filename));
        }

        match state.rows.get(filename).copied() {
            Some(current) if current != ProcessStatus::Success => {
                state.rows.insert(filename.to_string(), status);
                state.transitions.push((filename.to_string(), status));
                Ok(())
            }
            current => classify_unapplied(filename, status, current),
        }
    }
}

#[async_trait]
impl StatusLedger for MemoryLedger {
    async fn is_already_processed(&self, filename: &str) -> LedgerResult<bool> {
        let state = self.state();
        if state.unavailable {
            return Err(LedgerError::Database(sqlx::Error::PoolTimedOut));
        }
        Ok(state.rows.get(filename) == Some(&ProcessStatus::Success))
    }

    async fn update_status(&self, filename: &str, status: ProcessStatus) -> LedgerResult<()> {
        let result = self.apply(filename, status);
        self.metrics.record_update(status, result.as_ref().map(|_| ()));
        result
    }

    async fn status(&self, filename: &str) -> LedgerResult<Option<ProcessStatus>> {
        let state = self.state();
        if state.unavailable {
            return Err(LedgerError::Database(sqlx::Error::PoolTimedOut));
        }
        Ok(state.rows.get(filename).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lifecycle() {
        let ledger = MemoryLedger::new();
        ledger.register("clip.mp4");

        assert!(!ledger.is_already_processed("clip.mp4").await.unwrap());
        ledger.update_status("clip.mp4", ProcessStatus::Processing).await.unwrap();
        ledger.update_status("clip.mp4", ProcessStatus::Fail).await.unwrap();
        ledger.update_status("clip.mp4", ProcessStatus::Processing).await.unwrap();
        ledger.update_status("clip.mp4", ProcessStatus::Success).await.unwrap();

        assert!(ledger.is_already_processed("clip.mp4").await.unwrap());
        assert_eq!(
            ledger.history("clip.mp4"),
            [
                ProcessStatus::Processing,
                ProcessStatus::Fail,
                ProcessStatus::Processing,
                ProcessStatus::Success
            ]
        );
    }

    #[tokio::test]
    async fn test_success_is_terminal() {
        let ledger = MemoryLedger::new();
        ledger.seed("clip.mp4", ProcessStatus::Success);

        for status in [ProcessStatus::InQueue, ProcessStatus::Processing, ProcessStatus::Fail] {
            let err = ledger.update_status("clip.mp4", status).await.unwrap_err();
            assert!(matches!(err, LedgerError::AlreadySucceeded { .. }));
        }

        // Repeating SUCCESS is a no-op and records nothing.
        ledger.update_status("clip.mp4", ProcessStatus::Success).await.unwrap();
        assert!(ledger.transitions().is_empty());
        assert_eq!(ledger.status("clip.mp4").await.unwrap(), Some(ProcessStatus::Success));
    }

    #[tokio::test]
    async fn test_missing_row() {
        let ledger = MemoryLedger::new();
        assert!(!ledger.is_already_processed("nope.mp4").await.unwrap());
        let err = ledger
            .update_status("nope.mp4", ProcessStatus::Processing)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::NotFound(_)));
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_concurrent_success_recorded_once() {
        let ledger = MemoryLedger::new();
        ledger.seed("clip.mp4", ProcessStatus::Processing);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move {
                ledger.update_status("clip.mp4", ProcessStatus::Success).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(ledger.history("clip.mp4"), [ProcessStatus::Success]);
    }

    #[tokio::test]
    async fn test_unavailable() {
        let ledger = MemoryLedger::new();
        ledger.set_unavailable(true);
        let err = ledger.is_already_processed("clip.mp4").await.unwrap_err();
        assert!(!err.is_conflict());
    }

    #[tokio::test]
    async fn test_read_only_rejects_updates() {
        let ledger = MemoryLedger::new();
        ledger.register("clip.mp4");
        ledger.set_read_only(true);

        assert!(!ledger.is_already_processed("clip.mp4").await.unwrap());
        let err = ledger
            .update_status("clip.mp4", ProcessStatus::Processing)
            .await
            .unwrap_err();
        assert!(!err.is_conflict());
        assert!(ledger.transitions().is_empty());
    }
}
