//! Status ledger seam.

use async_trait::async_trait;
use mpipe_models::ProcessStatus;

use crate::error::{LedgerError, LedgerResult};

/// Per-filename processing state shared by every worker.
///
/// Implementations must be safe to call concurrently without external
/// locking. The only permitted transition into or out of `SUCCESS` is the
/// first one into it.
#[async_trait]
pub trait StatusLedger: Send + Sync {
    /// True iff the file's status is `SUCCESS`.
    ///
    /// A missing row is not an error here; it reads as "not processed".
    async fn is_already_processed(&self, filename: &str) -> LedgerResult<bool>;

    /// Move `filename` to `status`.
    ///
    /// Fails with `AlreadySucceeded` when the row is `SUCCESS` and `status`
    /// is not, and with `NotFound` when there is no row. `SUCCESS` on a
    /// `SUCCESS` row is a no-op.
    async fn update_status(&self, filename: &str, status: ProcessStatus) -> LedgerResult<()>;

    /// Current status, if the file has a row.
    async fn status(&self, filename: &str) -> LedgerResult<Option<ProcessStatus>>;
}

/// Classify an update that changed no row, given the row's current status.
pub(crate) fn classify_unapplied(
    filename: &str,
    requested: ProcessStatus,
    current: Option<ProcessStatus>,
) -> LedgerResult<()> {
    match current {
        None => Err(LedgerError::not_found(filename)),
        Some(ProcessStatus::Success) if requested == ProcessStatus::Success => Ok(()),
        Some(ProcessStatus::Success) => Err(LedgerError::already_succeeded(filename, requested)),
        // The row changed between the update and the read; report it as
        // missing rather than pretend the update landed.
        Some(_) => Err(LedgerError::not_found(filename)),
    }
}
