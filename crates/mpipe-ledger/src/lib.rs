//! Per-file processing status ledger.
//!
//! This crate provides:
//! - The [`StatusLedger`] trait with its transition rules
//! - A PostgreSQL implementation over the `media` table, with migrations
//! - An in-memory implementation for tests
//! - Ledger update metrics

pub mod error;
pub mod ledger;
pub mod memory;
pub mod metrics;
pub mod postgres;

pub use error::{LedgerError, LedgerResult};
pub use ledger::StatusLedger;
pub use memory::MemoryLedger;
pub use metrics::LedgerMetrics;
pub use postgres::{LedgerConfig, PgStatusLedger};
