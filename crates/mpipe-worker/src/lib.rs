//! Media pipeline worker.
//!
//! Wires the ingestion gate, the status ledger, the rendition pipeline and
//! the blob store gateway into a fixed pool of workers.

pub mod config;
pub mod error;
pub mod logging;
pub mod pool;
pub mod processor;
pub mod telemetry;

pub use config::WorkerConfig;
pub use error::{WorkerError, WorkerResult};
pub use logging::FileContext;
pub use pool::{WorkerExit, WorkerPool};
pub use processor::FileProcessor;
pub use telemetry::{FileOutcome, Telemetry};
