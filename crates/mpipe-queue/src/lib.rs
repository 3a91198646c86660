//! Event ingestion for the media pipeline.
//!
//! This crate provides:
//! - The [`EventSource`] consumer-group trait
//! - A Redis Streams implementation with idle-record reclaim and a
//!   dead-letter stream
//! - An in-memory source for tests
//! - The [`IngestionGate`] feeding the bounded work queue
//! - The [`InFlight`] set shared by the gate and the workers

pub mod config;
pub mod error;
pub mod gate;
pub mod inflight;
pub mod memory;
pub mod redis_stream;
pub mod source;

pub use config::QueueConfig;
pub use error::{QueueError, QueueResult};
pub use gate::{Admission, GateMetrics, GateStats, IngestionGate};
pub use inflight::InFlight;
pub use memory::{DeadLetter, MemorySource};
pub use redis_stream::RedisStreamSource;
pub use source::{EventSource, StreamRecord, PAYLOAD_FIELD};
