//! Blob store gateway.
//!
//! This crate provides:
//! - The per-worker [`BlobStore`] connection trait and its [`BlobConnector`]
//! - An S3-compatible gateway with bucket bootstrap
//! - The upload content-type allow-list
//! - An in-memory store for tests

pub mod client;
pub mod content_type;
pub mod error;
pub mod gateway;
pub mod memory;

pub use client::{S3Config, S3Connector, S3Gateway};
pub use content_type::content_type_for;
pub use error::{StorageError, StorageResult};
pub use gateway::{BlobConnector, BlobStore, UploadSummary};
pub use memory::MemoryBlobStore;
