//! Shared data models for the media pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - File-upload events and their delivery metadata
//! - Ledger processing status
//! - Supported media kinds
//! - Rendition ladder configuration

pub mod encoding;
pub mod event;
pub mod media;
pub mod status;

// Re-export common types
pub use encoding::{
    AudioTrack, EncodeMode, ProfileError, RenditionLadder, RenditionProfile, RenditionTarget,
};
pub use event::{DeliveryHandle, EventError, FileEvent, TraceContext};
pub use media::MediaKind;
pub use status::{ParseStatusError, ProcessStatus};
