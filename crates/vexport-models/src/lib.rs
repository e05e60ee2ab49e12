//! Shared data models for the vexport media export core.
//!
//! This crate provides Serde-serializable types for:
//! - Encode settings (codec, preset, quality, geometry)
//! - Cut ranges and timestamp parsing
//! - Export checkpoint records with checksum validation

pub mod checkpoint;
pub mod encode;
pub mod range;
pub mod timestamp;

// Re-export common types
pub use checkpoint::{ExportCheckpoint, CHECKPOINT_FILE_NAME};
pub use encode::{AudioCodec, EncodeSpec, EncodeSpecError, Preset, VideoCodec};
pub use range::CutRange;
pub use timestamp::{format_timestamp, parse_timestamp, TimestampError};
