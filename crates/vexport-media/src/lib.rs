#![deny(unreachable_patterns)]
//! Zero-copy media export core.
//!
//! This crate provides:
//! - Composable processing pipelines (batch, streaming, parallel)
//! - A cached memory-mapped engine for frame files and disk-backed arrays
//! - Type-safe FFmpeg command building and execution
//! - Stream-copy cut and concat, and probing via ffprobe
//! - Resource lifecycle tracking with prioritized, best-effort cleanup

pub mod clip;
pub mod command;
pub mod error;
pub mod metrics;
pub mod mmap;
pub mod pipeline;
pub mod probe;
pub mod resources;

pub use clip::{concat, cut, ConcatStage, CutStage, MediaJob};
pub use command::{
    build_command, check_ffmpeg, check_ffprobe, Encoder, EncoderConfig, EncoderOutput, FfmpegCommand,
};
pub use error::{MediaError, MediaResult};
pub use mmap::{
    DiskArray, ElementType, FrameLayout, FrameRange, MapMode, MappedView, MmapConfig, MmapEngine, MmapStats,
};
pub use pipeline::{ExecutionMode, Pipeline, PipelineError, ProcessingStage, StageStats, Transform};
pub use probe::{probe_media, MediaInfo};
pub use resources::{
    CleanupPriority, CleanupReport, CleanupStatus, ResourceHandle, ResourceManager, ResourceScope,
};
