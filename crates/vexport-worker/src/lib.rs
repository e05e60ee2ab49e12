//! Resumable export worker.
//!
//! This crate provides:
//! - Checkpoint persistence and resumable exporters
//! - Segment export (cut each range, then concatenate) with resume support
//! - JSON job files, environment configuration and structured logging

pub mod config;
pub mod error;
pub mod exporter;
pub mod job;
pub mod logging;
pub mod resumable;

pub use config::ExportConfig;
pub use error::{WorkerError, WorkerResult};
pub use exporter::{ExportRunner, SegmentExporter};
pub use job::ExportJob;
pub use logging::{init_tracing, ExportLogger};
pub use resumable::{
    CheckpointStatus, CheckpointStore, ExportSession, ExportState, Exporter, ResumableExport, ResumableExporter,
};
