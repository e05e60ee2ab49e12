//! Tracing setup and structured export logging.
//!
//! Provides consistent, structured logging for export lifecycle events
//! with tracing spans and contextual information.

use std::path::{Path, PathBuf};

use tracing::{error, info, warn, Span};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install the global subscriber.
///
/// `RUST_LOG` overrides the default `vexport=info` filter. Set
/// `LOG_FORMAT=json` for JSON lines.
pub fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("vexport=info"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false),
            )
            .with(env_filter)
            .init();
    }
}

/// Export logger for structured logging with consistent formatting.
#[derive(Debug, Clone)]
pub struct ExportLogger {
    export_id: String,
    target: PathBuf,
}

impl ExportLogger {
    /// Create a logger with a fresh export ID.
    pub fn new(target: impl AsRef<Path>) -> Self {
        Self::with_id(uuid::Uuid::new_v4().simple().to_string(), target)
    }

    pub fn with_id(export_id: impl Into<String>, target: impl AsRef<Path>) -> Self {
        Self {
            export_id: export_id.into(),
            target: target.as_ref().to_path_buf(),
        }
    }

    pub fn log_start(&self, ranges: usize) {
        info!(
            export_id = %self.export_id,
            target = %self.target.display(),
            ranges,
            "Export started"
        );
    }

    pub fn log_resume(&self, progress: f64) {
        info!(
            export_id = %self.export_id,
            target = %self.target.display(),
            progress,
            "Resuming export from checkpoint"
        );
    }

    pub fn log_progress(&self, progress: f64) {
        info!(
            export_id = %self.export_id,
            progress = format_args!("{:.1}%", progress * 100.0),
            "Export progress"
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(export_id = %self.export_id, "Export warning: {}", message);
    }

    pub fn log_error(&self, message: &str) {
        error!(
            export_id = %self.export_id,
            target = %self.target.display(),
            "Export failed: {}", message
        );
    }

    pub fn log_completion(&self, elapsed_secs: f64) {
        info!(
            export_id = %self.export_id,
            target = %self.target.display(),
            elapsed_secs,
            "Export completed"
        );
    }

    pub fn export_id(&self) -> &str {
        &self.export_id
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Span carrying the export ID, for work done on other threads.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "export",
            export_id = %self.export_id,
            target = %self.target.display()
        )
    }
}
