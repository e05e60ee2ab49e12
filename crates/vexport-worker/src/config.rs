//! Export worker configuration.

use std::path::PathBuf;
use std::time::Duration;

use vexport_media::EncoderConfig;

/// Default minimum time between checkpoint writes.
pub const DEFAULT_CHECKPOINT_INTERVAL: Duration = Duration::from_secs(2);

/// Export worker configuration.
#[derive(Debug, Clone)]
pub struct ExportConfig {
    /// Explicit ffmpeg executable; `PATH` lookup when unset
    pub ffmpeg_path: Option<PathBuf>,
    /// Explicit ffprobe executable; `PATH` lookup when unset
    pub ffprobe_path: Option<PathBuf>,
    /// Root for per-target segment directories (kept across restarts for resume)
    pub work_dir: PathBuf,
    /// Root for short-lived intermediates such as concat lists
    pub temp_root: PathBuf,
    /// Fixed checkpoint location; derived from the output path when unset
    pub checkpoint_path: Option<PathBuf>,
    /// Minimum time between rate-limited checkpoint writes
    pub checkpoint_interval: Duration,
    /// Segments cut concurrently
    pub parallel_workers: usize,
    /// Encoder timeout for async runs
    pub encoder_timeout: Option<Duration>,
    /// FFmpeg `-v` level
    pub encoder_log_level: String,
}

impl Default for ExportConfig {
    fn default() -> Self {
        let temp = std::env::temp_dir();
        Self {
            ffmpeg_path: None,
            ffprobe_path: None,
            work_dir: temp.join("vexport-work"),
            temp_root: temp.join("vexport"),
            checkpoint_path: None,
            checkpoint_interval: DEFAULT_CHECKPOINT_INTERVAL,
            parallel_workers: 1,
            encoder_timeout: None,
            encoder_log_level: "error".to_string(),
        }
    }
}

impl ExportConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            ffmpeg_path: env_path("VEXPORT_FFMPEG_PATH"),
            ffprobe_path: env_path("VEXPORT_FFPROBE_PATH"),
            work_dir: env_path("VEXPORT_WORK_DIR").unwrap_or(defaults.work_dir),
            temp_root: env_path("VEXPORT_TEMP_ROOT").unwrap_or(defaults.temp_root),
            checkpoint_path: env_path("VEXPORT_CHECKPOINT_PATH"),
            checkpoint_interval: env_parse("VEXPORT_CHECKPOINT_INTERVAL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.checkpoint_interval),
            parallel_workers: env_parse("VEXPORT_PARALLEL_WORKERS")
                .filter(|n: &usize| *n > 0)
                .unwrap_or(defaults.parallel_workers),
            encoder_timeout: env_parse("VEXPORT_ENCODER_TIMEOUT_SECS").map(Duration::from_secs),
            encoder_log_level: std::env::var("VEXPORT_ENCODER_LOG_LEVEL")
                .unwrap_or(defaults.encoder_log_level),
        }
    }

    /// Encoder settings derived from this config.
    pub fn encoder_config(&self) -> EncoderConfig {
        EncoderConfig {
            ffmpeg_path: self.ffmpeg_path.clone(),
            ffprobe_path: self.ffprobe_path.clone(),
            temp_root: Some(self.temp_root.clone()),
            timeout_secs: self.encoder_timeout.map(|t| t.as_secs()),
            log_level: self.encoder_log_level.clone(),
        }
    }
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var_os(key)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}
