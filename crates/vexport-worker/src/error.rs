//! Worker error types.

use thiserror::Error;

use vexport_media::{MediaError, PipelineError};
use vexport_models::{EncodeSpecError, TimestampError};

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid job: {0}")]
    InvalidJob(String),

    #[error("Export interrupted at {:.1}%", .0 * 100.0)]
    Interrupted(f64),

    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Invalid range: {0}")]
    Timestamp(#[from] TimestampError),

    #[error("Invalid encode spec: {0}")]
    EncodeSpec(#[from] EncodeSpecError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn invalid_job(msg: impl Into<String>) -> Self {
        Self::InvalidJob(msg.into())
    }

    /// The media error behind this one, looking through pipeline stage failures.
    pub fn media_error(&self) -> Option<&MediaError> {
        match self {
            Self::Media(e) => Some(e),
            Self::Pipeline(PipelineError::Stage { source, .. }) => source.downcast_ref::<MediaError>(),
            _ => None,
        }
    }

    /// Encoder stderr, verbatim, when the export failed inside FFmpeg.
    pub fn encoder_stderr(&self) -> Option<&str> {
        self.media_error().and_then(MediaError::encoder_stderr)
    }

    /// Whether the failure is a setup problem that no retry will fix.
    pub fn is_configuration(&self) -> bool {
        match self {
            Self::ConfigError(_) => true,
            _ => self.media_error().is_some_and(MediaError::is_configuration),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_failure() -> MediaError {
        MediaError::EncodeExecution {
            command: "ffmpeg -i in.mp4 out.mp4".to_string(),
            stdout: String::new(),
            stderr: "in.mp4: Invalid data found when processing input\n".to_string(),
            exit_code: Some(1),
        }
    }

    #[test]
    fn test_encoder_stderr_direct() {
        let err = WorkerError::from(encode_failure());
        assert_eq!(
            err.encoder_stderr(),
            Some("in.mp4: Invalid data found when processing input\n")
        );
    }

    #[test]
    fn test_encoder_stderr_through_pipeline() {
        let err = WorkerError::from(PipelineError::stage("cut_segment", encode_failure()));
        assert!(err.encoder_stderr().unwrap().contains("Invalid data"));
        assert!(!err.is_configuration());
    }

    #[test]
    fn test_configuration_detection() {
        assert!(WorkerError::from(MediaError::configuration("ffmpeg not found")).is_configuration());
        assert!(WorkerError::config_error("bad work dir").is_configuration());
        assert!(!WorkerError::invalid_job("no ranges").is_configuration());
    }
}
