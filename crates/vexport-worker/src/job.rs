//! Export job files.
//!
//! Upstream collaborators hand the worker a JSON job:
//!
//! ```json
//! {
//!   "source": "/media/episode01.mp4",
//!   "output": "/exports/episode01_cut.mp4",
//!   "ranges": [{"start": "00:01:02.500", "end": "00:01:10"}, {"start": 95, "end": 120.25}],
//!   "encode": null
//! }
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use vexport_models::{CutRange, EncodeSpec};

use crate::error::{WorkerError, WorkerResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportJob {
    pub source: PathBuf,
    pub output: PathBuf,
    /// Ranges in output order. Timestamps or seconds.
    pub ranges: Vec<CutRange>,
    /// Re-encode settings; stream copy when absent.
    #[serde(default)]
    pub encode: Option<EncodeSpec>,
}

impl ExportJob {
    /// Read and validate a job file.
    pub fn load(path: impl AsRef<Path>) -> WorkerResult<Self> {
        let bytes = std::fs::read(path.as_ref())?;
        let job: Self = serde_json::from_slice(&bytes)?;
        job.validate()?;
        Ok(job)
    }

    pub fn validate(&self) -> WorkerResult<()> {
        if self.ranges.is_empty() {
            return Err(WorkerError::invalid_job("job has no ranges"));
        }
        if self.source == self.output {
            return Err(WorkerError::invalid_job("output would overwrite the source"));
        }
        for range in &self.ranges {
            range.validate()?;
        }
        if let Some(spec) = &self.encode {
            spec.validate()?;
        }
        Ok(())
    }

    /// Encode settings for the cut step.
    pub fn encode_spec(&self) -> EncodeSpec {
        self.encode.clone().unwrap_or_else(EncodeSpec::stream_copy)
    }

    /// Identity of the work this job produces; see [`job_fingerprint`].
    pub fn fingerprint(&self) -> String {
        job_fingerprint(&self.source, &self.ranges, &self.encode_spec())
    }
}

/// Short hex SHA-256 over the absolute source path, the exact range bounds
/// and the encode settings. Two jobs share a fingerprint only when their
/// segments are interchangeable.
pub fn job_fingerprint(source: &Path, ranges: &[CutRange], spec: &EncodeSpec) -> String {
    let source = std::path::absolute(source).unwrap_or_else(|_| source.to_path_buf());
    let mut hasher = Sha256::new();
    hasher.update(source.to_string_lossy().as_bytes());
    for range in ranges {
        hasher.update(b"|");
        hasher.update(range.start.to_bits().to_le_bytes());
        hasher.update(range.end.to_bits().to_le_bytes());
    }
    hasher.update(b"|");
    hasher.update(serde_json::to_vec(spec).unwrap_or_default());
    hasher.finalize().iter().take(8).map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_mixed_time_formats() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("job.json");
        std::fs::write(
            &path,
            r#"{
                "source": "in.mp4",
                "output": "out.mp4",
                "ranges": [{"start": "00:00:01.500", "end": "00:00:03"}, {"start": 10, "end": 12.5}]
            }"#,
        )
        .unwrap();

        let job = ExportJob::load(&path).unwrap();
        assert_eq!(job.ranges[0].start, 1.5);
        assert_eq!(job.ranges[1].duration(), 2.5);
        assert!(job.encode_spec().is_stream_copy());
    }

    #[test]
    fn test_rejects_empty_and_inverted_ranges() {
        let job = ExportJob {
            source: "in.mp4".into(),
            output: "out.mp4".into(),
            ranges: vec![],
            encode: None,
        };
        assert!(matches!(job.validate(), Err(WorkerError::InvalidJob(_))));

        let inverted = ExportJob {
            ranges: vec![CutRange { start: 5.0, end: 2.0 }],
            ..job
        };
        assert!(matches!(inverted.validate(), Err(WorkerError::Timestamp(_))));
    }

    #[test]
    fn test_rejects_output_equal_to_source() {
        let job = ExportJob {
            source: "clip.mp4".into(),
            output: "clip.mp4".into(),
            ranges: vec![CutRange::new(0.0, 1.0).unwrap()],
            encode: None,
        };
        assert!(job.validate().is_err());
    }

    #[test]
    fn test_fingerprint_tracks_source_ranges_and_encoding() {
        let job = ExportJob {
            source: "in.mp4".into(),
            output: "out.mp4".into(),
            ranges: vec![CutRange::new(0.0, 1.0).unwrap(), CutRange::new(2.0, 3.0).unwrap()],
            encode: None,
        };
        assert_eq!(job.fingerprint(), job.clone().fingerprint());
        assert_eq!(job.fingerprint().len(), 16);

        let other_ranges = ExportJob {
            ranges: vec![CutRange::new(0.0, 1.0).unwrap(), CutRange::new(2.0, 3.5).unwrap()],
            ..job.clone()
        };
        let other_source = ExportJob {
            source: "other.mp4".into(),
            ..job.clone()
        };
        let reencoded = ExportJob {
            encode: Some(EncodeSpec::default()),
            ..job.clone()
        };
        assert_ne!(job.fingerprint(), other_ranges.fingerprint());
        assert_ne!(job.fingerprint(), other_source.fingerprint());
        assert_ne!(job.fingerprint(), reencoded.fingerprint());

        // The output path is where the work goes, not what it is.
        let moved = ExportJob {
            output: "elsewhere.mp4".into(),
            ..job.clone()
        };
        assert_eq!(job.fingerprint(), moved.fingerprint());
    }
}
