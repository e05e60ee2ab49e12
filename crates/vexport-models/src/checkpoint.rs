//! Export checkpoint record.
//!
//! A checkpoint is the furthest validated progress point of one export
//! session. The checksum covers the exact bit pattern of `progress`, the
//! RFC 3339 timestamp and the job fingerprint, so any edit to the persisted
//! record invalidates it. Bit-exact reloads rely on serde_json's
//! `float_roundtrip` parsing.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Default checkpoint file name (relative to the working directory).
pub const CHECKPOINT_FILE_NAME: &str = ".vexport_checkpoint.json";

/// Persisted `{progress, timestamp, job, checksum}` record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportCheckpoint {
    /// Fraction of the export completed, in `[0, 1]`.
    pub progress: f64,
    pub timestamp: DateTime<Utc>,
    /// Fingerprint of the job that wrote the checkpoint, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job: Option<String>,
    /// Hex SHA-256 over progress, timestamp and job.
    pub checksum: String,
}

impl ExportCheckpoint {
    /// Build a checkpoint stamped with the current time.
    pub fn now(progress: f64) -> Self {
        Self::at(progress, Utc::now())
    }

    /// Current-time checkpoint tied to an optional job fingerprint.
    pub fn now_for_job(progress: f64, job: Option<String>) -> Self {
        Self::for_job(progress, Utc::now(), job)
    }

    pub fn at(progress: f64, timestamp: DateTime<Utc>) -> Self {
        Self::for_job(progress, timestamp, None)
    }

    /// Checkpoint tied to one job fingerprint.
    pub fn for_job(progress: f64, timestamp: DateTime<Utc>, job: Option<String>) -> Self {
        let checksum = compute_checksum(progress, &timestamp, job.as_deref());
        Self {
            progress,
            timestamp,
            job,
            checksum,
        }
    }

    /// True when the checksum matches and progress is a valid fraction.
    pub fn is_valid(&self) -> bool {
        self.progress.is_finite()
            && (0.0..=1.0).contains(&self.progress)
            && self.checksum == compute_checksum(self.progress, &self.timestamp, self.job.as_deref())
    }
}

/// Compute the checksum for a progress value, timestamp and optional job.
pub fn compute_checksum(progress: f64, timestamp: &DateTime<Utc>, job: Option<&str>) -> String {
    let mut payload = format!(
        "{:016x}|{}",
        progress.to_bits(),
        timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true)
    );
    if let Some(job) = job {
        payload.push('|');
        payload.push_str(job);
    }
    format!("{:x}", Sha256::digest(payload.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn reload(cp: &ExportCheckpoint) -> ExportCheckpoint {
        let json = serde_json::to_vec_pretty(cp).unwrap();
        serde_json::from_slice(&json).unwrap()
    }

    #[test]
    fn test_checkpoint_validates() {
        let cp = ExportCheckpoint::now(0.42);
        assert!(cp.is_valid());
        assert_eq!(cp.checksum.len(), 64);
    }

    #[test]
    fn test_json_round_trip_keeps_checksum_valid() {
        let cp = ExportCheckpoint::now(0.123456789);
        let json = serde_json::to_string(&cp).unwrap();
        let back: ExportCheckpoint = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cp);
        assert!(back.is_valid());
    }

    #[test]
    fn test_tampering_invalidates() {
        let mut cp = ExportCheckpoint::now(0.5);
        cp.progress = 0.9;
        assert!(!cp.is_valid());

        let mut cp = ExportCheckpoint::now(0.5);
        cp.checksum.replace_range(0..1, if cp.checksum.starts_with('0') { "1" } else { "0" });
        assert!(!cp.is_valid());
    }

    #[test]
    fn test_out_of_range_progress_is_invalid() {
        assert!(!ExportCheckpoint::now(1.5).is_valid());
        assert!(!ExportCheckpoint::now(f64::NAN).is_valid());
    }

    #[test]
    fn test_step_fractions_survive_json() {
        let stamp = Utc::now();
        for total in 1..=500u32 {
            for k in 0..=total {
                let cp = ExportCheckpoint::at(f64::from(k) / f64::from(total), stamp);
                let back = reload(&cp);
                assert_eq!(back.progress.to_bits(), cp.progress.to_bits(), "{k}/{total}");
                assert!(back.is_valid(), "{k}/{total}");
            }
        }
    }

    #[test]
    fn test_job_fingerprint_is_covered() {
        let cp = ExportCheckpoint::for_job(1.0 / 11.0, Utc::now(), Some("abc123".to_string()));
        assert!(reload(&cp).is_valid());

        let mut other = cp.clone();
        other.job = Some("def456".to_string());
        assert!(!other.is_valid());

        let mut dropped = cp;
        dropped.job = None;
        assert!(!dropped.is_valid());
    }

    #[test]
    fn test_record_without_job_field_loads() {
        let cp = ExportCheckpoint::now(0.25);
        let json = serde_json::to_string(&cp).unwrap();
        assert!(!json.contains("\"job\""));
        let back: ExportCheckpoint = serde_json::from_str(&json).unwrap();
        assert_eq!(back.job, None);
        assert!(back.is_valid());
    }

    proptest! {
        #[test]
        fn prop_any_fraction_survives_json(progress in 0.0f64..=1.0) {
            let cp = ExportCheckpoint::now(progress);
            let back = reload(&cp);
            prop_assert_eq!(back.progress.to_bits(), progress.to_bits());
            prop_assert!(back.is_valid());
        }
    }
}
