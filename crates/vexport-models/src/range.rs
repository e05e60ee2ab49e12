//! Cut ranges supplied by the upstream subtitle/screenplay engine.

use serde::{Deserialize, Deserializer, Serialize};

use crate::timestamp::{parse_timestamp, TimestampError};

/// A half-open `[start, end)` range of a source, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CutRange {
    #[serde(deserialize_with = "deserialize_time")]
    pub start: f64,
    #[serde(deserialize_with = "deserialize_time")]
    pub end: f64,
}

impl CutRange {
    /// Create a validated range.
    pub fn new(start: f64, end: f64) -> Result<Self, TimestampError> {
        let range = Self { start, end };
        range.validate()?;
        Ok(range)
    }

    /// Parse a range from two timestamp strings.
    pub fn parse(start: &str, end: &str) -> Result<Self, TimestampError> {
        Self::new(parse_timestamp(start)?, parse_timestamp(end)?)
    }

    pub fn validate(&self) -> Result<(), TimestampError> {
        if !self.start.is_finite() || !self.end.is_finite() || self.start < 0.0 {
            return Err(TimestampError::Negative);
        }
        if self.start >= self.end {
            return Err(TimestampError::StartNotBeforeEnd {
                start: self.start,
                end: self.end,
            });
        }
        Ok(())
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// Accept either a number of seconds or a timestamp string.
fn deserialize_time<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum TimeValue {
        Seconds(f64),
        Text(String),
    }

    match TimeValue::deserialize(deserializer)? {
        TimeValue::Seconds(secs) => Ok(secs),
        TimeValue::Text(text) => parse_timestamp(&text).map_err(serde::de::Error::custom),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_from_mixed_json() {
        let range: CutRange = serde_json::from_str(r#"{"start": "00:00:10.5", "end": 15}"#).unwrap();
        assert_eq!(range.start, 10.5);
        assert_eq!(range.end, 15.0);
        assert!((range.duration() - 4.5).abs() < 1e-9);
    }

    #[test]
    fn test_range_rejects_inverted() {
        assert!(matches!(
            CutRange::new(5.0, 5.0),
            Err(TimestampError::StartNotBeforeEnd { .. })
        ));
        assert!(CutRange::parse("00:00:01", "00:00:02").is_ok());
        let bad: Result<CutRange, _> = serde_json::from_str(r#"{"start": "x", "end": 1}"#);
        assert!(bad.is_err());
    }
}
