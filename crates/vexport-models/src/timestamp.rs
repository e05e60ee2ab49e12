//! Timestamp parsing for cut ranges.
//!
//! Ranges arrive from the subtitle/screenplay layer as `HH:MM:SS.mmm`
//! strings (SRT-style commas are accepted too) or as plain seconds.

use thiserror::Error;

/// Longest source we accept a range for (24 hours in seconds).
pub const MAX_SOURCE_DURATION_SECS: f64 = 86400.0;

/// Timestamp parsing/validation error.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TimestampError {
    #[error("Timestamp cannot be empty")]
    Empty,

    #[error("Timestamp cannot be negative")]
    Negative,

    #[error("Invalid {0} value: {1}")]
    InvalidValue(&'static str, String),

    #[error("Invalid timestamp format '{0}'. Use HH:MM:SS[.mmm], MM:SS[.mmm] or seconds")]
    InvalidFormat(String),

    #[error("Start time ({start:.3}s) must be before end time ({end:.3}s)")]
    StartNotBeforeEnd { start: f64, end: f64 },

    #[error("Timestamp {0:.1}s exceeds the maximum source duration of 24 hours")]
    ExceedsMaxDuration(f64),
}

/// Parse a timestamp string to total seconds.
///
/// Supports `HH:MM:SS`, `MM:SS` and `SS`, each with an optional fractional
/// part separated by `.` or `,`.
///
/// # Examples
/// ```
/// use vexport_models::timestamp::parse_timestamp;
/// assert_eq!(parse_timestamp("01:30:00").unwrap(), 5400.0);
/// assert_eq!(parse_timestamp("00:00:01,500").unwrap(), 1.5);
/// assert_eq!(parse_timestamp("90").unwrap(), 90.0);
/// ```
pub fn parse_timestamp(ts: &str) -> Result<f64, TimestampError> {
    let ts = ts.trim();
    if ts.is_empty() {
        return Err(TimestampError::Empty);
    }

    let normalized = ts.replace(',', ".");
    let parts: Vec<&str> = normalized.split(':').collect();
    let (hours, minutes, seconds) = match parts.as_slice() {
        [s] => ("0", "0", *s),
        [m, s] => ("0", *m, *s),
        [h, m, s] => (*h, *m, *s),
        _ => return Err(TimestampError::InvalidFormat(ts.to_string())),
    };

    let hours = parse_component("hours", hours)?;
    let minutes = parse_component("minutes", minutes)?;
    let seconds = parse_component("seconds", seconds)?;

    let total = hours * 3600.0 + minutes * 60.0 + seconds;
    if total > MAX_SOURCE_DURATION_SECS {
        return Err(TimestampError::ExceedsMaxDuration(total));
    }
    Ok(total)
}

fn parse_component(name: &'static str, value: &str) -> Result<f64, TimestampError> {
    let parsed: f64 = value
        .parse()
        .map_err(|_| TimestampError::InvalidValue(name, value.to_string()))?;
    if !parsed.is_finite() {
        return Err(TimestampError::InvalidValue(name, value.to_string()));
    }
    if parsed < 0.0 {
        return Err(TimestampError::Negative);
    }
    Ok(parsed)
}

/// Format seconds as `HH:MM:SS.mmm`.
pub fn format_timestamp(total_secs: f64) -> String {
    let total_ms = (total_secs.max(0.0) * 1000.0).round() as u64;
    let hours = total_ms / 3_600_000;
    let mins = (total_ms % 3_600_000) / 60_000;
    let secs = (total_ms % 60_000) / 1000;
    let millis = total_ms % 1000;
    format!("{:02}:{:02}:{:02}.{:03}", hours, mins, secs, millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_timestamp_forms() {
        assert_eq!(parse_timestamp("00:00:00").unwrap(), 0.0);
        assert_eq!(parse_timestamp("01:30:45").unwrap(), 5445.0);
        assert_eq!(parse_timestamp("05:30").unwrap(), 330.0);
        assert_eq!(parse_timestamp("90").unwrap(), 90.0);
        assert!((parse_timestamp("00:00:30.500").unwrap() - 30.5).abs() < 0.001);
        assert!((parse_timestamp("00:01:02,250").unwrap() - 62.25).abs() < 0.001);
    }

    #[test]
    fn test_parse_timestamp_errors() {
        assert_eq!(parse_timestamp("  "), Err(TimestampError::Empty));
        assert!(matches!(parse_timestamp("abc"), Err(TimestampError::InvalidValue(_, _))));
        assert!(matches!(parse_timestamp("1:2:3:4"), Err(TimestampError::InvalidFormat(_))));
        assert_eq!(parse_timestamp("-5"), Err(TimestampError::Negative));
        assert!(matches!(parse_timestamp("25:00:00"), Err(TimestampError::ExceedsMaxDuration(_))));
    }

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp(0.0), "00:00:00.000");
        assert_eq!(format_timestamp(3661.5), "01:01:01.500");
        assert_eq!(format_timestamp(-3.0), "00:00:00.000");
        let text = format_timestamp(1234.567);
        assert!((parse_timestamp(&text).unwrap() - 1234.567).abs() < 0.0005);
    }
}
