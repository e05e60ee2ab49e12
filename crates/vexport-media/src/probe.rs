//! FFprobe media information.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::{Command, Stdio};

use crate::command::{check_ffprobe, Encoder};
use crate::error::{MediaError, MediaResult};

/// Media file information.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    /// Duration in seconds
    pub duration: f64,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Frame rate (fps)
    pub fps: f64,
    /// Video frames, from the container or estimated from duration
    pub frame_count: u64,
    /// Video codec
    pub codec: String,
    /// File size in bytes
    pub size: u64,
}

/// FFprobe JSON output format.
#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: FfprobeFormat,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
    size: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: String,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
    nb_frames: Option<String>,
    duration: Option<String>,
}

/// Probe a media file using `ffprobe` from `PATH`.
pub fn probe_media(path: impl AsRef<Path>) -> MediaResult<MediaInfo> {
    let ffprobe = check_ffprobe()?;
    probe_with(&ffprobe, path.as_ref())
}

impl Encoder {
    /// Probe a media file using the configured ffprobe.
    pub fn probe(&self, path: impl AsRef<Path>) -> MediaResult<MediaInfo> {
        probe_with(self.ffprobe_path()?, path.as_ref())
    }
}

fn probe_with(ffprobe: &Path, path: &Path) -> MediaResult<MediaInfo> {
    if !path.exists() {
        return Err(MediaError::FileNotFound(path.to_path_buf()));
    }

    let output = Command::new(ffprobe)
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(path)
        .stdin(Stdio::null())
        .output()?;

    if !output.status.success() {
        return Err(MediaError::ProbeFailed {
            message: format!("ffprobe failed on {}", path.display()),
            stderr: Some(String::from_utf8_lossy(&output.stderr).to_string()),
        });
    }

    parse_probe_output(&output.stdout)
}

fn parse_probe_output(json: &[u8]) -> MediaResult<MediaInfo> {
    let probe: FfprobeOutput = serde_json::from_slice(json)?;

    let video_stream = probe
        .streams
        .iter()
        .find(|s| s.codec_type == "video")
        .ok_or_else(|| MediaError::ProbeFailed {
            message: "No video stream found".to_string(),
            stderr: None,
        })?;

    let duration = parse_number::<f64>(probe.format.duration.as_deref())
        .or_else(|| parse_number(video_stream.duration.as_deref()))
        .unwrap_or(0.0);

    let size = parse_number(probe.format.size.as_deref()).unwrap_or(0);

    let fps = video_stream
        .avg_frame_rate
        .as_deref()
        .and_then(parse_frame_rate)
        .or_else(|| video_stream.r_frame_rate.as_deref().and_then(parse_frame_rate))
        .unwrap_or(30.0);

    let frame_count = parse_number(video_stream.nb_frames.as_deref())
        .unwrap_or_else(|| (duration * fps).round() as u64);

    Ok(MediaInfo {
        duration,
        width: video_stream.width.unwrap_or(0),
        height: video_stream.height.unwrap_or(0),
        fps,
        frame_count,
        codec: video_stream.codec_name.clone().unwrap_or_default(),
        size,
    })
}

fn parse_number<T: std::str::FromStr>(value: Option<&str>) -> Option<T> {
    value.and_then(|v| v.parse().ok())
}

/// Parse frame rate string (e.g., "30/1" or "29.97").
pub fn parse_frame_rate(s: &str) -> Option<f64> {
    if let Some((num, den)) = s.split_once('/') {
        let num: f64 = num.parse().ok()?;
        let den: f64 = den.parse().ok()?;
        if den > 0.0 && num > 0.0 {
            return Some(num / den);
        }
        return None;
    }
    s.parse().ok().filter(|fps: &f64| *fps > 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_frame_rate() {
        assert!((parse_frame_rate("30/1").unwrap() - 30.0).abs() < 0.01);
        assert!((parse_frame_rate("30000/1001").unwrap() - 29.97).abs() < 0.01);
        assert!((parse_frame_rate("29.97").unwrap() - 29.97).abs() < 0.01);
        assert!(parse_frame_rate("0/0").is_none());
    }

    #[test]
    fn test_parse_probe_output() {
        let json = br#"{
            "format": {"duration": "10.000000", "size": "123456"},
            "streams": [
                {"codec_type": "audio", "codec_name": "aac"},
                {"codec_type": "video", "codec_name": "h264", "width": 320, "height": 240,
                 "r_frame_rate": "25/1", "avg_frame_rate": "25/1", "nb_frames": "250"}
            ]
        }"#;
        let info = parse_probe_output(json).unwrap();
        assert_eq!(info.codec, "h264");
        assert_eq!((info.width, info.height), (320, 240));
        assert_eq!(info.frame_count, 250);
        assert_eq!(info.size, 123456);
        assert!((info.duration - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_frame_count_estimated_without_nb_frames() {
        let json = br#"{
            "format": {"duration": "2.0"},
            "streams": [{"codec_type": "video", "avg_frame_rate": "0/0", "r_frame_rate": "24/1"}]
        }"#;
        let info = parse_probe_output(json).unwrap();
        assert_eq!(info.frame_count, 48);
    }

    #[test]
    fn test_no_video_stream() {
        let json = br#"{"format": {}, "streams": [{"codec_type": "audio"}]}"#;
        assert!(matches!(
            parse_probe_output(json),
            Err(MediaError::ProbeFailed { .. })
        ));
    }

    #[test]
    fn test_missing_file() {
        let result = probe_with(Path::new("ffprobe"), Path::new("/nonexistent/clip.mp4"));
        assert!(matches!(result, Err(MediaError::FileNotFound(_))));
    }
}
