//! Encode settings.
//!
//! An [`EncodeSpec`] is the declarative description of one encode, cut or
//! concat operation. It is translated into FFmpeg output arguments by
//! [`EncodeSpec::to_ffmpeg_args`]; streams whose codec is `copy` are re-muxed
//! without any re-encode flags.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default constant rate factor.
pub const DEFAULT_CRF: u8 = 23;
/// Default audio bitrate.
pub const DEFAULT_AUDIO_BITRATE: &str = "128k";
/// Highest CRF accepted by the x264/x265 encoders.
pub const MAX_CRF: u8 = 51;

/// Video codec selection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum VideoCodec {
    H264,
    H265,
    Vp9,
    Av1,
    /// Stream copy, no re-encode.
    Copy,
    /// Any other encoder name understood by FFmpeg (e.g. `h264_nvenc`).
    Other(String),
}

impl VideoCodec {
    /// FFmpeg encoder name.
    pub fn as_str(&self) -> &str {
        match self {
            Self::H264 => "libx264",
            Self::H265 => "libx265",
            Self::Vp9 => "libvpx-vp9",
            Self::Av1 => "libaom-av1",
            Self::Copy => "copy",
            Self::Other(name) => name,
        }
    }

    pub fn is_copy(&self) -> bool {
        matches!(self, Self::Copy)
    }
}

impl From<String> for VideoCodec {
    fn from(value: String) -> Self {
        match value.as_str() {
            "libx264" | "h264" => Self::H264,
            "libx265" | "h265" | "hevc" => Self::H265,
            "libvpx-vp9" | "vp9" => Self::Vp9,
            "libaom-av1" | "av1" => Self::Av1,
            "copy" => Self::Copy,
            _ => Self::Other(value),
        }
    }
}

impl From<VideoCodec> for String {
    fn from(codec: VideoCodec) -> Self {
        codec.as_str().to_string()
    }
}

impl fmt::Display for VideoCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Audio codec selection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AudioCodec {
    Aac,
    Opus,
    /// Stream copy, no re-encode.
    Copy,
    Other(String),
}

impl AudioCodec {
    /// FFmpeg encoder name.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Aac => "aac",
            Self::Opus => "libopus",
            Self::Copy => "copy",
            Self::Other(name) => name,
        }
    }

    pub fn is_copy(&self) -> bool {
        matches!(self, Self::Copy)
    }
}

impl From<String> for AudioCodec {
    fn from(value: String) -> Self {
        match value.as_str() {
            "aac" => Self::Aac,
            "libopus" | "opus" => Self::Opus,
            "copy" => Self::Copy,
            _ => Self::Other(value),
        }
    }
}

impl From<AudioCodec> for String {
    fn from(codec: AudioCodec) -> Self {
        codec.as_str().to_string()
    }
}

impl fmt::Display for AudioCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// x264-style speed/quality preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    Ultrafast,
    Superfast,
    Veryfast,
    Faster,
    Fast,
    #[default]
    Medium,
    Slow,
    Slower,
    Veryslow,
}

impl Preset {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ultrafast => "ultrafast",
            Self::Superfast => "superfast",
            Self::Veryfast => "veryfast",
            Self::Faster => "faster",
            Self::Fast => "fast",
            Self::Medium => "medium",
            Self::Slow => "slow",
            Self::Slower => "slower",
            Self::Veryslow => "veryslow",
        }
    }
}

impl Preset {
    /// libaom/libvpx `-cpu-used` equivalent, 0 (slowest) to 8 (fastest).
    pub fn cpu_used(&self) -> u8 {
        match self {
            Self::Ultrafast => 8,
            Self::Superfast => 7,
            Self::Veryfast => 6,
            Self::Faster => 5,
            Self::Fast => 4,
            Self::Medium => 3,
            Self::Slow => 2,
            Self::Slower => 1,
            Self::Veryslow => 0,
        }
    }
}

/// Highest `-cpu-used` libvpx-vp9 accepts with `-deadline good`.
const VP9_MAX_CPU_USED: u8 = 5;

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validation errors for [`EncodeSpec`].
#[derive(Debug, Error, PartialEq)]
pub enum EncodeSpecError {
    #[error("CRF {0} out of range (0-{MAX_CRF})")]
    CrfOutOfRange(u8),

    #[error("Resolution requires both width and height")]
    PartialResolution,

    #[error("Invalid dimension: {0}")]
    InvalidDimension(u32),

    #[error("Invalid frame rate: {0}")]
    InvalidFrameRate(f64),

    #[error("Invalid extra argument name: {0:?}")]
    InvalidExtraArg(String),
}

/// Declarative description of an encode operation.
///
/// Immutable once built; consumed by the command layer for exactly one
/// FFmpeg invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodeSpec {
    #[serde(default = "default_video_codec")]
    pub video_codec: VideoCodec,

    #[serde(default = "default_audio_codec")]
    pub audio_codec: AudioCodec,

    #[serde(default)]
    pub preset: Preset,

    /// Constant Rate Factor (quality, 0-51, lower is better)
    #[serde(default = "default_crf")]
    pub crf: u8,

    #[serde(default)]
    pub width: Option<u32>,

    #[serde(default)]
    pub height: Option<u32>,

    #[serde(default)]
    pub fps: Option<f64>,

    /// Target video bitrate (e.g. "4M"); CRF still applies when unset.
    #[serde(default)]
    pub video_bitrate: Option<String>,

    #[serde(default = "default_audio_bitrate")]
    pub audio_bitrate: String,

    /// Encoder thread count, 0 = let FFmpeg decide.
    #[serde(default)]
    pub threads: u32,

    /// Additional output options, name without the leading dash.
    /// Ordered so that command building stays deterministic.
    #[serde(default)]
    pub extra_args: BTreeMap<String, String>,
}

fn default_video_codec() -> VideoCodec {
    VideoCodec::H264
}
fn default_audio_codec() -> AudioCodec {
    AudioCodec::Aac
}
fn default_crf() -> u8 {
    DEFAULT_CRF
}
fn default_audio_bitrate() -> String {
    DEFAULT_AUDIO_BITRATE.to_string()
}

impl Default for EncodeSpec {
    fn default() -> Self {
        Self {
            video_codec: VideoCodec::H264,
            audio_codec: AudioCodec::Aac,
            preset: Preset::Medium,
            crf: DEFAULT_CRF,
            width: None,
            height: None,
            fps: None,
            video_bitrate: None,
            audio_bitrate: DEFAULT_AUDIO_BITRATE.to_string(),
            threads: 0,
            extra_args: BTreeMap::new(),
        }
    }
}

impl EncodeSpec {
    /// Create a re-encoding spec with default H.264/AAC settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Spec that re-muxes every stream bit-exactly.
    pub fn stream_copy() -> Self {
        Self {
            video_codec: VideoCodec::Copy,
            audio_codec: AudioCodec::Copy,
            ..Default::default()
        }
    }

    pub fn with_video_codec(mut self, codec: VideoCodec) -> Self {
        self.video_codec = codec;
        self
    }

    pub fn with_audio_codec(mut self, codec: AudioCodec) -> Self {
        self.audio_codec = codec;
        self
    }

    pub fn with_preset(mut self, preset: Preset) -> Self {
        self.preset = preset;
        self
    }

    pub fn with_crf(mut self, crf: u8) -> Self {
        self.crf = crf;
        self
    }

    pub fn with_resolution(mut self, width: u32, height: u32) -> Self {
        self.width = Some(width);
        self.height = Some(height);
        self
    }

    pub fn with_fps(mut self, fps: f64) -> Self {
        self.fps = Some(fps);
        self
    }

    pub fn with_video_bitrate(mut self, bitrate: impl Into<String>) -> Self {
        self.video_bitrate = Some(bitrate.into());
        self
    }

    pub fn with_audio_bitrate(mut self, bitrate: impl Into<String>) -> Self {
        self.audio_bitrate = bitrate.into();
        self
    }

    pub fn with_threads(mut self, threads: u32) -> Self {
        self.threads = threads;
        self
    }

    pub fn with_extra_arg(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_args.insert(name.into(), value.into());
        self
    }

    /// True when neither stream is re-encoded.
    pub fn is_stream_copy(&self) -> bool {
        self.video_codec.is_copy() && self.audio_codec.is_copy()
    }

    /// Check value ranges before the encoder sees them.
    pub fn validate(&self) -> Result<(), EncodeSpecError> {
        if self.crf > MAX_CRF {
            return Err(EncodeSpecError::CrfOutOfRange(self.crf));
        }
        match (self.width, self.height) {
            (Some(w), Some(h)) => {
                for dim in [w, h] {
                    if dim == 0 {
                        return Err(EncodeSpecError::InvalidDimension(dim));
                    }
                }
            }
            (None, None) => {}
            _ => return Err(EncodeSpecError::PartialResolution),
        }
        if let Some(fps) = self.fps {
            if !fps.is_finite() || fps <= 0.0 {
                return Err(EncodeSpecError::InvalidFrameRate(fps));
            }
        }
        for name in self.extra_args.keys() {
            let bare = name.trim_start_matches('-');
            if bare.is_empty() || bare.contains(char::is_whitespace) {
                return Err(EncodeSpecError::InvalidExtraArg(name.clone()));
            }
        }
        Ok(())
    }

    /// Convert to FFmpeg output arguments.
    ///
    /// A `copy` stream only gets its `-c:<stream> copy` flag; quality,
    /// geometry and rate options are emitted for re-encoded video only.
    /// Speed and quality flags follow the encoder: x264/x265 take `-preset`
    /// and `-crf`, libvpx-vp9 and libaom-av1 take `-cpu-used` and
    /// constant-quality `-crf` with `-b:v 0`. Other encoders get neither;
    /// pass their options through `extra_args`.
    pub fn to_ffmpeg_args(&self) -> Vec<String> {
        let mut args = vec!["-c:v".to_string(), self.video_codec.to_string()];

        if !self.video_codec.is_copy() {
            args.extend(self.rate_control_args());
            if let (Some(w), Some(h)) = (self.width, self.height) {
                args.extend_from_slice(&["-s".to_string(), format!("{}x{}", w, h)]);
            }
            if let Some(fps) = self.fps {
                args.extend_from_slice(&["-r".to_string(), fps.to_string()]);
            }
            if let Some(ref bitrate) = self.video_bitrate {
                args.extend_from_slice(&["-b:v".to_string(), bitrate.clone()]);
            }
        }

        args.extend_from_slice(&["-c:a".to_string(), self.audio_codec.to_string()]);
        if !self.audio_codec.is_copy() {
            args.extend_from_slice(&["-b:a".to_string(), self.audio_bitrate.clone()]);
        }

        if self.threads > 0 && !self.is_stream_copy() {
            args.extend_from_slice(&["-threads".to_string(), self.threads.to_string()]);
        }

        for (name, value) in &self.extra_args {
            let flag = if name.starts_with('-') {
                name.clone()
            } else {
                format!("-{}", name)
            };
            args.push(flag);
            if !value.is_empty() {
                args.push(value.clone());
            }
        }

        args
    }

    fn rate_control_args(&self) -> Vec<String> {
        let crf = self.crf.to_string();
        // Constant quality for libvpx/libaom needs a zero bitrate target.
        let unconstrained = self.video_bitrate.is_none();
        let mut args = match &self.video_codec {
            VideoCodec::H264 | VideoCodec::H265 => {
                return vec!["-preset".to_string(), self.preset.to_string(), "-crf".to_string(), crf];
            }
            VideoCodec::Vp9 => vec![
                "-deadline".to_string(),
                "good".to_string(),
                "-cpu-used".to_string(),
                self.preset.cpu_used().min(VP9_MAX_CPU_USED).to_string(),
                "-crf".to_string(),
                crf,
            ],
            VideoCodec::Av1 => vec![
                "-cpu-used".to_string(),
                self.preset.cpu_used().to_string(),
                "-crf".to_string(),
                crf,
            ],
            VideoCodec::Copy | VideoCodec::Other(_) => return Vec::new(),
        };
        if unconstrained {
            args.extend_from_slice(&["-b:v".to_string(), "0".to_string()]);
        }
        args
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_spec_reencodes() {
        let args = EncodeSpec::default().to_ffmpeg_args();
        assert_eq!(
            args,
            vec!["-c:v", "libx264", "-preset", "medium", "-crf", "23", "-c:a", "aac", "-b:a", "128k"]
        );
    }

    #[test]
    fn test_stream_copy_emits_no_reencode_flags() {
        let spec = EncodeSpec::stream_copy()
            .with_crf(18)
            .with_resolution(1280, 720)
            .with_fps(30.0)
            .with_threads(8);
        let args = spec.to_ffmpeg_args();
        assert_eq!(args, vec!["-c:v", "copy", "-c:a", "copy"]);
    }

    #[test]
    fn test_video_copy_audio_reencode() {
        let spec = EncodeSpec::new()
            .with_video_codec(VideoCodec::Copy)
            .with_threads(4);
        let args = spec.to_ffmpeg_args();
        assert!(!args.contains(&"-crf".to_string()));
        assert!(!args.contains(&"-preset".to_string()));
        assert!(args.contains(&"-b:a".to_string()));
        assert!(args.contains(&"-threads".to_string()));
    }

    #[test]
    fn test_geometry_and_extra_args_order() {
        let spec = EncodeSpec::new()
            .with_resolution(1920, 1080)
            .with_fps(29.97)
            .with_video_bitrate("4M")
            .with_extra_arg("movflags", "+faststart")
            .with_extra_arg("an", "");
        let args = spec.to_ffmpeg_args();
        let joined = args.join(" ");
        assert!(joined.contains("-s 1920x1080"));
        assert!(joined.contains("-r 29.97"));
        assert!(joined.contains("-b:v 4M"));
        // BTreeMap ordering: "an" before "movflags"
        assert!(joined.ends_with("-an -movflags +faststart"));
    }

    #[test]
    fn test_codec_names_round_trip_through_serde() {
        let spec = EncodeSpec::new().with_video_codec(VideoCodec::Other("h264_nvenc".into()));
        let json = serde_json::to_string(&spec).unwrap();
        assert!(json.contains("\"h264_nvenc\""));
        let back: EncodeSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(back, spec);

        let parsed: EncodeSpec = serde_json::from_str(r#"{"video_codec":"copy","audio_codec":"opus"}"#).unwrap();
        assert_eq!(parsed.video_codec, VideoCodec::Copy);
        assert_eq!(parsed.audio_codec, AudioCodec::Opus);
        assert_eq!(parsed.crf, DEFAULT_CRF);
    }

    #[test]
    fn test_validate() {
        assert!(EncodeSpec::default().validate().is_ok());
        assert_eq!(
            EncodeSpec::default().with_crf(60).validate(),
            Err(EncodeSpecError::CrfOutOfRange(60))
        );
        let partial = EncodeSpec {
            width: Some(640),
            ..Default::default()
        };
        assert_eq!(partial.validate(), Err(EncodeSpecError::PartialResolution));
        assert!(EncodeSpec::default().with_fps(0.0).validate().is_err());
        assert!(EncodeSpec::default().with_extra_arg("bad arg", "1").validate().is_err());
    }

    #[test]
    fn test_rate_control_follows_encoder() {
        let x265 = EncodeSpec::new().with_video_codec(VideoCodec::H265).with_preset(Preset::Slow);
        assert_eq!(&x265.to_ffmpeg_args()[..6], ["-c:v", "libx265", "-preset", "slow", "-crf", "23"]);

        let vp9 = EncodeSpec::new()
            .with_video_codec(VideoCodec::Vp9)
            .with_audio_codec(AudioCodec::Opus)
            .with_preset(Preset::Ultrafast)
            .with_crf(31);
        assert_eq!(
            vp9.to_ffmpeg_args().join(" "),
            "-c:v libvpx-vp9 -deadline good -cpu-used 5 -crf 31 -b:v 0 -c:a libopus -b:a 128k"
        );

        let av1 = EncodeSpec::new().with_video_codec(VideoCodec::Av1).with_video_bitrate("2M");
        let joined = av1.to_ffmpeg_args().join(" ");
        assert!(joined.starts_with("-c:v libaom-av1 -cpu-used 3 -crf 23 -b:v 2M"));
        assert!(!joined.contains("-preset"));
        assert!(!joined.contains("-b:v 0"));

        let nvenc = EncodeSpec::new()
            .with_video_codec(VideoCodec::Other("h264_nvenc".into()))
            .with_extra_arg("cq", "21");
        let args = nvenc.to_ffmpeg_args();
        assert!(!args.contains(&"-preset".to_string()));
        assert!(!args.contains(&"-crf".to_string()));
        assert!(args.join(" ").ends_with("-cq 21"));
    }
}
