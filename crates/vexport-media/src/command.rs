//! FFmpeg command builder and executor.
//!
//! The encoder is an opaque boundary: an argument list goes in, captured
//! `{stdout, stderr, exit_code}` comes out. Progress text on stderr is not
//! parsed here.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::{debug, info, warn};

use vexport_models::EncodeSpec;

use crate::error::{MediaError, MediaResult};
use crate::metrics;
use crate::resources::ResourceManager;

/// One `-i` input with the arguments that precede it.
#[derive(Debug, Clone, PartialEq)]
struct FfmpegInput {
    path: PathBuf,
    args: Vec<String>,
}

/// Builder for FFmpeg commands.
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    inputs: Vec<FfmpegInput>,
    /// Input arguments given before any input was added
    pending_input_args: Vec<String>,
    output: PathBuf,
    /// Output arguments (after the last -i)
    output_args: Vec<String>,
    overwrite: bool,
    log_level: String,
}

impl FfmpegCommand {
    /// Create a command with a single input.
    pub fn new(input: impl AsRef<Path>, output: impl AsRef<Path>) -> Self {
        Self::with_output(output).input(input)
    }

    /// Create a command with no inputs yet.
    pub fn with_output(output: impl AsRef<Path>) -> Self {
        Self {
            inputs: Vec::new(),
            pending_input_args: Vec::new(),
            output: output.as_ref().to_path_buf(),
            output_args: Vec::new(),
            overwrite: true,
            log_level: "error".to_string(),
        }
    }

    /// Add an input. Input arguments given before the first input attach to it.
    pub fn input(mut self, path: impl AsRef<Path>) -> Self {
        let args = std::mem::take(&mut self.pending_input_args);
        self.inputs.push(FfmpegInput {
            path: path.as_ref().to_path_buf(),
            args,
        });
        self
    }

    /// Add an input argument (before -i) to the most recent input.
    pub fn input_arg(mut self, arg: impl Into<String>) -> Self {
        match self.inputs.last_mut() {
            Some(input) => input.args.push(arg.into()),
            None => self.pending_input_args.push(arg.into()),
        }
        self
    }

    pub fn input_args<I, S>(self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        args.into_iter().fold(self, |cmd, arg| cmd.input_arg(arg))
    }

    /// Add an output argument (after the last -i).
    pub fn output_arg(mut self, arg: impl Into<String>) -> Self {
        self.output_args.push(arg.into());
        self
    }

    pub fn output_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Seek the most recent input (input-side `-ss`).
    pub fn seek(self, seconds: f64) -> Self {
        self.input_arg("-ss").input_arg(format!("{:.3}", seconds))
    }

    /// Limit output duration.
    pub fn duration(self, seconds: f64) -> Self {
        self.output_arg("-t").output_arg(format!("{:.3}", seconds))
    }

    pub fn video_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:v").output_arg(codec)
    }

    pub fn audio_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:a").output_arg(codec)
    }

    /// Append the codec arguments described by `spec`.
    pub fn encode_spec(self, spec: &EncodeSpec) -> Self {
        self.output_args(spec.to_ffmpeg_args())
    }

    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    pub fn output_path(&self) -> &Path {
        &self.output
    }

    /// Build the argument list (without the executable).
    pub fn build_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        if self.overwrite {
            args.push("-y".to_string());
        }

        args.push("-v".to_string());
        args.push(self.log_level.clone());

        for input in &self.inputs {
            args.extend(input.args.iter().cloned());
            args.push("-i".to_string());
            args.push(input.path.to_string_lossy().to_string());
        }
        // Arguments with no input to attach to still precede the output.
        args.extend(self.pending_input_args.iter().cloned());

        args.extend(self.output_args.iter().cloned());
        args.push(self.output.to_string_lossy().to_string());

        args
    }
}

/// Deterministic argv for encoding `inputs` into `output` according to `spec`.
///
/// Streams whose codec is `copy` get no re-encode flags.
pub fn build_command<P: AsRef<Path>>(spec: &EncodeSpec, inputs: &[P], output: impl AsRef<Path>) -> Vec<String> {
    inputs
        .iter()
        .fold(FfmpegCommand::with_output(output), |cmd, input| cmd.input(input))
        .encode_spec(spec)
        .build_args()
}

/// Captured result of one encoder run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

/// Encoder settings.
#[derive(Debug, Clone)]
pub struct EncoderConfig {
    /// Explicit ffmpeg path; `PATH` lookup when unset.
    pub ffmpeg_path: Option<PathBuf>,
    /// Explicit ffprobe path; `PATH` lookup when unset.
    pub ffprobe_path: Option<PathBuf>,
    /// Root for intermediate artifacts; OS temp dir when unset.
    pub temp_root: Option<PathBuf>,
    /// Kill async runs after this many seconds.
    pub timeout_secs: Option<u64>,
    pub log_level: String,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: None,
            ffprobe_path: None,
            temp_root: None,
            timeout_secs: None,
            log_level: "error".to_string(),
        }
    }
}

/// A located FFmpeg executable plus the resource manager for its artifacts.
#[derive(Debug, Clone)]
pub struct Encoder {
    ffmpeg: PathBuf,
    ffprobe: Option<PathBuf>,
    config: EncoderConfig,
    resources: ResourceManager,
}

impl Encoder {
    /// Resolve the executables. A missing ffmpeg is a configuration error.
    pub fn locate(config: EncoderConfig) -> MediaResult<Self> {
        let ffmpeg = resolve_executable("ffmpeg", config.ffmpeg_path.as_deref())?;
        // ffprobe is only needed for probing; resolve lazily on failure.
        let ffprobe = resolve_executable("ffprobe", config.ffprobe_path.as_deref()).ok();
        let resources = match &config.temp_root {
            Some(root) => ResourceManager::with_temp_root(root),
            None => ResourceManager::new(),
        };

        info!(ffmpeg = %ffmpeg.display(), "Located encoder");
        Ok(Self {
            ffmpeg,
            ffprobe,
            config,
            resources,
        })
    }

    /// Share an existing resource manager for intermediate artifacts.
    pub fn with_resources(mut self, resources: ResourceManager) -> Self {
        self.resources = resources;
        self
    }

    pub fn ffmpeg_path(&self) -> &Path {
        &self.ffmpeg
    }

    pub fn ffprobe_path(&self) -> MediaResult<&Path> {
        self.ffprobe
            .as_deref()
            .ok_or_else(|| MediaError::configuration("ffprobe executable not found"))
    }

    pub fn config(&self) -> &EncoderConfig {
        &self.config
    }

    pub fn resources(&self) -> &ResourceManager {
        &self.resources
    }

    /// Start a command using the configured log level.
    pub fn command(&self, output: impl AsRef<Path>) -> FfmpegCommand {
        FfmpegCommand::with_output(output).log_level(self.config.log_level.clone())
    }

    /// Run the encoder to completion, capturing all output.
    ///
    /// Blocks for the whole run. A non-zero exit is an
    /// [`EncodeExecution`](MediaError::EncodeExecution) error; it is never
    /// retried.
    pub fn execute(&self, argv: &[String]) -> MediaResult<EncoderOutput> {
        self.execute_labeled("execute", argv)
    }

    /// Build and run `cmd`.
    pub fn run(&self, cmd: &FfmpegCommand) -> MediaResult<EncoderOutput> {
        self.execute(&cmd.build_args())
    }

    pub(crate) fn execute_labeled(&self, operation: &str, argv: &[String]) -> MediaResult<EncoderOutput> {
        debug!(operation, "Running: {} {}", self.ffmpeg.display(), argv.join(" "));
        let started = Instant::now();

        let output = std::process::Command::new(&self.ffmpeg)
            .args(argv)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| self.spawn_error(e))?;

        self.finish(operation, argv, output, started.elapsed())
    }

    /// Async variant of [`execute`](Self::execute).
    ///
    /// The child is killed when the configured timeout elapses or `cancel`
    /// flips to `true`.
    pub async fn execute_async(
        &self,
        argv: &[String],
        cancel: Option<watch::Receiver<bool>>,
    ) -> MediaResult<EncoderOutput> {
        debug!("Running async: {} {}", self.ffmpeg.display(), argv.join(" "));
        let started = Instant::now();

        let child = tokio::process::Command::new(&self.ffmpeg)
            .args(argv)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| self.spawn_error(e))?;

        // Dropping the output future drops the child, which kills it.
        let output = child.wait_with_output();
        tokio::pin!(output);

        let timeout = async {
            match self.config.timeout_secs {
                Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
                None => std::future::pending().await,
            }
        };

        let output = tokio::select! {
            result = &mut output => result?,
            _ = wait_cancelled(cancel) => {
                info!("Encoder cancelled, killing process");
                return Err(MediaError::Cancelled);
            }
            _ = timeout => {
                let secs = self.config.timeout_secs.unwrap_or_default();
                warn!("Encoder timed out after {} seconds, killing process", secs);
                return Err(MediaError::Timeout(secs));
            }
        };

        self.finish("execute_async", argv, output, started.elapsed())
    }

    fn spawn_error(&self, e: std::io::Error) -> MediaError {
        if e.kind() == ErrorKind::NotFound {
            MediaError::configuration(format!("ffmpeg not found at {}", self.ffmpeg.display()))
        } else {
            MediaError::Io(e)
        }
    }

    fn finish(
        &self,
        operation: &str,
        argv: &[String],
        output: Output,
        elapsed: Duration,
    ) -> MediaResult<EncoderOutput> {
        let success = output.status.success();
        metrics::record_encoder_run(operation, elapsed.as_secs_f64(), success);

        let result = EncoderOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code(),
        };

        if success {
            debug!(operation, elapsed_ms = elapsed.as_millis() as u64, "Encoder finished");
            return Ok(result);
        }

        warn!(
            operation,
            exit_code = ?result.exit_code,
            "Encoder exited with failure"
        );
        Err(MediaError::EncodeExecution {
            command: format!("{} {}", self.ffmpeg.display(), argv.join(" ")),
            stdout: result.stdout,
            stderr: result.stderr,
            exit_code: result.exit_code,
        })
    }
}

async fn wait_cancelled(cancel: Option<watch::Receiver<bool>>) {
    let Some(mut rx) = cancel else {
        return std::future::pending().await;
    };
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            // Sender gone; cancellation can no longer happen.
            return std::future::pending().await;
        }
    }
}

fn resolve_executable(name: &str, configured: Option<&Path>) -> MediaResult<PathBuf> {
    match configured {
        Some(path) if path.is_file() => Ok(path.to_path_buf()),
        Some(path) => Err(MediaError::configuration(format!(
            "{name} not found at configured path {}",
            path.display()
        ))),
        None => which::which(name)
            .map_err(|_| MediaError::configuration(format!("{name} executable not found on PATH"))),
    }
}

/// Check if FFmpeg is available.
pub fn check_ffmpeg() -> MediaResult<PathBuf> {
    resolve_executable("ffmpeg", None)
}

/// Check if FFprobe is available.
pub fn check_ffprobe() -> MediaResult<PathBuf> {
    resolve_executable("ffprobe", None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use vexport_models::{AudioCodec, Preset, VideoCodec};

    #[test]
    fn test_command_builder() {
        let cmd = FfmpegCommand::new("input.mp4", "output.mp4")
            .seek(10.0)
            .duration(30.0)
            .video_codec("libx264");

        let args = cmd.build_args();
        let ss = args.iter().position(|a| a == "-ss").unwrap();
        let i = args.iter().position(|a| a == "-i").unwrap();
        assert!(ss < i, "seek must precede its input");
        assert_eq!(args[ss + 1], "10.000");
        assert!(args.contains(&"-t".to_string()));
        assert!(args.contains(&"libx264".to_string()));
        assert_eq!(args.last().unwrap(), "output.mp4");
        assert!(!args.contains(&"-progress".to_string()));
    }

    #[test]
    fn test_multiple_inputs_keep_their_args() {
        let args = FfmpegCommand::with_output("out.mkv")
            .input_args(["-f", "concat"])
            .input("list.txt")
            .input("b.mp4")
            .input_arg("-itsoffset")
            .input_arg("1.0")
            .build_args();

        assert_eq!(
            args,
            vec!["-y", "-v", "error", "-f", "concat", "-i", "list.txt", "-itsoffset", "1.0", "-i", "b.mp4", "out.mkv"]
        );
    }

    #[test]
    fn test_build_command_copy_emits_no_reencode_flags() {
        let spec = EncodeSpec::stream_copy();
        let argv = build_command(&spec, &["a.mp4"], "out.mp4");
        for flag in ["-preset", "-crf", "-s", "-r", "-b:v", "-b:a", "-threads"] {
            assert!(!argv.iter().any(|a| a == flag), "unexpected {flag} in {argv:?}");
        }
        assert!(argv.windows(2).any(|w| w == ["-c:v", "copy"]));
        assert!(argv.windows(2).any(|w| w == ["-c:a", "copy"]));
    }

    #[test]
    fn test_build_command_is_deterministic() {
        let spec = EncodeSpec::new()
            .with_video_codec(VideoCodec::H264)
            .with_audio_codec(AudioCodec::Aac)
            .with_preset(Preset::Fast)
            .with_crf(20)
            .with_resolution(1280, 720)
            .with_extra_arg("movflags", "+faststart")
            .with_extra_arg("an", "");
        let first = build_command(&spec, &["a.mp4", "b.mp4"], "out.mp4");
        let second = build_command(&spec, &["a.mp4", "b.mp4"], "out.mp4");
        assert_eq!(first, second);
        assert!(first.windows(2).any(|w| w == ["-preset", "fast"]));
        assert!(first.windows(2).any(|w| w == ["-crf", "20"]));
        assert_eq!(first.iter().filter(|a| *a == "-i").count(), 2);
    }

    #[test]
    fn test_missing_configured_executable_is_configuration_error() {
        let config = EncoderConfig {
            ffmpeg_path: Some(PathBuf::from("/nonexistent/bin/ffmpeg")),
            ..Default::default()
        };
        let err = Encoder::locate(config).unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("/nonexistent/bin/ffmpeg"));
    }

    fn encoder() -> Option<Encoder> {
        Encoder::locate(EncoderConfig::default()).ok()
    }

    #[test]
    fn test_execute_nonzero_exit_carries_diagnostics() {
        let Some(encoder) = encoder() else { return };
        let argv: Vec<String> = ["-v", "error", "-i", "/nonexistent/input.mp4", "-f", "null", "-"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        match encoder.execute(&argv).unwrap_err() {
            MediaError::EncodeExecution {
                exit_code, stderr, command, ..
            } => {
                assert_ne!(exit_code, Some(0));
                assert!(stderr.contains("/nonexistent/input.mp4"));
                assert!(command.contains("-f null"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_execute_success() {
        let Some(encoder) = encoder() else { return };
        let out = encoder.execute(&["-version".to_string()]).unwrap();
        assert_eq!(out.exit_code, Some(0));
        assert!(out.stdout.contains("ffmpeg"));
    }

    #[tokio::test]
    async fn test_execute_async_cancel_kills_process() {
        let Some(encoder) = encoder() else { return };
        let (tx, rx) = watch::channel(false);
        // Endless synthetic source; only cancellation stops it.
        let argv: Vec<String> = ["-v", "error", "-re", "-f", "lavfi", "-i", "testsrc", "-f", "null", "-"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        let cancel = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            tx.send(true).unwrap();
        });
        let result = encoder.execute_async(&argv, Some(rx)).await;
        cancel.await.unwrap();
        assert!(matches!(result, Err(MediaError::Cancelled)));
    }

    #[tokio::test]
    async fn test_execute_async_timeout() {
        let Some(encoder) = encoder() else { return };
        let mut config = encoder.config().clone();
        config.timeout_secs = Some(1);
        let encoder = Encoder::locate(config).unwrap();
        let argv: Vec<String> = ["-v", "error", "-re", "-f", "lavfi", "-i", "testsrc", "-f", "null", "-"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        let result = encoder.execute_async(&argv, None).await;
        assert!(matches!(result, Err(MediaError::Timeout(1))));
    }
}
