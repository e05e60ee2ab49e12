//! Cut and concatenate operations.
//!
//! Both default to stream copy, so media samples pass through bit-exact
//! and no CPU is spent re-encoding. Pass an [`EncodeSpec`] to re-encode.
//!
//! [`CutStage`] and [`ConcatStage`] wrap the same operations as pipeline
//! stages over a [`MediaJob`], e.g.:
//!
//! ```rust,ignore
//! let pipeline = Pipeline::new("export")
//!     .add_stage(ProcessingStage::media(CutStage::new(encoder.clone(), ranges, work_dir)))
//!     .add_stage(ProcessingStage::media(ConcatStage::new(encoder, "out.mp4")));
//! let job = pipeline.execute(MediaJob::new("source.mp4"))?;
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use vexport_models::{CutRange, EncodeSpec};

use crate::command::{Encoder, EncoderConfig};
use crate::error::{MediaError, MediaResult};
use crate::mmap::FrameLayout;
use crate::pipeline::{MediaStage, StageError, Transform};

/// Name of the concat list written for each concat run.
const CONCAT_LIST_NAME: &str = "concat_list.txt";

impl Encoder {
    /// Stream-copy `duration` seconds of `input` starting at `start`.
    pub fn cut(
        &self,
        input: impl AsRef<Path>,
        output: impl AsRef<Path>,
        start: f64,
        duration: f64,
    ) -> MediaResult<PathBuf> {
        self.cut_with_spec(input, output, start, duration, &EncodeSpec::stream_copy())
    }

    /// Cut a sub-range, encoding according to `spec`.
    ///
    /// Output timestamps are shifted to start at zero.
    pub fn cut_with_spec(
        &self,
        input: impl AsRef<Path>,
        output: impl AsRef<Path>,
        start: f64,
        duration: f64,
        spec: &EncodeSpec,
    ) -> MediaResult<PathBuf> {
        let input = input.as_ref();
        let output = output.as_ref();

        require_file(input)?;
        if !start.is_finite() || start < 0.0 {
            return Err(MediaError::invalid_input(format!("invalid cut start {start}")));
        }
        if !duration.is_finite() || duration <= 0.0 {
            return Err(MediaError::invalid_input(format!("invalid cut duration {duration}")));
        }
        spec.validate()?;
        ensure_parent(output)?;

        info!(
            "Cutting: {} -> {} (start: {:.3}s, duration: {:.3}s)",
            input.display(),
            output.display(),
            start,
            duration
        );

        let cmd = self
            .command(output)
            .input(input)
            .seek(start)
            .duration(duration)
            .encode_spec(spec)
            .output_args(["-avoid_negative_ts", "make_zero"]);

        self.execute_labeled("cut", &cmd.build_args())?;
        Ok(output.to_path_buf())
    }

    /// Stream-copy `inputs`, in order, into one `output`.
    pub fn concat<P: AsRef<Path>>(&self, inputs: &[P], output: impl AsRef<Path>) -> MediaResult<PathBuf> {
        self.concat_with_spec(inputs, output, &EncodeSpec::stream_copy())
    }

    /// Concatenate `inputs` through a concat list, encoding per `spec`.
    ///
    /// The list lives in a managed temp directory that is removed when this
    /// call returns, whatever the outcome.
    pub fn concat_with_spec<P: AsRef<Path>>(
        &self,
        inputs: &[P],
        output: impl AsRef<Path>,
        spec: &EncodeSpec,
    ) -> MediaResult<PathBuf> {
        let output = output.as_ref();
        if inputs.is_empty() {
            return Err(MediaError::invalid_input("concat needs at least one input"));
        }
        for input in inputs {
            require_file(input.as_ref())?;
        }
        spec.validate()?;
        ensure_parent(output)?;

        info!("Concatenating {} inputs -> {}", inputs.len(), output.display());

        let scope = self.resources().scope("concat");
        let list_dir = scope.create_temp_dir("concat")?;
        let list_path = list_dir.join(CONCAT_LIST_NAME);
        fs::write(&list_path, concat_list(inputs)?)?;

        let cmd = self
            .command(output)
            .input_args(["-f", "concat", "-safe", "0"])
            .input(&list_path)
            .encode_spec(spec);

        let result = self.execute_labeled("concat", &cmd.build_args());
        let report = scope.finish();
        for err in &report.errors {
            warn!(error = %err, "Failed to remove concat artifacts");
        }

        result?;
        Ok(output.to_path_buf())
    }

    /// Decode `input` into a packed `rgb24` raw frame file scaled to
    /// `width`x`height`, ready for [`MmapEngine::map_frames`](crate::mmap::MmapEngine::map_frames).
    pub fn extract_raw_frames(
        &self,
        input: impl AsRef<Path>,
        output: impl AsRef<Path>,
        width: u32,
        height: u32,
    ) -> MediaResult<FrameLayout> {
        let input = input.as_ref();
        let output = output.as_ref();
        require_file(input)?;
        if width == 0 || height == 0 {
            return Err(MediaError::invalid_input("frame size must be non-zero"));
        }
        ensure_parent(output)?;

        let cmd = self
            .command(output)
            .input(input)
            .output_args(["-an", "-f", "rawvideo", "-pix_fmt", "rgb24"])
            .output_args(["-s".to_string(), format!("{width}x{height}")]);

        self.execute_labeled("extract_raw_frames", &cmd.build_args())?;
        Ok(FrameLayout::rgb24(width as usize, height as usize))
    }
}

/// Cut using the encoder found on `PATH`.
pub fn cut(
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
    start: f64,
    duration: f64,
) -> MediaResult<PathBuf> {
    Encoder::locate(EncoderConfig::default())?.cut(input, output, start, duration)
}

/// Concatenate using the encoder found on `PATH`.
pub fn concat<P: AsRef<Path>>(inputs: &[P], output: impl AsRef<Path>) -> MediaResult<PathBuf> {
    Encoder::locate(EncoderConfig::default())?.concat(inputs, output)
}

/// Segment file name used for numbered cut outputs.
pub fn segment_path(dir: &Path, index: usize, extension: &str) -> PathBuf {
    dir.join(format!("seg_{index:04}.{extension}"))
}

/// File extension of `path`, defaulting to `mp4`.
pub fn media_extension(path: &Path) -> &str {
    path.extension().and_then(|e| e.to_str()).unwrap_or("mp4")
}

fn require_file(path: &Path) -> MediaResult<()> {
    if path.is_file() {
        Ok(())
    } else {
        Err(MediaError::FileNotFound(path.to_path_buf()))
    }
}

fn ensure_parent(path: &Path) -> MediaResult<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent).map_err(|e| {
            MediaError::configuration(format!("Output directory {} is not writable: {e}", parent.display()))
        }),
        _ => Ok(()),
    }
}

/// Concat demuxer list: one `file '<path>'` line per input, absolute paths,
/// single quotes escaped.
fn concat_list<P: AsRef<Path>>(inputs: &[P]) -> MediaResult<String> {
    let mut list = String::new();
    for input in inputs {
        let path = fs::canonicalize(input.as_ref())?;
        let escaped = path.to_string_lossy().replace('\'', r"'\''");
        list.push_str(&format!("file '{escaped}'\n"));
    }
    Ok(list)
}

/// Payload flowing through media stages: the files produced so far.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediaJob {
    pub files: Vec<PathBuf>,
}

impl MediaJob {
    pub fn new(source: impl Into<PathBuf>) -> Self {
        Self {
            files: vec![source.into()],
        }
    }
}

/// Cuts each range out of the job's first file into numbered segments.
#[derive(Debug, Clone)]
pub struct CutStage {
    encoder: Encoder,
    ranges: Vec<CutRange>,
    work_dir: PathBuf,
    spec: EncodeSpec,
}

impl CutStage {
    pub fn new(encoder: Encoder, ranges: Vec<CutRange>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            encoder,
            ranges,
            work_dir: work_dir.into(),
            spec: EncodeSpec::stream_copy(),
        }
    }

    pub fn with_spec(mut self, spec: EncodeSpec) -> Self {
        self.spec = spec;
        self
    }
}

impl Transform<MediaJob> for CutStage {
    fn name(&self) -> &str {
        "cut"
    }

    fn apply(&self, job: MediaJob) -> Result<MediaJob, StageError> {
        let source = job
            .files
            .first()
            .ok_or_else(|| MediaError::invalid_input("cut stage received no input file"))?;
        let extension = media_extension(source);

        let mut segments = Vec::with_capacity(self.ranges.len());
        for (index, range) in self.ranges.iter().enumerate() {
            let output = segment_path(&self.work_dir, index, extension);
            segments.push(self.encoder.cut_with_spec(
                source,
                &output,
                range.start,
                range.duration(),
                &self.spec,
            )?);
        }
        Ok(MediaJob { files: segments })
    }
}

impl MediaStage<MediaJob> for CutStage {
    fn operation(&self) -> &'static str {
        "cut"
    }
}

/// Concatenates all of the job's files into one output.
#[derive(Debug, Clone)]
pub struct ConcatStage {
    encoder: Encoder,
    output: PathBuf,
    spec: EncodeSpec,
}

impl ConcatStage {
    pub fn new(encoder: Encoder, output: impl Into<PathBuf>) -> Self {
        Self {
            encoder,
            output: output.into(),
            spec: EncodeSpec::stream_copy(),
        }
    }

    pub fn with_spec(mut self, spec: EncodeSpec) -> Self {
        self.spec = spec;
        self
    }
}

impl Transform<MediaJob> for ConcatStage {
    fn name(&self) -> &str {
        "concat"
    }

    fn apply(&self, job: MediaJob) -> Result<MediaJob, StageError> {
        let output = self
            .encoder
            .concat_with_spec(&job.files, &self.output, &self.spec)?;
        Ok(MediaJob::new(output))
    }
}

impl MediaStage<MediaJob> for ConcatStage {
    fn operation(&self) -> &'static str {
        "concat"
    }
}
