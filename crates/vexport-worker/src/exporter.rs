//! Segment export: cut each range into a numbered segment, then concatenate.
//!
//! Progress counts completed steps out of `ranges + 1` (the final concat is
//! the last step). Segments live in a work directory derived from the
//! output path and the job fingerprint, so a restarted export finds the ones
//! it already cut and a different job never picks them up.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use metrics::counter;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use vexport_media::clip::{media_extension, segment_path};
use vexport_media::{Encoder, ExecutionMode, MediaError, Pipeline, ProcessingStage, ResourceManager};
use vexport_models::{CutRange, EncodeSpec};

use crate::config::ExportConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::job::{job_fingerprint, ExportJob};
use crate::logging::ExportLogger;
use crate::resumable::{CheckpointStatus, CheckpointStore, Exporter, ProgressFn, ResumableExport};

/// One range to cut into one segment file.
#[derive(Debug, Clone)]
struct SegmentTask {
    index: usize,
    range: CutRange,
    output: PathBuf,
}

/// Exports `ranges` of `source`, in order, into `output`.
#[derive(Debug, Clone)]
pub struct SegmentExporter {
    encoder: Encoder,
    source: PathBuf,
    output: PathBuf,
    ranges: Vec<CutRange>,
    spec: EncodeSpec,
    work_root: PathBuf,
    workers: usize,
}

impl SegmentExporter {
    pub fn new(
        encoder: Encoder,
        source: impl Into<PathBuf>,
        output: impl Into<PathBuf>,
        ranges: Vec<CutRange>,
    ) -> Self {
        Self {
            encoder,
            source: source.into(),
            output: output.into(),
            ranges,
            spec: EncodeSpec::stream_copy(),
            work_root: std::env::temp_dir().join("vexport-work"),
            workers: 1,
        }
    }

    pub fn with_spec(mut self, spec: EncodeSpec) -> Self {
        self.spec = spec;
        self
    }

    /// Put segments under `work_root`, in a directory unique to the output
    /// and the job.
    pub fn with_work_root(mut self, work_root: impl Into<PathBuf>) -> Self {
        self.work_root = work_root.into();
        self
    }

    /// Cut up to `workers` segments at once.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn fingerprint(&self) -> String {
        job_fingerprint(&self.source, &self.ranges, &self.spec)
    }

    pub fn work_dir(&self) -> PathBuf {
        segments_dir(&self.work_root, &self.output, &self.fingerprint())
    }

    fn total_steps(&self) -> usize {
        self.ranges.len() + 1
    }

    fn cut_pipeline(&self) -> WorkerResult<Pipeline<SegmentTask>> {
        let encoder = self.encoder.clone();
        let source = self.source.clone();
        let spec = self.spec.clone();

        let cut = ProcessingStage::function("cut_segment", move |task: SegmentTask| {
            encoder.cut_with_spec(&source, &task.output, task.range.start, task.range.duration(), &spec)?;
            debug!(segment = task.index, output = %task.output.display(), "Cut segment");
            Ok(task)
        });

        let mut pipeline = Pipeline::new("segment_export").add_stage(cut);
        if self.workers > 1 {
            pipeline = pipeline.with_workers(self.workers)?;
            pipeline.set_mode(ExecutionMode::Parallel);
        }
        Ok(pipeline)
    }

    /// Remove the segment directory through the resource manager.
    fn release_work_dir(&self, work_dir: &Path) {
        let resources = self.encoder.resources();
        let key = format!("segments:{}", work_dir.display());
        resources.register_temp_path(&key, work_dir);
        let report = resources.release(&key);
        for err in &report.errors {
            warn!(error = %err, "Failed to remove segment directory");
        }
    }
}

impl Exporter for SegmentExporter {
    fn export(&self, resume_from: f64, progress: ProgressFn<'_>) -> WorkerResult<PathBuf> {
        if self.ranges.is_empty() {
            return Err(WorkerError::invalid_job("nothing to export"));
        }
        if !self.source.is_file() {
            return Err(MediaError::FileNotFound(self.source.clone()).into());
        }
        let work_dir = self.work_dir();
        fs::create_dir_all(&work_dir).map_err(|e| {
            WorkerError::config_error(format!(
                "Work directory {} is not writable: {e}",
                work_dir.display()
            ))
        })?;

        let total = self.total_steps();
        let extension = media_extension(&self.source);
        let segments: Vec<PathBuf> = (0..self.ranges.len())
            .map(|i| segment_path(&work_dir, i, extension))
            .collect();

        let claimed = completed_steps(resume_from, total).min(self.ranges.len());
        let reusable = segments[..claimed]
            .iter()
            .take_while(|path| is_nonempty_file(path))
            .count();
        if reusable < claimed {
            warn!(
                claimed,
                reusable,
                "Checkpointed segments are missing; re-cutting from the first gap"
            );
        }
        if reusable > 0 {
            info!(reused = reusable, total = self.ranges.len(), "Reusing segments from previous run");
        }

        let tasks: Vec<SegmentTask> = (reusable..self.ranges.len())
            .map(|index| SegmentTask {
                index,
                range: self.ranges[index],
                output: segments[index].clone(),
            })
            .collect();

        let pipeline = self.cut_pipeline()?;
        for wave in tasks.chunks(self.workers) {
            for result in pipeline.process(wave.to_vec()) {
                result?;
            }
            if let Some(last) = wave.last() {
                progress((last.index + 1) as f64 / total as f64);
            }
        }

        self.encoder.concat(&segments, &self.output)?;
        progress(1.0);

        self.release_work_dir(&work_dir);
        Ok(self.output.clone())
    }
}

/// Steps a resume point covers, tolerant of float rounding in `k / total`.
fn completed_steps(resume_from: f64, total: usize) -> usize {
    if !resume_from.is_finite() || resume_from <= 0.0 {
        return 0;
    }
    ((resume_from.min(1.0) * total as f64) + 1e-9).floor() as usize
}

fn is_nonempty_file(path: &Path) -> bool {
    fs::metadata(path).map(|m| m.is_file() && m.len() > 0).unwrap_or(false)
}

/// Segment directory for `output` under `work_root`: the output's file stem
/// plus a short hash of its absolute path and the job fingerprint.
pub fn segments_dir(work_root: &Path, output: &Path, fingerprint: &str) -> PathBuf {
    let absolute = std::path::absolute(output).unwrap_or_else(|_| output.to_path_buf());
    let mut hasher = Sha256::new();
    hasher.update(absolute.to_string_lossy().as_bytes());
    hasher.update(b"|");
    hasher.update(fingerprint.as_bytes());
    let digest = hasher.finalize();
    let hash: String = digest.iter().take(6).map(|b| format!("{b:02x}")).collect();
    let stem = output
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "export".to_string());
    work_root.join(format!("{stem}_{hash}"))
}

fn checkpoint_store_for(config: &ExportConfig, job: &ExportJob) -> CheckpointStore {
    let store = match &config.checkpoint_path {
        Some(path) => CheckpointStore::new(path),
        None => CheckpointStore::for_target(&job.output),
    };
    store
        .with_min_interval(config.checkpoint_interval)
        .with_fingerprint(job.fingerprint())
}

/// Runs export jobs with one shared encoder.
#[derive(Debug, Clone)]
pub struct ExportRunner {
    config: ExportConfig,
    encoder: Encoder,
}

impl ExportRunner {
    /// Locate the encoder and build a runner.
    pub fn new(config: ExportConfig) -> WorkerResult<Self> {
        let encoder = Encoder::locate(config.encoder_config())?;
        Ok(Self { config, encoder })
    }

    pub fn with_encoder(config: ExportConfig, encoder: Encoder) -> Self {
        Self { config, encoder }
    }

    pub fn config(&self) -> &ExportConfig {
        &self.config
    }

    pub fn resources(&self) -> &ResourceManager {
        self.encoder.resources()
    }

    /// Checkpoint store for `job`: the configured path, or one next to the
    /// output. Bound to the job fingerprint.
    pub fn checkpoint_store(&self, job: &ExportJob) -> CheckpointStore {
        checkpoint_store_for(&self.config, job)
    }

    /// Run `job` to completion on the calling thread, resuming if a
    /// checkpoint from an earlier run exists.
    pub fn run(&self, job: &ExportJob) -> WorkerResult<PathBuf> {
        job.validate()?;
        let logger = ExportLogger::new(&job.output);
        let _span = logger.create_span().entered();
        let started = Instant::now();
        logger.log_start(job.ranges.len());

        let resumable = ResumableExport::new(self.checkpoint_store(job));
        match resumable.store().inspect() {
            CheckpointStatus::Valid(progress) if progress > 0.0 => logger.log_resume(progress),
            CheckpointStatus::Mismatched { .. } => logger.log_warning(&format!(
                "checkpoint {} belongs to a different job; starting from zero",
                resumable.store().path().display()
            )),
            CheckpointStatus::Corrupted(reason) => logger.log_warning(&format!(
                "checkpoint {} is unusable ({reason}); starting from zero",
                resumable.store().path().display()
            )),
            _ => {}
        }

        let exporter = resumable.wrap(
            SegmentExporter::new(self.encoder.clone(), &job.source, &job.output, job.ranges.clone())
                .with_spec(job.encode_spec())
                .with_work_root(&self.config.work_dir)
                .with_workers(self.config.parallel_workers),
        );

        match exporter.export(0.0, &|p| logger.log_progress(p)) {
            Ok(output) => {
                logger.log_completion(started.elapsed().as_secs_f64());
                counter!("vexport_exports_total", "outcome" => "completed").increment(1);
                Ok(output)
            }
            Err(e) => {
                logger.log_error(&e.to_string());
                counter!("vexport_exports_total", "outcome" => "failed").increment(1);
                Err(e)
            }
        }
    }

    /// Run `job` on the blocking pool.
    pub async fn run_blocking(self: Arc<Self>, job: ExportJob) -> WorkerResult<PathBuf> {
        tokio::task::spawn_blocking(move || self.run(&job))
            .await
            .map_err(|e| WorkerError::Media(MediaError::internal(format!("export task failed: {e}"))))?
    }
}
