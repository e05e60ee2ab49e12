//! Resumable exports.
//!
//! A long export persists its progress to a small checkpoint file so that a
//! crash, restart or explicit cancel resumes from the last validated point
//! instead of starting over:
//!
//! ```text
//! NotStarted -> Resuming{from} | Starting -> Running{progress}* -> Completed | Interrupted{progress}
//! ```
//!
//! Completion deletes the checkpoint; anything else leaves it in place.
//! Killing the process outright is a supported way to cancel, since the
//! checkpoint already on disk is all a later resume needs.
//!
//! A checkpoint that cannot be read, parsed or validated is treated as
//! absent, so a damaged file restarts the export at zero. [`CheckpointStore::inspect`]
//! reports the damage for callers that want to surface it first. A store
//! bound to a job fingerprint likewise ignores checkpoints written by a
//! different job into the same place.

use std::fs;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use metrics::counter;
use tracing::{debug, info, warn};

use vexport_models::{ExportCheckpoint, CHECKPOINT_FILE_NAME};

use crate::config::DEFAULT_CHECKPOINT_INTERVAL;
use crate::error::WorkerResult;

/// Progress callback handed to exporters. Receives a fraction in `[0, 1]`.
pub type ProgressFn<'a> = &'a (dyn Fn(f64) + Sync);

/// Anything that can run an export from a resume point while reporting progress.
pub trait Exporter {
    /// Run the export. `resume_from` is the fraction already done (0 for a
    /// fresh run); the exporter decides how much work that lets it skip.
    fn export(&self, resume_from: f64, progress: ProgressFn<'_>) -> WorkerResult<PathBuf>;
}

/// What is on disk at a checkpoint path.
#[derive(Debug, Clone, PartialEq)]
pub enum CheckpointStatus {
    Absent,
    Valid(f64),
    /// Intact, but written by a different job.
    Mismatched { progress: f64, job: Option<String> },
    Corrupted(String),
}

/// Lifecycle of one export session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ExportState {
    NotStarted,
    Resuming { from: f64 },
    Starting,
    Running { progress: f64 },
    Completed,
    Interrupted { progress: f64 },
}

#[derive(Debug, Default)]
struct SaveState {
    /// Highest progress seen; later reports below it are ignored.
    high: f64,
    last_write: Option<Instant>,
    persisted: Option<f64>,
}

/// Reads and writes the checkpoint of one export target.
#[derive(Debug)]
pub struct CheckpointStore {
    path: PathBuf,
    min_save_interval: Duration,
    fingerprint: Option<String>,
    state: Mutex<SaveState>,
}

impl Default for CheckpointStore {
    /// Checkpoint file in the working directory.
    fn default() -> Self {
        Self::new(CHECKPOINT_FILE_NAME)
    }
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            min_save_interval: DEFAULT_CHECKPOINT_INTERVAL,
            fingerprint: None,
            state: Mutex::new(SaveState::default()),
        }
    }

    /// Hidden checkpoint next to `output`, one per export target.
    pub fn for_target(output: impl AsRef<Path>) -> Self {
        let output = output.as_ref();
        let name = output
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "export".to_string());
        Self::new(output.with_file_name(format!(".{name}{CHECKPOINT_FILE_NAME}")))
    }

    pub fn with_min_interval(mut self, interval: Duration) -> Self {
        self.min_save_interval = interval;
        self
    }

    /// Tie checkpoints to one job. Checkpoints carrying another fingerprint
    /// are treated as absent.
    pub fn with_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.fingerprint = Some(fingerprint.into());
        self
    }

    pub fn fingerprint(&self) -> Option<&str> {
        self.fingerprint.as_deref()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn min_save_interval(&self) -> Duration {
        self.min_save_interval
    }

    /// Record progress, writing it if the rate limit allows.
    ///
    /// Non-finite values and regressions are ignored; values are clamped to
    /// `[0, 1]`. Returns whether a checkpoint was written. A skipped value is
    /// still remembered and written by [`flush`](Self::flush).
    pub fn save_state(&self, progress: f64) -> bool {
        let Some(progress) = normalize(progress) else {
            return false;
        };
        let mut state = self.lock();
        if progress < state.high {
            debug!(progress, high = state.high, "Ignoring progress regression");
            return false;
        }
        state.high = progress;
        if state.persisted == Some(progress) {
            return false;
        }
        if let Some(last) = state.last_write {
            if last.elapsed() < self.min_save_interval {
                return false;
            }
        }
        self.write_locked(&mut state, progress)
    }

    /// Write now, ignoring the rate limit. Never writes below the highest
    /// progress already seen.
    pub fn force_save(&self, progress: f64) -> bool {
        let Some(progress) = normalize(progress) else {
            return false;
        };
        let mut state = self.lock();
        let progress = progress.max(state.high);
        state.high = progress;
        self.write_locked(&mut state, progress)
    }

    /// Write the highest seen progress if the rate limit held it back.
    pub fn flush(&self) -> bool {
        let mut state = self.lock();
        let high = state.high;
        if high <= 0.0 || state.persisted == Some(high) {
            return false;
        }
        self.write_locked(&mut state, high)
    }

    /// Saved progress, or `None` when there is no usable checkpoint.
    pub fn load_state(&self) -> Option<f64> {
        match self.inspect() {
            CheckpointStatus::Valid(progress) => {
                let mut state = self.lock();
                if progress >= state.high {
                    state.high = progress;
                    state.persisted = Some(progress);
                }
                Some(progress)
            }
            CheckpointStatus::Absent => None,
            CheckpointStatus::Mismatched { progress, job } => {
                info!(
                    path = %self.path.display(),
                    progress,
                    job = job.as_deref().unwrap_or("unknown"),
                    "Ignoring checkpoint from a different job; export restarts at zero"
                );
                None
            }
            CheckpointStatus::Corrupted(reason) => {
                warn!(
                    path = %self.path.display(),
                    reason = %reason,
                    "Discarding corrupted export checkpoint; export restarts at zero"
                );
                counter!("vexport_checkpoint_corrupted_total").increment(1);
                None
            }
        }
    }

    /// Classify the checkpoint file without changing any state.
    pub fn inspect(&self) -> CheckpointStatus {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return CheckpointStatus::Absent,
            Err(e) => return CheckpointStatus::Corrupted(format!("unreadable: {e}")),
        };
        let checkpoint: ExportCheckpoint = match serde_json::from_slice(&bytes) {
            Ok(checkpoint) => checkpoint,
            Err(e) => return CheckpointStatus::Corrupted(format!("unparsable: {e}")),
        };
        if !checkpoint.is_valid() {
            return CheckpointStatus::Corrupted("checksum mismatch".to_string());
        }
        if self.fingerprint.is_some() && checkpoint.job != self.fingerprint {
            return CheckpointStatus::Mismatched {
                progress: checkpoint.progress,
                job: checkpoint.job,
            };
        }
        CheckpointStatus::Valid(checkpoint.progress)
    }

    /// Delete the checkpoint and forget this session's progress.
    pub fn clear(&self) -> WorkerResult<()> {
        let mut state = self.lock();
        *state = SaveState::default();
        let _ = fs::remove_file(self.temp_path());
        match fs::remove_file(&self.path) {
            Ok(()) => {
                debug!(path = %self.path.display(), "Removed export checkpoint");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SaveState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_locked(&self, state: &mut SaveState, progress: f64) -> bool {
        match self.write(progress) {
            Ok(()) => {
                state.last_write = Some(Instant::now());
                state.persisted = Some(progress);
                counter!("vexport_checkpoint_writes_total").increment(1);
                debug!(path = %self.path.display(), progress, "Saved export checkpoint");
                true
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to save export checkpoint");
                false
            }
        }
    }

    /// Write via a sibling temp file and rename, so readers never see a
    /// partial record.
    fn write(&self, progress: f64) -> io::Result<()> {
        let checkpoint = ExportCheckpoint::now_for_job(progress, self.fingerprint.clone());
        let json = serde_json::to_vec_pretty(&checkpoint)?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.temp_path();
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

fn normalize(progress: f64) -> Option<f64> {
    progress.is_finite().then(|| progress.clamp(0.0, 1.0))
}

/// Adds checkpointing to exporters.
#[derive(Debug, Clone)]
pub struct ResumableExport {
    store: Arc<CheckpointStore>,
}

impl ResumableExport {
    pub fn new(store: CheckpointStore) -> Self {
        Self {
            store: Arc::new(store),
        }
    }

    pub fn store(&self) -> &CheckpointStore {
        &self.store
    }

    /// Wrap `exporter` so its progress is checkpointed and a rerun resumes.
    pub fn wrap<E: Exporter>(&self, exporter: E) -> ResumableExporter<E> {
        ResumableExporter {
            inner: exporter,
            store: Arc::clone(&self.store),
        }
    }

    /// Begin a scoped session, loading any saved progress.
    pub fn session(&self) -> ExportSession {
        ExportSession::start(Arc::clone(&self.store))
    }
}

/// An [`Exporter`] that checkpoints the one it wraps.
#[derive(Debug)]
pub struct ResumableExporter<E> {
    inner: E,
    store: Arc<CheckpointStore>,
}

impl<E> ResumableExporter<E> {
    pub fn inner(&self) -> &E {
        &self.inner
    }

    pub fn into_inner(self) -> E {
        self.inner
    }
}

impl<E: Exporter> Exporter for ResumableExporter<E> {
    fn export(&self, resume_from: f64, progress: ProgressFn<'_>) -> WorkerResult<PathBuf> {
        let saved = self.store.load_state().unwrap_or(0.0);
        let start = normalize(resume_from).unwrap_or(0.0).max(saved);
        if start > 0.0 {
            info!(progress = start, checkpoint = %self.store.path().display(), "Resuming export");
        }

        let store = &self.store;
        let report = |p: f64| {
            store.save_state(p);
            progress(p);
        };

        match self.inner.export(start, &report) {
            Ok(output) => {
                if let Err(e) = self.store.clear() {
                    warn!(error = %e, "Export succeeded but its checkpoint could not be removed");
                }
                Ok(output)
            }
            Err(e) => {
                self.store.flush();
                warn!(
                    checkpoint = %self.store.path().display(),
                    "Export failed; checkpoint retained for resume"
                );
                Err(e)
            }
        }
    }
}

/// Scoped export: resume point on entry, checkpoint removed by
/// [`complete`](Self::complete), retained when dropped without it.
#[derive(Debug)]
pub struct ExportSession {
    store: Arc<CheckpointStore>,
    state: ExportState,
    resume_point: f64,
    last_progress: f64,
}

impl ExportSession {
    fn start(store: Arc<CheckpointStore>) -> Self {
        let (state, resume_point) = match store.load_state() {
            Some(from) if from > 0.0 => (ExportState::Resuming { from }, from),
            _ => (ExportState::Starting, 0.0),
        };
        Self {
            store,
            state,
            resume_point,
            last_progress: resume_point,
        }
    }

    pub fn state(&self) -> ExportState {
        self.state
    }

    /// Progress to resume from, 0 for a fresh export.
    pub fn resume_point(&self) -> f64 {
        self.resume_point
    }

    /// Record progress. Returns whether a checkpoint was written.
    pub fn report(&mut self, progress: f64) -> bool {
        if let Some(p) = normalize(progress) {
            self.last_progress = self.last_progress.max(p);
        }
        self.state = ExportState::Running {
            progress: self.last_progress,
        };
        self.store.save_state(progress)
    }

    /// Finish successfully, deleting the checkpoint.
    pub fn complete(mut self) -> WorkerResult<()> {
        self.state = ExportState::Completed;
        self.store.clear()
    }

    /// Stop without completing, persisting the last progress immediately.
    pub fn interrupt(mut self) -> ExportState {
        self.retain();
        self.state
    }

    fn retain(&mut self) {
        if self.last_progress > 0.0 {
            self.store.force_save(self.last_progress);
        }
        self.state = ExportState::Interrupted {
            progress: self.last_progress,
        };
    }
}

impl Drop for ExportSession {
    fn drop(&mut self) {
        if matches!(self.state, ExportState::Completed | ExportState::Interrupted { .. }) {
            return;
        }
        self.retain();
        warn!(
            progress = self.last_progress,
            checkpoint = %self.store.path().display(),
            "Export session ended without completing; checkpoint retained"
        );
    }
}
