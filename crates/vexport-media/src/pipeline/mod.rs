//! Composable processing pipelines.
//!
//! A [`Pipeline`] chains [`ProcessingStage`]s output-to-input, in insertion
//! order, and runs them in one of three modes:
//!
//! - **Batch**: one payload end-to-end on the caller's thread.
//! - **Streaming**: a lazy, possibly unbounded sequence of chunks; each chunk
//!   runs through the full chain and is yielded before the next is pulled.
//! - **Parallel**: payloads fanned out over a rayon pool, one output per input.
//!
//! The framework never copies payloads; stages receive them by value and
//! are expected to mutate large buffers in place.

mod stage;
mod stats;
mod stream;

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use rayon::prelude::*;
use thiserror::Error;
use tracing::{debug, warn};

use crate::metrics;

pub use stage::{MediaStage, ProcessingStage, StageError, Transform};
pub use stats::StageStats;
pub use stream::{ByteChunks, DEFAULT_CHUNK_SIZE};

/// Pipeline execution errors.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Stage '{stage}' failed: {source}")]
    Stage {
        stage: String,
        #[source]
        source: StageError,
    },

    #[error("Payload rejected by filter '{stage}'")]
    Filtered { stage: String },

    #[error("Worker pool error: {0}")]
    WorkerPool(String),
}

impl PipelineError {
    pub fn stage(stage: impl Into<String>, source: impl Into<StageError>) -> Self {
        Self::Stage {
            stage: stage.into(),
            source: source.into(),
        }
    }

    /// Name of the stage that produced the error, if any.
    pub fn stage_name(&self) -> Option<&str> {
        match self {
            Self::Stage { stage, .. } | Self::Filtered { stage } => Some(stage),
            Self::WorkerPool(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExecutionMode {
    #[default]
    Batch,
    Streaming,
    Parallel,
}

/// Where a stage failure happened, handed to the error handler.
#[derive(Debug, Clone)]
pub struct StageContext {
    pub pipeline: String,
    pub stage: String,
    /// Position of the stage in the pipeline.
    pub index: usize,
    pub mode: ExecutionMode,
    /// Chunk sequence number in streaming mode.
    pub chunk: Option<usize>,
}

type ErrorHandler<T> = dyn Fn(&PipelineError, &StageContext) -> T + Send + Sync;

/// An ordered chain of stages.
pub struct Pipeline<T> {
    name: String,
    stages: Vec<ProcessingStage<T>>,
    mode: ExecutionMode,
    error_handler: Option<Arc<ErrorHandler<T>>>,
    stats: Mutex<Vec<StageStats>>,
    pool: Option<Arc<rayon::ThreadPool>>,
}

impl<T> std::fmt::Debug for Pipeline<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.name)
            .field("stages", &self.stages)
            .field("mode", &self.mode)
            .field("has_error_handler", &self.error_handler.is_some())
            .finish()
    }
}

impl<T: Send> Pipeline<T> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: Vec::new(),
            mode: ExecutionMode::Batch,
            error_handler: None,
            stats: Mutex::new(Vec::new()),
            pool: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Append a stage.
    pub fn add_stage(mut self, stage: ProcessingStage<T>) -> Self {
        self.push_stage(stage);
        self
    }

    pub fn push_stage(&mut self, stage: ProcessingStage<T>) {
        self.lock_stats().push(StageStats::new(stage.name()));
        self.stages.push(stage);
    }

    pub fn stages(&self) -> &[ProcessingStage<T>] {
        &self.stages
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: ExecutionMode) -> &mut Self {
        self.mode = mode;
        self
    }

    /// Substitute the handler's value for a failing stage's output and
    /// continue the chain. Filter rejections are not routed to the handler.
    pub fn set_error_handler<F>(&mut self, handler: F) -> &mut Self
    where
        F: Fn(&PipelineError, &StageContext) -> T + Send + Sync + 'static,
    {
        self.error_handler = Some(Arc::new(handler));
        self
    }

    /// Use a dedicated pool of `workers` threads for parallel mode instead
    /// of rayon's global pool.
    pub fn with_workers(mut self, workers: usize) -> Result<Self, PipelineError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers.max(1))
            .thread_name(|i| format!("vexport-pipeline-{i}"))
            .build()
            .map_err(|e| PipelineError::WorkerPool(e.to_string()))?;
        self.pool = Some(Arc::new(pool));
        Ok(self)
    }

    fn lock_stats(&self) -> std::sync::MutexGuard<'_, Vec<StageStats>> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run one payload through every stage in order.
    pub fn execute(&self, input: T) -> Result<T, PipelineError> {
        self.run(input, ExecutionMode::Batch, None)
    }

    fn run(&self, input: T, mode: ExecutionMode, chunk: Option<usize>) -> Result<T, PipelineError> {
        let mut value = input;
        for (index, stage) in self.stages.iter().enumerate() {
            let started = Instant::now();
            let result = stage.apply(value);
            let elapsed = started.elapsed();

            let failed = matches!(result, Err(PipelineError::Stage { .. }));
            if let Some(stats) = self.lock_stats().get_mut(index) {
                stats.record(elapsed, failed);
            }
            metrics::record_stage(&self.name, stage.name(), elapsed.as_secs_f64(), failed);

            value = match result {
                Ok(next) => next,
                Err(err @ PipelineError::Filtered { .. }) => return Err(err),
                Err(err) => {
                    let Some(handler) = &self.error_handler else {
                        debug!(
                            pipeline = %self.name,
                            stage = stage.name(),
                            error = %err,
                            "Stage failed"
                        );
                        return Err(err);
                    };
                    let context = StageContext {
                        pipeline: self.name.clone(),
                        stage: stage.name().to_string(),
                        index,
                        mode,
                        chunk,
                    };
                    warn!(
                        pipeline = %self.name,
                        stage = stage.name(),
                        error = %err,
                        "Stage failed; substituting handler value"
                    );
                    handler(&err, &context)
                }
            };
        }
        Ok(value)
    }

    /// Lazily run each chunk through the full chain.
    ///
    /// Chunks are pulled one at a time and yielded as soon as they are
    /// transformed. A failing chunk yields `Err` and the stream continues;
    /// chunks rejected by a filter are dropped.
    pub fn stream<'a, I>(&'a self, chunks: I) -> impl Iterator<Item = Result<T, PipelineError>> + 'a
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: 'a,
    {
        chunks
            .into_iter()
            .enumerate()
            .filter_map(move |(index, chunk)| {
                match self.run(chunk, ExecutionMode::Streaming, Some(index)) {
                    Err(PipelineError::Filtered { stage }) => {
                        debug!(pipeline = %self.name, stage = %stage, chunk = index, "Chunk filtered");
                        None
                    }
                    other => Some(other),
                }
            })
    }

    /// Run many payloads according to the current mode.
    ///
    /// Batch and Streaming preserve submission order. Parallel yields one
    /// result per input; callers needing order should carry an index in the
    /// payload.
    pub fn process(&self, inputs: Vec<T>) -> Vec<Result<T, PipelineError>> {
        match self.mode {
            ExecutionMode::Batch => inputs.into_iter().map(|input| self.execute(input)).collect(),
            ExecutionMode::Streaming => self.stream(inputs).collect(),
            ExecutionMode::Parallel => {
                let run = || {
                    inputs
                        .into_par_iter()
                        .map(|input| self.run(input, ExecutionMode::Parallel, None))
                        .collect::<Vec<_>>()
                };
                match &self.pool {
                    Some(pool) => pool.install(run),
                    None => run(),
                }
            }
        }
    }

    /// Per-stage counters, in stage order.
    pub fn get_stats(&self) -> Vec<StageStats> {
        self.lock_stats().clone()
    }

    pub fn reset_stats(&self) {
        self.lock_stats().iter_mut().for_each(StageStats::reset);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::io::Cursor;

    fn scale_then_offset() -> Pipeline<i64> {
        Pipeline::new("arith")
            .add_stage(ProcessingStage::function("double", |x: i64| Ok(x * 2)))
            .add_stage(ProcessingStage::function("add_ten", |x: i64| Ok(x + 10)))
    }

    #[test]
    fn test_batch_scenario() {
        assert_eq!(scale_then_offset().execute(5).unwrap(), 20);
    }

    #[test]
    fn test_streaming_scenario() {
        let pipeline = scale_then_offset();
        let out: Vec<i64> = pipeline.stream(vec![5, 1]).map(Result::unwrap).collect();
        assert_eq!(out, vec![20, 12]);

        let mut pipeline = scale_then_offset();
        pipeline.set_mode(ExecutionMode::Streaming);
        let out: Vec<i64> = pipeline.process(vec![5, 1]).into_iter().map(Result::unwrap).collect();
        assert_eq!(out, vec![20, 12]);
    }

    #[test]
    fn test_stream_is_lazy() {
        let pipeline = scale_then_offset();
        // Unbounded input; only the taken chunks are ever produced.
        let out: Vec<i64> = pipeline
            .stream(0i64..)
            .take(3)
            .map(Result::unwrap)
            .collect();
        assert_eq!(out, vec![10, 12, 14]);
    }

    #[test]
    fn test_unhandled_error_aborts_remaining_stages() {
        let pipeline = Pipeline::new("failing")
            .add_stage(ProcessingStage::function("fail", |_: i64| Err("boom".into())))
            .add_stage(ProcessingStage::function("never", |x: i64| Ok(x + 1)));

        let err = pipeline.execute(1).unwrap_err();
        assert_eq!(err.stage_name(), Some("fail"));

        let stats = pipeline.get_stats();
        assert_eq!(stats[0].errors, 1);
        assert_eq!(stats[1].invocations, 0);
    }

    #[test]
    fn test_error_handler_substitutes_and_continues() {
        let mut pipeline = Pipeline::new("recovering")
            .add_stage(ProcessingStage::function("fail", |_: i64| Err("boom".into())))
            .add_stage(ProcessingStage::function("add_one", |x: i64| Ok(x + 1)));
        pipeline.set_error_handler(|err, ctx| {
            assert_eq!(ctx.stage, "fail");
            assert_eq!(ctx.index, 0);
            assert!(err.to_string().contains("boom"));
            100
        });

        assert_eq!(pipeline.execute(1).unwrap(), 101);
        assert_eq!(pipeline.get_stats()[1].invocations, 1);
    }

    #[test]
    fn test_streaming_error_only_aborts_its_chunk() {
        let pipeline = Pipeline::new("odd_fails").add_stage(ProcessingStage::function(
            "even_only",
            |x: i64| {
                if x % 2 == 0 {
                    Ok(x)
                } else {
                    Err(format!("odd chunk {x}").into())
                }
            },
        ));
        let results: Vec<_> = pipeline.stream(vec![2, 3, 4]).collect();
        assert_eq!(results.len(), 3);
        assert_eq!(*results[0].as_ref().unwrap(), 2);
        assert!(results[1].is_err());
        assert_eq!(*results[2].as_ref().unwrap(), 4);
    }

    #[test]
    fn test_filter_in_batch_and_stream() {
        let pipeline = Pipeline::new("filtered")
            .add_stage(ProcessingStage::filter("non_negative", |x: &i64| *x >= 0))
            .add_stage(ProcessingStage::function("double", |x: i64| Ok(x * 2)));

        assert!(matches!(pipeline.execute(-1), Err(PipelineError::Filtered { .. })));
        let out: Vec<i64> = pipeline.stream(vec![1, -1, 2]).map(Result::unwrap).collect();
        assert_eq!(out, vec![2, 4]);
    }

    #[test]
    fn test_parallel_one_output_per_input() {
        let mut pipeline = scale_then_offset().with_workers(4).unwrap();
        pipeline.set_mode(ExecutionMode::Parallel);

        let inputs: Vec<i64> = (0..100).collect();
        let mut out: Vec<i64> = pipeline.process(inputs).into_iter().map(Result::unwrap).collect();
        out.sort_unstable();
        let expected: Vec<i64> = (0..100).map(|x| x * 2 + 10).collect();
        assert_eq!(out, expected);
        assert_eq!(pipeline.get_stats()[0].invocations, 100);
    }

    #[test]
    fn test_stats_and_reset() {
        let pipeline = scale_then_offset();
        pipeline.execute(1).unwrap();
        pipeline.execute(2).unwrap();
        let stats = pipeline.get_stats();
        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].name, "double");
        assert_eq!(stats[1].invocations, 2);

        pipeline.reset_stats();
        assert!(pipeline.get_stats().iter().all(|s| s.invocations == 0));
    }

    #[test]
    fn test_byte_chunks_through_pipeline() {
        let pipeline = Pipeline::new("invert").add_stage(ProcessingStage::function(
            "invert",
            |mut chunk: Vec<u8>| {
                chunk.iter_mut().for_each(|b| *b = !*b);
                Ok(chunk)
            },
        ));
        let data = vec![0u8; 10];
        let chunks = ByteChunks::new(Cursor::new(data), 4).map_while(Result::ok);
        let out: Vec<Vec<u8>> = pipeline.stream(chunks).map(Result::unwrap).collect();
        assert_eq!(out.len(), 3);
        assert!(out.concat().iter().all(|&b| b == 0xff));
    }

    fn affine_pipeline(ops: &[(i64, i64)]) -> Pipeline<i64> {
        ops.iter().enumerate().fold(Pipeline::new("prop"), |pipeline, (i, &(mul, add))| {
            pipeline.add_stage(ProcessingStage::function(format!("affine_{i}"), move |x: i64| {
                Ok(x.wrapping_mul(mul).wrapping_add(add))
            }))
        })
    }

    fn affine_direct(ops: &[(i64, i64)], x: i64) -> i64 {
        ops.iter().fold(x, |acc, &(mul, add)| acc.wrapping_mul(mul).wrapping_add(add))
    }

    proptest! {
        #[test]
        fn prop_execute_equals_sequential_calls(
            ops in prop::collection::vec((-5i64..5, -100i64..100), 0..8),
            x in -1000i64..1000,
        ) {
            let pipeline = affine_pipeline(&ops);
            prop_assert_eq!(pipeline.execute(x).unwrap(), affine_direct(&ops, x));
        }

        #[test]
        fn prop_streaming_matches_batch_per_chunk(
            ops in prop::collection::vec((-5i64..5, -100i64..100), 0..6),
            chunks in prop::collection::vec(-1000i64..1000, 0..32),
        ) {
            let pipeline = affine_pipeline(&ops);
            let streamed: Vec<i64> = pipeline
                .stream(chunks.clone())
                .map(Result::unwrap)
                .collect();
            prop_assert_eq!(streamed.len(), chunks.len());
            for (out, chunk) in streamed.iter().zip(&chunks) {
                prop_assert_eq!(*out, pipeline.execute(*chunk).unwrap());
            }
        }
    }
}
