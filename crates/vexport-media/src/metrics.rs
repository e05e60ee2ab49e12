//! Metrics emitted by the media core.
//!
//! Only the `metrics` facade is used here; installing a recorder is left to
//! the host process.

use ::metrics::{counter, histogram};

/// Metric names as constants for consistency.
pub mod names {
    // Pipeline
    pub const STAGE_INVOCATIONS_TOTAL: &str = "vexport_stage_invocations_total";
    pub const STAGE_ERRORS_TOTAL: &str = "vexport_stage_errors_total";
    pub const STAGE_DURATION_SECONDS: &str = "vexport_stage_duration_seconds";

    // Encoder
    pub const ENCODER_RUNS_TOTAL: &str = "vexport_encoder_runs_total";
    pub const ENCODER_FAILURES_TOTAL: &str = "vexport_encoder_failures_total";
    pub const ENCODER_DURATION_SECONDS: &str = "vexport_encoder_duration_seconds";

    // Memory maps
    pub const MMAP_CACHE_HITS_TOTAL: &str = "vexport_mmap_cache_hits_total";
    pub const MMAP_CACHE_MISSES_TOTAL: &str = "vexport_mmap_cache_misses_total";
    pub const MMAP_EVICTIONS_TOTAL: &str = "vexport_mmap_evictions_total";

    // Resource cleanup
    pub const RESOURCES_RELEASED_TOTAL: &str = "vexport_resources_released_total";
    pub const RESOURCE_RELEASE_FAILURES_TOTAL: &str = "vexport_resource_release_failures_total";
}

/// Record one stage invocation.
pub fn record_stage(pipeline: &str, stage: &str, duration_secs: f64, failed: bool) {
    let labels = [
        ("pipeline", pipeline.to_string()),
        ("stage", stage.to_string()),
    ];
    counter!(names::STAGE_INVOCATIONS_TOTAL, &labels).increment(1);
    histogram!(names::STAGE_DURATION_SECONDS, &labels).record(duration_secs);
    if failed {
        counter!(names::STAGE_ERRORS_TOTAL, &labels).increment(1);
    }
}

/// Record one encoder process run.
pub fn record_encoder_run(operation: &str, duration_secs: f64, success: bool) {
    let labels = [("operation", operation.to_string())];
    counter!(names::ENCODER_RUNS_TOTAL, &labels).increment(1);
    histogram!(names::ENCODER_DURATION_SECONDS, &labels).record(duration_secs);
    if !success {
        counter!(names::ENCODER_FAILURES_TOTAL, &labels).increment(1);
    }
}

pub fn record_mmap_hit() {
    counter!(names::MMAP_CACHE_HITS_TOTAL).increment(1);
}

pub fn record_mmap_miss() {
    counter!(names::MMAP_CACHE_MISSES_TOTAL).increment(1);
}

pub fn record_mmap_eviction() {
    counter!(names::MMAP_EVICTIONS_TOTAL).increment(1);
}

/// Record the outcome of a cleanup pass.
pub fn record_cleanup(released: usize, failed: usize) {
    counter!(names::RESOURCES_RELEASED_TOTAL).increment(released as u64);
    if failed > 0 {
        counter!(names::RESOURCE_RELEASE_FAILURES_TOTAL).increment(failed as u64);
    }
}
