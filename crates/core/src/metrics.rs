//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Pipeline steps (executions, failures, durations)
//! - Registry lookups (calls, cache hits, rate limiting)
//! - Action API calls
//! - Artifact storage and merges

use once_cell::sync::Lazy;
use prometheus::{
    HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts,
};

// =============================================================================
// Pipeline Metrics
// =============================================================================

/// Step executions total by step and result.
pub static STEPS_EXECUTED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("billrun_steps_executed_total", "Total pipeline step executions"),
        &["step", "result"], // result: "success", "failure"
    )
    .unwrap()
});

/// Step duration in seconds.
pub static STEP_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "billrun_step_duration_seconds",
            "Duration of pipeline steps",
        )
        .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]),
        &["step"],
    )
    .unwrap()
});

/// Groups that reached the terminal status.
pub static GROUPS_COMPLETED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "billrun_groups_completed_total",
        "Total groups that reached the terminal status",
    )
    .unwrap()
});

/// Group step failures by step.
pub static GROUP_FAILURES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("billrun_group_failures_total", "Total group step failures"),
        &["step"],
    )
    .unwrap()
});

/// Groups currently being processed.
pub static GROUPS_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "billrun_groups_in_flight",
        "Groups currently being processed",
    )
    .unwrap()
});

// =============================================================================
// Registry Lookup Metrics
// =============================================================================

/// External lookup calls actually issued.
pub static LOOKUP_CALLS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "billrun_lookup_calls_total",
        "Total registry lookup calls issued",
    )
    .unwrap()
});

/// Lookups answered from the batch cache.
pub static LOOKUP_CACHE_HITS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "billrun_lookup_cache_hits_total",
        "Total registry lookups answered from cache",
    )
    .unwrap()
});

/// Rate-limit responses from the registry.
pub static LOOKUP_RATE_LIMITED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "billrun_lookup_rate_limited_total",
        "Total rate-limit responses from the registry",
    )
    .unwrap()
});

// =============================================================================
// Action API Metrics
// =============================================================================

/// Action API calls total by action and status.
pub static ACTION_CALLS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("billrun_action_calls_total", "Total action API calls"),
        &["action", "status"], // status: "success", "error"
    )
    .unwrap()
});

/// Action API call duration in seconds.
pub static ACTION_CALL_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "billrun_action_call_duration_seconds",
            "Duration of action API calls",
        )
        .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        &["action"],
    )
    .unwrap()
});

// =============================================================================
// Artifact Metrics
// =============================================================================

/// Artifacts stored by kind.
pub static ARTIFACTS_STORED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("billrun_artifacts_stored_total", "Total artifacts stored"),
        &["kind"], // "base", "extra", "merged"
    )
    .unwrap()
});

/// Artifact sizes in bytes by kind.
pub static ARTIFACT_BYTES: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new("billrun_artifact_bytes", "Stored artifact sizes in bytes").buckets(
            vec![
                1024.0,
                16384.0,
                65536.0,
                262144.0,
                1048576.0,
                4194304.0,
                16777216.0,
            ],
        ),
        &["kind"],
    )
    .unwrap()
});

/// Artifacts missing at merge time.
pub static ARTIFACTS_MISSING: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "billrun_artifacts_missing_total",
        "Artifacts missing when the merge ran",
    )
    .unwrap()
});

// =============================================================================
// Helper functions
// =============================================================================

/// Get all core metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        // Pipeline
        Box::new(STEPS_EXECUTED.clone()),
        Box::new(STEP_DURATION.clone()),
        Box::new(GROUPS_COMPLETED.clone()),
        Box::new(GROUP_FAILURES.clone()),
        Box::new(GROUPS_IN_FLIGHT.clone()),
        // Lookups
        Box::new(LOOKUP_CALLS.clone()),
        Box::new(LOOKUP_CACHE_HITS.clone()),
        Box::new(LOOKUP_RATE_LIMITED.clone()),
        // Actions
        Box::new(ACTION_CALLS.clone()),
        Box::new(ACTION_CALL_DURATION.clone()),
        // Artifacts
        Box::new(ARTIFACTS_STORED.clone()),
        Box::new(ARTIFACT_BYTES.clone()),
        Box::new(ARTIFACTS_MISSING.clone()),
    ]
}
