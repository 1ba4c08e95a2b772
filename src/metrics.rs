//! Metrics for observability.
//!
//! Exports Prometheus-compatible metrics for:
//! - Reconcile outcomes and latency
//! - Conflict retries and requeues
//! - Terminal failures
//! - Work queue depth
//! - Watch events and resyncs
//! - Controller state
//!
//! # Metric Naming Convention
//!
//! All metrics are prefixed with `replicator_` and follow Prometheus
//! conventions: counters end in `_total`, gauges represent current state,
//! histograms track distributions.
//!
//! # Usage
//!
//! ```rust,no_run
//! use policy_replicator::metrics;
//! use std::time::Duration;
//!
//! // In the worker loop after a reconcile
//! metrics::record_reconcile("updated", Duration::from_millis(12));
//! ```

use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Record a completed reconcile with its outcome label and duration.
///
/// Outcome is one of `unchanged`, `created`, `updated`, `deleted`,
/// `retryable_error`, `terminal_error`, `timeout`.
pub fn record_reconcile(outcome: &str, duration: Duration) {
    counter!("replicator_reconciles_total", "outcome" => outcome.to_string()).increment(1);
    histogram!("replicator_reconcile_duration_seconds", "outcome" => outcome.to_string())
        .record(duration.as_secs_f64());
}

/// Record an in-reconcile version-conflict retry.
pub fn record_conflict_retry() {
    counter!("replicator_conflict_retries_total").increment(1);
}

/// Record a rate-limited requeue and the identity's failure streak.
pub fn record_requeue(attempt: u32) {
    counter!("replicator_requeues_total").increment(1);
    histogram!("replicator_requeue_attempt").record(attempt as f64);
}

/// Record a terminal (non-retryable) failure.
pub fn record_terminal_failure() {
    counter!("replicator_terminal_failures_total").increment(1);
}

/// Set the number of terminal failures currently outstanding.
pub fn set_terminal_failures(count: usize) {
    gauge!("replicator_terminal_failures").set(count as f64);
}

/// Set the current work queue depth (ready items, excluding in-flight).
pub fn set_queue_depth(depth: usize) {
    gauge!("replicator_queue_depth").set(depth as f64);
}

/// Record change events observed from the source watch.
pub fn record_watch_events(count: usize) {
    counter!("replicator_watch_events_total").increment(count as u64);
}

/// Record a full resync and the number of objects enumerated.
pub fn record_resync(objects: usize) {
    counter!("replicator_resyncs_total").increment(1);
    histogram!("replicator_resync_objects").record(objects as f64);
}

/// Record a watch resubscription after a dropped or lagged subscription.
pub fn record_resubscribe() {
    counter!("replicator_watch_resubscribes_total").increment(1);
}

/// Record the controller state (1.0 for the current state label).
pub fn set_controller_state(state: &str) {
    gauge!("replicator_controller_state", "state" => state.to_string()).set(1.0);
}

/// Record a destination write (create/update/delete) by operation.
pub fn record_destination_write(operation: &str) {
    counter!("replicator_destination_writes_total", "operation" => operation.to_string())
        .increment(1);
}
