// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Reconcile worker loop.
//!
//! Each worker pulls identities from the work queue and runs one reconcile
//! per pull under a deadline. Outcome classification:
//!
//! - **Success**: failure history is forgotten, so the identity's next retry
//!   starts from the initial backoff delay.
//! - **Retryable failure** (transient cluster errors, exhausted conflict
//!   budget, deadline exceeded): requeued with exponential backoff.
//! - **Terminal failure** (e.g. the destination rejected the payload):
//!   recorded for health reporting and NOT requeued. The next observed
//!   source change starts the identity fresh.
//!
//! Workers exit when the queue reports shutdown. An optional dispatch rate
//! limiter, shared across the pool, bounds reconciles per second globally.

use crate::error::ReplicateError;
use crate::metrics;
use crate::queue::WorkQueue;
use crate::reconciler::Reconciler;
use crate::cluster::ClusterHandle;
use crate::resilience::RateLimiter;
use crate::resource::ObjectRef;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn, Instrument};

/// Identities whose last reconcile failed terminally, shared with the
/// controller's health check.
pub(super) type TerminalFailures = Arc<RwLock<BTreeMap<ObjectRef, String>>>;

/// Run one reconcile worker until the queue shuts down.
pub(super) async fn run_worker<S: ClusterHandle, D: ClusterHandle>(
    worker_id: usize,
    queue: Arc<WorkQueue>,
    reconciler: Arc<Reconciler<S, D>>,
    rate_limiter: Option<Arc<RateLimiter>>,
    reconcile_timeout: Duration,
    terminal_failures: TerminalFailures,
) {
    let span = tracing::info_span!("worker", worker_id);

    async move {
        debug!("Worker started");

        while let Some(id) = queue.get().await {
            if let Some(limiter) = &rate_limiter {
                limiter.acquire().await;
            }

            let started = Instant::now();
            let result =
                tokio::time::timeout(reconcile_timeout, reconciler.reconcile(&id)).await;
            let elapsed = started.elapsed();

            match result {
                Ok(Ok(outcome)) => {
                    metrics::record_reconcile(outcome.as_str(), elapsed);
                    if outcome.mutated() {
                        info!(id = %id, %outcome, elapsed_ms = elapsed.as_millis() as u64, "Reconciled");
                    } else {
                        debug!(id = %id, "Reconciled, no change");
                    }
                    queue.forget(&id).await;
                    clear_terminal(&terminal_failures, &id).await;
                }
                Ok(Err(e)) if e.is_retryable() => {
                    metrics::record_reconcile("retryable_error", elapsed);
                    let attempt = queue.num_requeues(&id).await + 1;
                    warn!(
                        id = %id,
                        error = %e,
                        attempt,
                        "Reconcile failed, requeueing with backoff"
                    );
                    queue.add_rate_limited(id.clone()).await;
                }
                Ok(Err(e)) => {
                    metrics::record_reconcile("terminal_error", elapsed);
                    metrics::record_terminal_failure();
                    error!(id = %id, error = %e, "Reconcile failed terminally, not retrying");
                    queue.forget(&id).await;
                    record_terminal(&terminal_failures, &id, &e).await;
                }
                Err(_) => {
                    metrics::record_reconcile("timeout", elapsed);
                    warn!(
                        id = %id,
                        timeout_ms = reconcile_timeout.as_millis() as u64,
                        "Reconcile deadline exceeded, requeueing with backoff"
                    );
                    queue.add_rate_limited(id.clone()).await;
                }
            }

            // Release the identity last so a change observed mid-reconcile
            // gets exactly one redelivery.
            queue.done(&id).await;
        }

        debug!("Worker stopped");
    }
    .instrument(span)
    .await
}

async fn record_terminal(failures: &TerminalFailures, id: &ObjectRef, e: &ReplicateError) {
    let mut map = failures.write().await;
    map.insert(id.clone(), e.to_string());
    metrics::set_terminal_failures(map.len());
}

async fn clear_terminal(failures: &TerminalFailures, id: &ObjectRef) {
    let mut map = failures.write().await;
    if map.remove(id).is_some() {
        metrics::set_terminal_failures(map.len());
    }
}
