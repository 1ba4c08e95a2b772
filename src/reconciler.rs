// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The reconciliation core.
//!
//! One reconcile drives the destination cluster toward the source cluster's
//! state for a single identity:
//!
//! ```text
//! source state    destination state    action
//! ------------    -----------------    ------
//! absent          absent               no-op
//! absent          present              delete destination
//! present         absent               create replica
//! present         present, equal       no-op
//! present         present, diverged    update replica spec
//! ```
//!
//! "Absent" covers both physical absence and a logical deletion tombstone on
//! the source object. Reconciliation is idempotent: re-running it with
//! unchanged source state produces no destination mutation.
//!
//! # Conflict Retries
//!
//! A destination version conflict means a concurrent writer touched the
//! replica between our read and our write. The whole reconcile re-runs
//! immediately (fresh reads, fresh decision) up to a small fixed budget;
//! exhaustion surfaces as a retryable failure so the work queue re-schedules
//! with backoff instead of spinning here.
//!
//! The reconciler never mutates the source cluster and holds no state of its
//! own between invocations.

use crate::applier::{Applier, Outcome};
use crate::cluster::ClusterHandle;
use crate::error::{ReplicateError, Result};
use crate::metrics;
use crate::resource::ObjectRef;
use std::sync::Arc;
use tracing::{debug, warn};

/// Convergence engine for a single resource kind across two clusters.
pub struct Reconciler<S: ClusterHandle, D: ClusterHandle> {
    source: Arc<S>,
    applier: Applier<D>,
    conflict_retries: u32,
}

impl<S: ClusterHandle, D: ClusterHandle> Reconciler<S, D> {
    /// Create a reconciler reading from `source` and writing through an
    /// applier to the destination.
    pub fn new(source: Arc<S>, dest: Arc<D>, controller_id: &str, conflict_retries: u32) -> Self {
        Self {
            source,
            applier: Applier::new(dest, controller_id),
            conflict_retries,
        }
    }

    /// Reconcile one identity.
    ///
    /// Fetches current source and destination state and applies the decision
    /// table. Version conflicts are retried in place up to the configured
    /// budget; all other failures propagate for the caller to classify via
    /// [`ReplicateError::is_retryable`].
    pub async fn reconcile(&self, id: &ObjectRef) -> Result<Outcome> {
        let mut attempt: u32 = 0;
        loop {
            match self.reconcile_once(id).await {
                Err(e) if e.is_conflict() => {
                    if attempt >= self.conflict_retries {
                        warn!(
                            id = %id,
                            attempts = attempt + 1,
                            "Conflict retry budget exhausted"
                        );
                        return Err(ReplicateError::ConflictBudgetExhausted {
                            id: id.clone(),
                            attempts: attempt + 1,
                        });
                    }
                    attempt += 1;
                    metrics::record_conflict_retry();
                    debug!(id = %id, attempt, "Version conflict, re-running reconcile");
                }
                other => return other,
            }
        }
    }

    async fn reconcile_once(&self, id: &ObjectRef) -> Result<Outcome> {
        let source_obj = self
            .source
            .get(id)
            .await
            .map_err(|e| ReplicateError::source("get", e))?;

        // A tombstoned source object is as good as gone.
        let desired = source_obj.filter(|obj| !obj.is_deleted());

        match desired {
            Some(obj) => {
                debug!(id = %id, "Source present, converging destination");
                self.applier.ensure_present(&obj).await
            }
            None => {
                debug!(id = %id, "Source absent, removing destination replica");
                self.applier.ensure_absent(id).await
            }
        }
    }
}
