// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error types for the replicator.
//!
//! Failures are local to one identity's reconciliation: a terminal failure
//! for one object never blocks or poisons others, and no error crashes the
//! controller. Only the shutdown signal stops it.
//!
//! # Error Categories
//!
//! | Error Type | Retryable | Description |
//! |------------|-----------|-------------|
//! | `Source` | Depends | Error talking to the source cluster |
//! | `Destination` | Depends | Error talking to the destination cluster |
//! | `ConflictBudgetExhausted` | Yes | In-reconcile conflict retries used up |
//! | `Rejected` | No | Destination refused the payload (validation/authz) |
//! | `Config` | No | Configuration invalid |
//! | `InvalidState` | No | Controller state machine violation |
//! | `Shutdown` | No | Controller is shutting down |
//! | `Internal` | No | Unexpected internal error |
//!
//! Cluster-backed variants inherit retryability from the underlying
//! [`ClusterError`]: unavailability, timeouts, and version conflicts retry
//! with backoff; malformed payloads and bad credentials do not.
//!
//! # Retry Behavior
//!
//! Use [`ReplicateError::is_retryable()`] to decide between re-adding the
//! identity to the work queue with backoff and surfacing a terminal failure.

use crate::cluster::ClusterError;
use crate::resource::ObjectRef;
use thiserror::Error;

/// Result type alias for replication operations.
pub type Result<T> = std::result::Result<T, ReplicateError>;

/// Errors that can occur during reconciliation.
#[derive(Error, Debug)]
pub enum ReplicateError {
    /// Error from the source cluster.
    ///
    /// The reconciler only reads from the source, so these come from
    /// get/list/watch calls.
    #[error("source cluster error ({operation}): {source}")]
    Source {
        operation: &'static str,
        #[source]
        source: ClusterError,
    },

    /// Error from the destination cluster.
    #[error("destination cluster error ({operation}): {source}")]
    Destination {
        operation: &'static str,
        #[source]
        source: ClusterError,
    },

    /// The in-reconcile conflict retry budget was exhausted.
    ///
    /// Someone kept modifying the destination object concurrently. Retryable:
    /// the identity goes back on the queue with backoff.
    #[error("conflict retry budget exhausted for {id} after {attempts} attempts")]
    ConflictBudgetExhausted { id: ObjectRef, attempts: u32 },

    /// The destination permanently rejected the replica.
    ///
    /// Validation or authorization failure. Not retryable: requeueing would
    /// hot-loop until the underlying condition is corrected, at which point
    /// the next change event or resync retries automatically.
    #[error("destination rejected {id}: {reason}")]
    Rejected { id: ObjectRef, reason: String },

    /// Invalid or missing configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Controller state machine violation.
    ///
    /// Occurs when an operation is attempted in the wrong state
    /// (e.g., calling `start()` on an already-running controller).
    #[error("invalid state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    /// Shutdown in progress.
    #[error("shutdown in progress")]
    Shutdown,

    /// Unexpected internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ReplicateError {
    /// Wrap a source-cluster error with the operation that produced it.
    pub fn source(operation: &'static str, source: ClusterError) -> Self {
        Self::Source { operation, source }
    }

    /// Wrap a destination-cluster error with the operation that produced it.
    pub fn destination(operation: &'static str, source: ClusterError) -> Self {
        Self::Destination { operation, source }
    }

    /// Check if this error is retryable via work-queue backoff.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Source { source, .. } => source.is_transient(),
            Self::Destination { source, .. } => source.is_transient(),
            Self::ConflictBudgetExhausted { .. } => true,
            Self::Rejected { .. } => false,
            Self::Config(_) => false,
            Self::InvalidState { .. } => false,
            Self::Shutdown => false,
            Self::Internal(_) => false,
        }
    }

    /// Check if this error wraps a destination version conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::Destination {
                source: ClusterError::Conflict { .. },
                ..
            }
        )
    }
}
