//! # Policy Replicator
//!
//! A controller for replicating network policy objects from a source cluster
//! to a destination cluster.
//!
//! ## Architecture
//!
//! The controller observes changes on the source cluster and drives the
//! destination toward the same state, one identity at a time:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                           policy-replicator                          │
//! │                                                                      │
//! │  ┌──────────────┐    ┌───────────────┐    ┌───────────────────────┐  │
//! │  │ ChangeSource │───►│   WorkQueue   │───►│ Workers ─► Reconciler │  │
//! │  │ (watch +     │    │ (dedup +      │    │ (decision table +     │  │
//! │  │  resync)     │    │  backoff)     │    │  conflict retry)      │  │
//! │  └──────────────┘    └───────────────┘    └───────────┬───────────┘  │
//! │         │                                             │              │
//! │         ▼                                             ▼              │
//! │  ┌──────────────┐                         ┌───────────────────────┐  │
//! │  │ source       │                         │ Applier ─► dest       │  │
//! │  │ ClusterHandle│                         │ (idempotent writes)   │  │
//! │  └──────────────┘                         └───────────────────────┘  │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Level-Based Reconciliation
//!
//! Change events carry only the identity of what changed, never the payload.
//! Every reconcile re-reads current state from both clusters and converges,
//! so duplicate, reordered, or missed notifications are all safe: the
//! periodic resync re-enumerates the source and heals anything a dropped
//! subscription lost.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use policy_replicator::{Controller, MemoryCluster, ReplicatorConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let source = Arc::new(MemoryCluster::new());
//!     let dest = Arc::new(MemoryCluster::new());
//!
//!     let config = ReplicatorConfig::default();
//!     let mut controller = Controller::new(config, source, dest);
//!     controller.start().await.expect("Failed to start");
//!
//!     // Controller runs until shutdown signal
//!     controller.shutdown().await;
//! }
//! ```

pub mod applier;
pub mod cluster;
pub mod config;
pub mod controller;
pub mod error;
pub mod metrics;
pub mod queue;
pub mod reconciler;
pub mod resilience;
pub mod resource;
pub mod watch;

// Re-exports for convenience
pub use applier::{Applier, Outcome};
pub use cluster::{ClusterError, ClusterHandle, ClusterResult, MemoryCluster};
pub use config::{ReplicatorConfig, ReplicatorSettings, WatchConfig, WorkerConfig};
pub use controller::{Controller, ControllerState, HealthCheck};
pub use error::{ReplicateError, Result};
pub use queue::WorkQueue;
pub use reconciler::Reconciler;
pub use resource::{ObjectRef, PolicyRule, PolicySpec, Protocol, ResourceObject};
