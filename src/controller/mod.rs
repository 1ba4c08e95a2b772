// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Controller runner.
//!
//! The main orchestrator that ties together:
//! - Change observation via [`crate::watch`] (source cluster subscription)
//! - Scheduling via [`crate::queue::WorkQueue`]
//! - Convergence via [`crate::reconciler::Reconciler`]
//!
//! # Architecture
//!
//! The controller manages the full replication lifecycle:
//! 1. Subscribes to the source cluster and resyncs existing objects
//! 2. Coalesces change events through the deduplicating work queue
//! 3. Runs a fixed pool of reconcile workers against the destination
//! 4. Handles graceful shutdown with in-flight reconcile draining

mod types;
mod worker;

pub use types::{ControllerState, HealthCheck};

use crate::cluster::ClusterHandle;
use crate::config::ReplicatorConfig;
use crate::error::{ReplicateError, Result};
use crate::metrics;
use crate::queue::WorkQueue;
use crate::reconciler::Reconciler;
use crate::resilience::RateLimiter;
use crate::watch::run_change_source;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tracing::{debug, info, warn};
use worker::TerminalFailures;

/// The replication controller.
///
/// Drives a destination cluster toward the source cluster's state for one
/// resource kind. Reads from the source, writes to the destination, and
/// never the other way around.
pub struct Controller<S: ClusterHandle, D: ClusterHandle> {
    /// Configuration (fixed for the controller's lifetime)
    config: ReplicatorConfig,

    /// Controller state (broadcast to watchers)
    state_tx: watch::Sender<ControllerState>,

    /// Controller state receiver (for internal use)
    state_rx: watch::Receiver<ControllerState>,

    /// Source cluster handle (read-only usage)
    source: Arc<S>,

    /// Shared work queue between change source and workers
    queue: Arc<WorkQueue>,

    /// Convergence engine shared by the worker pool
    reconciler: Arc<Reconciler<S, D>>,

    /// Shutdown signal sender
    shutdown_tx: watch::Sender<bool>,

    /// Shutdown signal receiver
    shutdown_rx: watch::Receiver<bool>,

    /// Outstanding terminal failures, for health reporting
    terminal_failures: TerminalFailures,

    /// Change source and worker task handles
    task_handles: RwLock<Vec<tokio::task::JoinHandle<()>>>,
}

impl<S: ClusterHandle, D: ClusterHandle> Controller<S, D> {
    /// Create a controller replicating from `source` to `dest`.
    ///
    /// The controller starts in `Created` state. Call
    /// [`start()`](Self::start) to subscribe and begin reconciling.
    pub fn new(config: ReplicatorConfig, source: Arc<S>, dest: Arc<D>) -> Self {
        let (state_tx, state_rx) = watch::channel(ControllerState::Created);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let queue = Arc::new(WorkQueue::new(config.settings.requeue.retry()));
        let reconciler = Arc::new(Reconciler::new(
            Arc::clone(&source),
            dest,
            &config.controller_id,
            config.settings.reconcile.conflict_retries,
        ));

        Self {
            config,
            state_tx,
            state_rx,
            source,
            queue,
            reconciler,
            shutdown_tx,
            shutdown_rx,
            terminal_failures: Arc::new(RwLock::new(BTreeMap::new())),
            task_handles: RwLock::new(Vec::new()),
        }
    }

    /// Get current controller state.
    pub fn state(&self) -> ControllerState {
        *self.state_rx.borrow()
    }

    /// Get a receiver to watch state changes.
    pub fn state_receiver(&self) -> watch::Receiver<ControllerState> {
        self.state_rx.clone()
    }

    /// Check if the controller is running.
    pub fn is_running(&self) -> bool {
        matches!(self.state(), ControllerState::Running)
    }

    /// Get the controller identity written into ownership markers.
    pub fn controller_id(&self) -> &str {
        &self.config.controller_id
    }

    /// Get health status for monitoring endpoints.
    ///
    /// Collected from cached internal state; performs no cluster I/O.
    pub async fn health_check(&self) -> HealthCheck {
        let state = self.state();
        let queue_depth = self.queue.len().await;
        let terminal_failures = self.terminal_failures.read().await.clone();

        let ready = state == ControllerState::Running;
        let healthy = ready && terminal_failures.is_empty();

        HealthCheck {
            state,
            ready,
            queue_depth,
            workers: self.config.settings.worker.count,
            terminal_failures,
            healthy,
        }
    }

    /// Start the controller.
    ///
    /// 1. Spawns the change source (subscribe + initial resync)
    /// 2. Spawns the reconcile worker pool
    pub async fn start(&mut self) -> Result<()> {
        if self.state() != ControllerState::Created {
            return Err(ReplicateError::InvalidState {
                expected: "Created".to_string(),
                actual: format!("{:?}", self.state()),
            });
        }

        info!(
            controller_id = %self.config.controller_id,
            kind = %self.config.kind,
            workers = self.config.settings.worker.count,
            "Starting controller"
        );

        self.spawn_change_source().await;
        self.spawn_workers().await;

        let _ = self.state_tx.send(ControllerState::Running);
        metrics::set_controller_state("Running");
        info!("Controller running");

        Ok(())
    }

    /// Spawn the change source task.
    async fn spawn_change_source(&self) {
        let source = Arc::clone(&self.source);
        let queue = Arc::clone(&self.queue);
        let watch_config = self.config.settings.watch.clone();
        let shutdown_rx = self.shutdown_rx.clone();

        let handle = tokio::spawn(async move {
            run_change_source(source, queue, watch_config, shutdown_rx).await;
        });

        debug!("Spawned change source");
        self.task_handles.write().await.push(handle);
    }

    /// Spawn the reconcile worker pool.
    async fn spawn_workers(&self) {
        // One shared limiter bounds dispatch across the whole pool.
        let rate_limiter: Option<Arc<RateLimiter>> = self
            .config
            .settings
            .worker
            .rate_limit_config()
            .map(|cfg| {
                info!(
                    rate_per_sec = cfg.refill_rate,
                    burst = cfg.burst_size,
                    "Rate limiting enabled for reconcile dispatch"
                );
                Arc::new(RateLimiter::new(cfg))
            });

        let timeout = self.config.settings.reconcile.timeout();
        let mut handles = self.task_handles.write().await;

        for worker_id in 0..self.config.settings.worker.count {
            let queue = Arc::clone(&self.queue);
            let reconciler = Arc::clone(&self.reconciler);
            let rate_limiter = rate_limiter.clone();
            let terminal_failures = Arc::clone(&self.terminal_failures);

            let handle = tokio::spawn(async move {
                worker::run_worker(
                    worker_id,
                    queue,
                    reconciler,
                    rate_limiter,
                    timeout,
                    terminal_failures,
                )
                .await;
            });
            handles.push(handle);
        }

        debug!(count = self.config.settings.worker.count, "Spawned workers");
    }

    /// Shutdown the controller gracefully.
    ///
    /// Shutdown sequence:
    /// 1. Signal the change source to stop
    /// 2. Close the work queue; workers drain ready items and exit
    /// 3. Wait for tasks to finish in-flight reconciles (with timeout)
    pub async fn shutdown(&mut self) {
        info!("Shutting down controller");
        let _ = self.state_tx.send(ControllerState::ShuttingDown);
        metrics::set_controller_state("ShuttingDown");

        let _ = self.shutdown_tx.send(true);
        self.queue.shutdown().await;

        let handles: Vec<_> = {
            let mut guard = self.task_handles.write().await;
            std::mem::take(&mut *guard)
        };

        let task_count = handles.len();
        if task_count > 0 {
            info!(task_count, "Waiting for tasks to drain and complete");
        }

        let drain_timeout = std::time::Duration::from_secs(10);
        for (i, handle) in handles.into_iter().enumerate() {
            match tokio::time::timeout(drain_timeout, handle).await {
                Ok(Ok(())) => {
                    debug!(task = i + 1, "Task completed gracefully");
                }
                Ok(Err(e)) => {
                    warn!(task = i + 1, error = %e, "Task panicked during shutdown");
                }
                Err(_) => {
                    warn!(task = i + 1, "Task timed out during shutdown");
                }
            }
        }

        let _ = self.state_tx.send(ControllerState::Stopped);
        metrics::set_controller_state("Stopped");
        info!("Controller stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::MemoryCluster;
    use crate::resource::{ObjectRef, PolicyRule, PolicySpec, ResourceObject};
    use std::time::Duration;

    fn test_controller() -> (
        Controller<MemoryCluster, MemoryCluster>,
        Arc<MemoryCluster>,
        Arc<MemoryCluster>,
    ) {
        let source = Arc::new(MemoryCluster::new());
        let dest = Arc::new(MemoryCluster::new());
        let controller = Controller::new(
            ReplicatorConfig::for_testing("test-ctrl"),
            Arc::clone(&source),
            Arc::clone(&dest),
        );
        (controller, source, dest)
    }

    fn policy(name: &str) -> ResourceObject {
        ResourceObject::new(
            ObjectRef::new("Policy", "ns", name),
            PolicySpec {
                ingress: vec![PolicyRule::tcp(vec!["10.0.0.0/8".into()], vec![443])],
                egress: vec![],
            },
        )
    }

    async fn wait_for<F, Fut>(mut check: F)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while tokio::time::Instant::now() < deadline {
            if check().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached within deadline");
    }

    #[test]
    fn test_initial_state() {
        let (controller, _, _) = test_controller();
        assert_eq!(controller.state(), ControllerState::Created);
        assert!(!controller.is_running());
        assert_eq!(controller.controller_id(), "test-ctrl");
    }

    #[test]
    fn test_state_receiver() {
        let (controller, _, _) = test_controller();
        let state_rx = controller.state_receiver();
        assert_eq!(*state_rx.borrow(), ControllerState::Created);
    }

    #[tokio::test]
    async fn test_start_invalid_state() {
        let (mut controller, _, _) = test_controller();
        let _ = controller.state_tx.send(ControllerState::Running);

        let result = controller.start().await;
        match result {
            Err(ReplicateError::InvalidState { expected, actual }) => {
                assert_eq!(expected, "Created");
                assert_eq!(actual, "Running");
            }
            other => panic!("expected InvalidState, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_shutdown_from_created() {
        let (mut controller, _, _) = test_controller();
        controller.shutdown().await;
        assert_eq!(controller.state(), ControllerState::Stopped);
        assert!(!controller.is_running());
    }

    #[tokio::test]
    async fn test_replicates_and_stops() {
        let (mut controller, source, dest) = test_controller();
        source.create(policy("p1")).await.unwrap();

        controller.start().await.unwrap();
        assert!(controller.is_running());

        let d = Arc::clone(&dest);
        wait_for(move || {
            let d = Arc::clone(&d);
            async move { d.get(&ObjectRef::new("Policy", "ns", "p1")).await.unwrap().is_some() }
        })
        .await;

        let replica = dest
            .get(&ObjectRef::new("Policy", "ns", "p1"))
            .await
            .unwrap()
            .unwrap();
        assert!(replica.is_managed_by("test-ctrl"));

        controller.shutdown().await;
        assert_eq!(controller.state(), ControllerState::Stopped);
    }

    #[tokio::test]
    async fn test_health_check_reports_state() {
        let (mut controller, _, _) = test_controller();

        let health = controller.health_check().await;
        assert_eq!(health.state, ControllerState::Created);
        assert!(!health.ready);
        assert!(!health.healthy);

        controller.start().await.unwrap();
        let health = controller.health_check().await;
        assert!(health.ready);
        assert!(health.healthy);
        assert_eq!(health.workers, 2);
        assert!(health.terminal_failures.is_empty());

        controller.shutdown().await;
    }
}
