//! Shared test utilities for integration and chaos tests.
//!
//! This module provides:
//! - Policy object builders
//! - Fault-injecting cluster wrappers
//! - Polling helpers for eventually-consistent assertions

#![allow(dead_code)]

use policy_replicator::cluster::{BoxFuture, ClusterError, ClusterHandle, MemoryCluster};
use policy_replicator::resource::{ObjectRef, PolicyRule, PolicySpec, ResourceObject};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Once;
use std::time::Duration;

static TRACING: Once = Once::new();

/// Install a fmt subscriber for the test binary, honoring `RUST_LOG`.
///
/// Silent by default; run with `RUST_LOG=policy_replicator=debug` to see
/// controller logs interleaved with test output.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Build a policy identity in the `ns` namespace.
pub fn policy_id(name: &str) -> ObjectRef {
    ObjectRef::new("ClusterwideNetworkPolicy", "ns", name)
}

/// Build a policy object allowing TCP to the given ports.
pub fn policy(name: &str, ports: Vec<u16>) -> ResourceObject {
    ResourceObject::new(
        policy_id(name),
        PolicySpec {
            ingress: vec![PolicyRule::tcp(vec!["10.0.0.0/8".into()], ports)],
            egress: vec![],
        },
    )
}

/// Poll an async condition until it holds or the deadline passes.
pub async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within deadline: {what}");
}

/// Assert an async condition keeps holding for a short window.
pub async fn holds_for<F, Fut>(what: &str, window: Duration, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + window;
    while tokio::time::Instant::now() < deadline {
        assert!(check().await, "condition violated: {what}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Cluster wrapper that fails a configured number of calls with
/// `Unavailable` before delegating to an inner [`MemoryCluster`].
///
/// Read and write failures are budgeted separately so tests can target
/// either side of a reconcile.
pub struct FlakyCluster {
    pub inner: MemoryCluster,
    read_failures: AtomicU32,
    write_failures: AtomicU32,
}

impl FlakyCluster {
    pub fn new() -> Self {
        Self {
            inner: MemoryCluster::new(),
            read_failures: AtomicU32::new(0),
            write_failures: AtomicU32::new(0),
        }
    }

    /// Arm the next `n` reads (get/list) to fail.
    pub fn fail_reads(&self, n: u32) {
        self.read_failures.store(n, Ordering::SeqCst);
    }

    /// Arm the next `n` writes (create/update/delete) to fail.
    pub fn fail_writes(&self, n: u32) {
        self.write_failures.store(n, Ordering::SeqCst);
    }

    fn take(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn injected<T>() -> BoxFuture<'static, T>
    where
        T: Send + 'static,
    {
        Box::pin(async { Err(ClusterError::Unavailable("injected outage".into())) })
    }
}

impl ClusterHandle for FlakyCluster {
    fn get(&self, id: &ObjectRef) -> BoxFuture<'_, Option<ResourceObject>> {
        if Self::take(&self.read_failures) {
            return Self::injected();
        }
        self.inner.get(id)
    }

    fn list(&self) -> BoxFuture<'_, Vec<ResourceObject>> {
        if Self::take(&self.read_failures) {
            return Self::injected();
        }
        self.inner.list()
    }

    fn create(&self, obj: ResourceObject) -> BoxFuture<'_, ResourceObject> {
        if Self::take(&self.write_failures) {
            return Self::injected();
        }
        self.inner.create(obj)
    }

    fn update(&self, obj: ResourceObject) -> BoxFuture<'_, ResourceObject> {
        if Self::take(&self.write_failures) {
            return Self::injected();
        }
        self.inner.update(obj)
    }

    fn delete(&self, id: &ObjectRef) -> BoxFuture<'_, ()> {
        if Self::take(&self.write_failures) {
            return Self::injected();
        }
        self.inner.delete(id)
    }

    fn watch(&self) -> BoxFuture<'_, tokio::sync::broadcast::Receiver<ObjectRef>> {
        self.inner.watch()
    }
}

/// Cluster wrapper that rejects writes for identities whose name matches
/// `reject_name` with `InvalidPayload`, a terminal condition.
pub struct RejectingCluster {
    pub inner: MemoryCluster,
    reject_name: String,
}

impl RejectingCluster {
    pub fn new(reject_name: &str) -> Self {
        Self {
            inner: MemoryCluster::new(),
            reject_name: reject_name.to_string(),
        }
    }

    fn rejects(&self, id: &ObjectRef) -> bool {
        id.name == self.reject_name
    }
}

impl ClusterHandle for RejectingCluster {
    fn get(&self, id: &ObjectRef) -> BoxFuture<'_, Option<ResourceObject>> {
        self.inner.get(id)
    }

    fn list(&self) -> BoxFuture<'_, Vec<ResourceObject>> {
        self.inner.list()
    }

    fn create(&self, obj: ResourceObject) -> BoxFuture<'_, ResourceObject> {
        if self.rejects(&obj.id) {
            return Box::pin(async {
                Err(ClusterError::InvalidPayload("rule validation failed".into()))
            });
        }
        self.inner.create(obj)
    }

    fn update(&self, obj: ResourceObject) -> BoxFuture<'_, ResourceObject> {
        if self.rejects(&obj.id) {
            return Box::pin(async {
                Err(ClusterError::InvalidPayload("rule validation failed".into()))
            });
        }
        self.inner.update(obj)
    }

    fn delete(&self, id: &ObjectRef) -> BoxFuture<'_, ()> {
        self.inner.delete(id)
    }

    fn watch(&self) -> BoxFuture<'_, tokio::sync::broadcast::Receiver<ObjectRef>> {
        self.inner.watch()
    }
}
