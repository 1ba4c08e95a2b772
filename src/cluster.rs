// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Cluster API abstraction.
//!
//! [`ClusterHandle`] is the seam between the reconciliation core and a
//! cluster's API surface. Two handles exist at runtime: the source (read-only
//! from the reconciler's perspective) and the destination (read-write).
//! Credentials and connection parameters are the caller's concern; the core
//! receives constructed handles by value.
//!
//! This trait allows testing with in-memory clusters and decouples the core
//! from any particular API machinery.
//!
//! # Condition Vocabulary
//!
//! | Condition | Transient | Meaning |
//! |-----------|-----------|---------|
//! | `NotFound` | - | Object absent. Callers decide: "absent" for get, success for delete |
//! | `AlreadyExists` | - | Create raced with another writer |
//! | `Conflict` | Yes | Resource version mismatch on update |
//! | `Unavailable` | Yes | Cluster unreachable or overloaded |
//! | `Timeout` | Yes | Call exceeded its deadline |
//! | `InvalidPayload` | No | Cluster rejected the object as malformed |
//! | `Unauthorized` | No | Credentials rejected |
//!
//! # Watch Semantics
//!
//! [`ClusterHandle::watch`] returns a broadcast receiver of changed
//! identities. Delivery is at-least-once; a lagged receiver
//! ([`tokio::sync::broadcast::error::RecvError::Lagged`]) signals missed
//! notifications and callers must resync via `list`.

use crate::resource::{ObjectRef, ResourceObject};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use thiserror::Error;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

/// Result type for cluster operations.
pub type ClusterResult<T> = std::result::Result<T, ClusterError>;

/// Type alias for boxed async futures (reduces trait signature complexity).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = ClusterResult<T>> + Send + 'a>>;

/// Conditions reported by a cluster API.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClusterError {
    /// No object with the requested identity.
    #[error("not found")]
    NotFound,

    /// Create raced with a concurrent create for the same identity.
    #[error("already exists")]
    AlreadyExists,

    /// Optimistic-concurrency failure: the stored resource version does not
    /// match the version on the submitted object.
    #[error("version conflict: expected {expected}, got {submitted}")]
    Conflict {
        expected: String,
        submitted: String,
    },

    /// Cluster unreachable, overloaded, or mid-restart.
    #[error("cluster unavailable: {0}")]
    Unavailable(String),

    /// Call exceeded its deadline.
    #[error("operation timed out")]
    Timeout,

    /// Cluster rejected the payload as malformed.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// Credentials rejected.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
}

impl ClusterError {
    /// Check if this condition is transient and worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Conflict { .. } => true,
            Self::Unavailable(_) => true,
            Self::Timeout => true,
            Self::NotFound => false, // Handled by callers, never retried blindly
            Self::AlreadyExists => false,
            Self::InvalidPayload(_) => false,
            Self::Unauthorized(_) => false,
        }
    }

    /// Check if this is a version conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

/// One cluster's API surface for a single resource kind.
///
/// Implementations must be safe for concurrent use by multiple workers
/// without external locking. All durable state lives behind this trait; the
/// reconciliation core keeps none of its own.
pub trait ClusterHandle: Send + Sync + 'static {
    /// Fetch an object by identity.
    ///
    /// Absence is `Ok(None)`, never an error.
    fn get(&self, id: &ObjectRef) -> BoxFuture<'_, Option<ResourceObject>>;

    /// List all objects of the watched kind.
    fn list(&self) -> BoxFuture<'_, Vec<ResourceObject>>;

    /// Create a new object. The cluster mints the resource version.
    ///
    /// Fails with [`ClusterError::AlreadyExists`] if the identity is taken.
    fn create(&self, obj: ResourceObject) -> BoxFuture<'_, ResourceObject>;

    /// Update an existing object.
    ///
    /// The submitted object's `resource_version` must match the stored one;
    /// otherwise the call fails with [`ClusterError::Conflict`]. On success
    /// the cluster mints a fresh version.
    fn update(&self, obj: ResourceObject) -> BoxFuture<'_, ResourceObject>;

    /// Delete an object by identity.
    ///
    /// Fails with [`ClusterError::NotFound`] if already gone; delete paths
    /// treat that as success.
    fn delete(&self, id: &ObjectRef) -> BoxFuture<'_, ()>;

    /// Subscribe to change notifications.
    ///
    /// Every create, update, and delete emits the affected identity
    /// at least once. Duplicates are possible and must be harmless.
    fn watch(&self) -> BoxFuture<'_, broadcast::Receiver<ObjectRef>>;
}

/// In-memory cluster backend.
///
/// A complete [`ClusterHandle`] implementation holding objects in a map:
/// mints monotonically increasing resource versions, enforces
/// optimistic-concurrency on update, and broadcasts changed identities to
/// watchers. Replaces external API servers in tests and standalone mode.
pub struct MemoryCluster {
    objects: RwLock<HashMap<ObjectRef, ResourceObject>>,
    next_version: AtomicU64,
    events: broadcast::Sender<ObjectRef>,
    /// Count of successful mutations (create + update + delete).
    /// Lets tests assert idempotence: a second identical reconcile
    /// must not move this counter.
    writes: AtomicUsize,
}

impl MemoryCluster {
    /// Default watch channel capacity.
    const WATCH_CAPACITY: usize = 256;

    /// Create an empty cluster.
    pub fn new() -> Self {
        Self::with_watch_capacity(Self::WATCH_CAPACITY)
    }

    /// Create an empty cluster with a bounded watch buffer.
    ///
    /// Small capacities force receiver lag, which is how tests exercise the
    /// resync-on-reconnect path.
    pub fn with_watch_capacity(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity);
        Self {
            objects: RwLock::new(HashMap::new()),
            next_version: AtomicU64::new(1),
            events,
            writes: AtomicUsize::new(0),
        }
    }

    fn mint_version(&self) -> String {
        self.next_version.fetch_add(1, Ordering::SeqCst).to_string()
    }

    fn notify(&self, id: &ObjectRef) {
        // No receivers is fine: nobody is watching yet.
        let _ = self.events.send(id.clone());
    }

    /// Number of successful mutations performed so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Number of stored objects.
    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    /// True if the cluster holds no objects.
    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }

    /// Mark an object with a deletion tombstone without removing it.
    ///
    /// Emits a change event. Consumers must treat the object as absent.
    pub async fn tombstone(&self, id: &ObjectRef, at_millis: u64) -> ClusterResult<()> {
        let mut objects = self.objects.write().await;
        let obj = objects.get_mut(id).ok_or(ClusterError::NotFound)?;
        obj.deletion_timestamp = Some(at_millis);
        obj.resource_version = Some(self.mint_version());
        self.writes.fetch_add(1, Ordering::SeqCst);
        drop(objects);
        self.notify(id);
        Ok(())
    }
}

impl Default for MemoryCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl ClusterHandle for MemoryCluster {
    fn get(&self, id: &ObjectRef) -> BoxFuture<'_, Option<ResourceObject>> {
        let id = id.clone();
        Box::pin(async move { Ok(self.objects.read().await.get(&id).cloned()) })
    }

    fn list(&self) -> BoxFuture<'_, Vec<ResourceObject>> {
        Box::pin(async move {
            let objects = self.objects.read().await;
            let mut all: Vec<ResourceObject> = objects.values().cloned().collect();
            all.sort_by(|a, b| a.id.cmp(&b.id));
            Ok(all)
        })
    }

    fn create(&self, mut obj: ResourceObject) -> BoxFuture<'_, ResourceObject> {
        Box::pin(async move {
            let mut objects = self.objects.write().await;
            if objects.contains_key(&obj.id) {
                return Err(ClusterError::AlreadyExists);
            }
            obj.resource_version = Some(self.mint_version());
            let id = obj.id.clone();
            objects.insert(id.clone(), obj.clone());
            self.writes.fetch_add(1, Ordering::SeqCst);
            drop(objects);
            debug!(id = %id, version = ?obj.resource_version, "Object created");
            self.notify(&id);
            Ok(obj)
        })
    }

    fn update(&self, mut obj: ResourceObject) -> BoxFuture<'_, ResourceObject> {
        Box::pin(async move {
            let mut objects = self.objects.write().await;
            let stored = objects.get(&obj.id).ok_or(ClusterError::NotFound)?;
            if stored.resource_version != obj.resource_version {
                return Err(ClusterError::Conflict {
                    expected: stored
                        .resource_version
                        .clone()
                        .unwrap_or_else(|| "<none>".to_string()),
                    submitted: obj
                        .resource_version
                        .clone()
                        .unwrap_or_else(|| "<none>".to_string()),
                });
            }
            obj.resource_version = Some(self.mint_version());
            let id = obj.id.clone();
            objects.insert(id.clone(), obj.clone());
            self.writes.fetch_add(1, Ordering::SeqCst);
            drop(objects);
            debug!(id = %id, version = ?obj.resource_version, "Object updated");
            self.notify(&id);
            Ok(obj)
        })
    }

    fn delete(&self, id: &ObjectRef) -> BoxFuture<'_, ()> {
        let id = id.clone();
        Box::pin(async move {
            let mut objects = self.objects.write().await;
            if objects.remove(&id).is_none() {
                return Err(ClusterError::NotFound);
            }
            self.writes.fetch_add(1, Ordering::SeqCst);
            drop(objects);
            debug!(id = %id, "Object deleted");
            self.notify(&id);
            Ok(())
        })
    }

    fn watch(&self) -> BoxFuture<'_, broadcast::Receiver<ObjectRef>> {
        Box::pin(async move { Ok(self.events.subscribe()) })
    }
}
