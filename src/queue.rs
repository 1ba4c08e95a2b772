//! Deduplicating work queue with per-identity retry backoff.
//!
//! Decouples change-event arrival from reconciliation execution. The queue is
//! the sole synchronization point between the change source and the worker
//! pool, and it is what keeps a flood of duplicate notifications from causing
//! concurrent conflicting reconciliations of the same identity.
//!
//! # Guarantees
//!
//! - **Coalescing**: an identity that is already queued or in flight is never
//!   queued twice. A second [`add`](WorkQueue::add) for a queued identity is
//!   a no-op; for an in-flight identity it marks the identity dirty so
//!   [`done`](WorkQueue::done) re-queues it once ("changed again while being
//!   processed").
//! - **At-most-one-outstanding-per-key**: [`get`](WorkQueue::get) never hands
//!   the same identity to two workers simultaneously.
//! - **Backoff**: [`add_rate_limited`](WorkQueue::add_rate_limited) schedules
//!   a re-add after an exponential per-identity delay;
//!   [`forget`](WorkQueue::forget) resets the failure count on success.
//!
//! # Shutdown
//!
//! [`shutdown`](WorkQueue::shutdown) wakes all suspended `get` callers, which
//! then return `None` once the queue drains. Delayed re-adds scheduled before
//! shutdown are dropped on arrival.

use crate::metrics;
use crate::resilience::RetryConfig;
use crate::resource::ObjectRef;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, trace};

#[derive(Default)]
struct QueueState {
    /// Identities ready for pickup, in arrival order.
    ready: VecDeque<ObjectRef>,
    /// Identities needing processing: everything in `ready` plus in-flight
    /// identities that changed again.
    dirty: HashSet<ObjectRef>,
    /// Identities currently held by a worker.
    processing: HashSet<ObjectRef>,
    /// Consecutive failed attempts per identity, for backoff.
    failures: HashMap<ObjectRef, u32>,
    /// No new work is accepted and `get` returns `None` once drained.
    shutting_down: bool,
}

/// Concurrent deduplicating work queue keyed by [`ObjectRef`].
///
/// Memory is bounded by the number of distinct identities: each appears at
/// most once in the ready list and once in each tracking set.
pub struct WorkQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    retry: RetryConfig,
}

impl WorkQueue {
    /// Create a queue using the given backoff schedule for failed requeues.
    pub fn new(retry: RetryConfig) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            retry,
        }
    }

    /// Enqueue an identity for reconciliation.
    ///
    /// Duplicate adds coalesce; an add for an in-flight identity defers to
    /// [`done`](Self::done).
    pub async fn add(&self, id: ObjectRef) {
        let mut state = self.state.lock().await;
        if state.shutting_down {
            trace!(id = %id, "Dropping add during shutdown");
            return;
        }
        if state.dirty.contains(&id) {
            // Already pending; coalesce.
            return;
        }
        state.dirty.insert(id.clone());
        if state.processing.contains(&id) {
            // In flight: done() will re-queue it.
            return;
        }
        state.ready.push_back(id);
        metrics::set_queue_depth(state.ready.len());
        drop(state);
        self.notify.notify_one();
    }

    /// Pull the next identity, suspending while the queue is empty.
    ///
    /// Returns `None` after [`shutdown`](Self::shutdown) once no ready work
    /// remains. The returned identity is marked in-flight until
    /// [`done`](Self::done) is called for it.
    pub async fn get(&self) -> Option<ObjectRef> {
        loop {
            // Register for wakeup before checking, so a concurrent add
            // between the check and the await cannot be missed.
            let notified = self.notify.notified();
            {
                let mut state = self.state.lock().await;
                if let Some(id) = state.ready.pop_front() {
                    state.dirty.remove(&id);
                    state.processing.insert(id.clone());
                    metrics::set_queue_depth(state.ready.len());
                    // Pass the wakeup along in case more work is ready.
                    if !state.ready.is_empty() {
                        self.notify.notify_one();
                    }
                    return Some(id);
                }
                if state.shutting_down {
                    // Wake the next waiter so all of them drain out.
                    self.notify.notify_one();
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Mark an in-flight identity as finished.
    ///
    /// If the identity was added again while in flight, it is re-queued for
    /// exactly one redelivery.
    pub async fn done(&self, id: &ObjectRef) {
        let mut state = self.state.lock().await;
        state.processing.remove(id);
        if state.dirty.contains(id) && !state.shutting_down {
            state.ready.push_back(id.clone());
            metrics::set_queue_depth(state.ready.len());
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Re-enqueue an identity after a retryable failure, with backoff.
    ///
    /// The delay grows exponentially with the identity's consecutive failure
    /// count. The actual add happens on a timer task, so callers should
    /// invoke [`done`](Self::done) immediately afterwards; if the timer fires
    /// before `done`, the coalescing rules still produce a single redelivery.
    pub async fn add_rate_limited(self: &Arc<Self>, id: ObjectRef) {
        let attempt = {
            let mut state = self.state.lock().await;
            if state.shutting_down {
                return;
            }
            let counter = state.failures.entry(id.clone()).or_insert(0);
            *counter = counter.saturating_add(1);
            *counter
        };
        let delay = self.retry.delay_for_attempt(attempt);
        metrics::record_requeue(attempt);
        debug!(id = %id, attempt, delay_ms = delay.as_millis() as u64, "Scheduling requeue");

        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(id).await;
        });
    }

    /// Forget an identity's failure history.
    ///
    /// Call after a successful reconcile (or a terminal failure) so the next
    /// genuine change starts from the initial backoff delay.
    pub async fn forget(&self, id: &ObjectRef) {
        let mut state = self.state.lock().await;
        state.failures.remove(id);
    }

    /// Number of consecutive failures recorded for an identity.
    pub async fn num_requeues(&self, id: &ObjectRef) -> u32 {
        let state = self.state.lock().await;
        state.failures.get(id).copied().unwrap_or(0)
    }

    /// Number of identities ready for pickup (excludes in-flight).
    pub async fn len(&self) -> usize {
        let state = self.state.lock().await;
        state.ready.len()
    }

    /// True if no identities are ready for pickup.
    pub async fn is_empty(&self) -> bool {
        let state = self.state.lock().await;
        state.ready.is_empty()
    }

    /// Stop accepting work and wake all suspended [`get`](Self::get) callers.
    ///
    /// Workers finish draining whatever is already ready, then observe
    /// `None` and exit.
    pub async fn shutdown(&self) {
        let mut state = self.state.lock().await;
        state.shutting_down = true;
        drop(state);
        self.notify.notify_waiters();
        // Waiters that raced past notify_waiters re-check the flag.
        self.notify.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn id(name: &str) -> ObjectRef {
        ObjectRef::new("Policy", "ns", name)
    }

    fn queue() -> Arc<WorkQueue> {
        Arc::new(WorkQueue::new(RetryConfig::testing()))
    }

    #[tokio::test]
    async fn test_add_get_done() {
        let q = queue();
        q.add(id("p1")).await;
        assert_eq!(q.len().await, 1);

        let got = q.get().await.unwrap();
        assert_eq!(got, id("p1"));
        assert!(q.is_empty().await);

        q.done(&got).await;
        assert!(q.is_empty().await);
    }

    #[tokio::test]
    async fn test_duplicate_adds_coalesce() {
        let q = queue();
        for _ in 0..10 {
            q.add(id("p1")).await;
        }
        assert_eq!(q.len().await, 1);

        let got = q.get().await.unwrap();
        q.done(&got).await;
        // Nothing further: duplicates collapsed to one delivery.
        assert!(q.is_empty().await);
    }

    #[tokio::test]
    async fn test_add_while_processing_requeues_once() {
        let q = queue();
        q.add(id("p1")).await;
        let got = q.get().await.unwrap();

        // Changed again (twice) while in flight.
        q.add(id("p1")).await;
        q.add(id("p1")).await;
        assert!(q.is_empty().await, "must not queue while in flight");

        q.done(&got).await;
        assert_eq!(q.len().await, 1, "done re-queues exactly once");

        let again = q.get().await.unwrap();
        assert_eq!(again, id("p1"));
        q.done(&again).await;
        assert!(q.is_empty().await);
    }

    #[tokio::test]
    async fn test_different_identities_interleave() {
        let q = queue();
        q.add(id("p1")).await;
        q.add(id("p2")).await;
        assert_eq!(q.len().await, 2);

        let a = q.get().await.unwrap();
        let b = q.get().await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_get_suspends_until_add() {
        let q = queue();
        let q2 = Arc::clone(&q);

        let handle = tokio::spawn(async move { q2.get().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!handle.is_finished(), "get should suspend on empty queue");

        q.add(id("p1")).await;
        let got = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got, Some(id("p1")));
    }

    #[tokio::test]
    async fn test_rate_limited_readd_and_forget() {
        let q = queue();

        q.add_rate_limited(id("p1")).await;
        assert_eq!(q.num_requeues(&id("p1")).await, 1);
        q.add_rate_limited(id("p1")).await;
        assert_eq!(q.num_requeues(&id("p1")).await, 2);

        // The delayed add eventually lands.
        let got = tokio::time::timeout(Duration::from_secs(1), q.get())
            .await
            .unwrap();
        assert_eq!(got, Some(id("p1")));

        q.forget(&id("p1")).await;
        assert_eq!(q.num_requeues(&id("p1")).await, 0);
    }

    #[tokio::test]
    async fn test_shutdown_wakes_waiters() {
        let q = queue();
        let mut handles = Vec::new();
        for _ in 0..3 {
            let q2 = Arc::clone(&q);
            handles.push(tokio::spawn(async move { q2.get().await }));
        }
        tokio::time::sleep(Duration::from_millis(20)).await;

        q.shutdown().await;
        for handle in handles {
            let got = tokio::time::timeout(Duration::from_secs(1), handle)
                .await
                .unwrap()
                .unwrap();
            assert_eq!(got, None);
        }
    }

    #[tokio::test]
    async fn test_shutdown_drains_ready_work() {
        let q = queue();
        q.add(id("p1")).await;
        q.shutdown().await;

        // Ready work is still handed out before the queue reports empty.
        assert_eq!(q.get().await, Some(id("p1")));
        assert_eq!(q.get().await, None);
    }

    #[tokio::test]
    async fn test_add_after_shutdown_is_dropped() {
        let q = queue();
        q.shutdown().await;
        q.add(id("p1")).await;
        assert_eq!(q.get().await, None);
    }
}
