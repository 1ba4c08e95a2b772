// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Change source: feeds the work queue from the source cluster's watch.
//!
//! A single long-lived task subscribes to the source cluster and enqueues
//! the identity of every observed mutation. Delivery from the cluster is
//! at-least-once; the work queue's coalescing makes duplicates harmless.
//!
//! # Healing Missed Notifications
//!
//! Notifications can be lost two ways: the subscription drops entirely, or
//! the receiver lags and the cluster discards buffered events. Both are
//! handled the same way, without restarting dependent components:
//!
//! 1. Resubscribe (with exponential backoff while the cluster is down).
//! 2. Full resync: list every existing source object and enqueue a
//!    synthetic change event for each.
//!
//! Deletions missed during an outage are healed by the periodic resync
//! timer, which re-lists on an interval regardless of subscription health.
//! Identities whose destination replica must go away are re-observed when
//! their next source-side event arrives or when an operator re-touches
//! them; the interval resync bounds the staleness window for everything
//! else.

use crate::cluster::ClusterHandle;
use crate::config::WatchConfig;
use crate::metrics;
use crate::queue::WorkQueue;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tracing::{debug, info, warn, Instrument};

/// Run the change source until shutdown is signaled.
///
/// Spawned by the controller as an independent task; it owns the
/// subscription lifecycle and only ever touches the queue.
pub async fn run_change_source<S: ClusterHandle>(
    source: Arc<S>,
    queue: Arc<WorkQueue>,
    config: WatchConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let span = tracing::info_span!("change_source");

    async move {
        info!("Starting change source");

        let retry = config.resubscribe_retry();
        let mut resubscribe_attempt: u32 = 0;

        let mut resync_timer = config.resync_interval().map(|interval| {
            // The post-subscribe resync covers startup, so the first timer
            // tick lands one full interval later.
            let mut timer =
                tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            timer
        });

        'subscribe: loop {
            if *shutdown_rx.borrow() {
                break;
            }

            let mut events = match source.watch().await {
                Ok(rx) => {
                    resubscribe_attempt = 0;
                    rx
                }
                Err(e) => {
                    resubscribe_attempt = resubscribe_attempt.saturating_add(1);
                    let delay = retry.delay_for_attempt(resubscribe_attempt);
                    warn!(
                        error = %e,
                        attempt = resubscribe_attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Watch subscription failed, backing off"
                    );
                    tokio::select! {
                        _ = shutdown_rx.changed() => {
                            if *shutdown_rx.borrow() { break; }
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                    continue;
                }
            };

            // Heal anything missed while we were not subscribed.
            resync(&source, &queue).await;

            loop {
                // Consume the timer tick inside the select regardless of
                // whether the timer exists.
                tokio::select! {
                    biased;

                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break 'subscribe;
                        }
                    }

                    event = events.recv() => match event {
                        Ok(id) => {
                            debug!(id = %id, "Change observed");
                            metrics::record_watch_events(1);
                            queue.add(id).await;
                        }
                        Err(RecvError::Lagged(missed)) => {
                            warn!(missed, "Watch lagged, resyncing");
                            metrics::record_resubscribe();
                            resync(&source, &queue).await;
                        }
                        Err(RecvError::Closed) => {
                            warn!("Watch subscription closed, resubscribing");
                            metrics::record_resubscribe();
                            continue 'subscribe;
                        }
                    },

                    _ = tick(&mut resync_timer) => {
                        debug!("Periodic resync");
                        resync(&source, &queue).await;
                    }
                }
            }
        }

        info!("Change source stopped");
    }
    .instrument(span)
    .await
}

/// Await the next resync tick, or pend forever when the timer is disabled.
async fn tick(timer: &mut Option<tokio::time::Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Enqueue a synthetic change event for every existing source object.
async fn resync<S: ClusterHandle>(source: &Arc<S>, queue: &Arc<WorkQueue>) {
    match source.list().await {
        Ok(objects) => {
            let count = objects.len();
            for obj in objects {
                queue.add(obj.id).await;
            }
            metrics::record_resync(count);
            info!(objects = count, "Resync complete");
        }
        Err(e) => {
            // The next interval tick or reconnect retries; nothing to do now.
            warn!(error = %e, "Resync list failed");
        }
    }
}
