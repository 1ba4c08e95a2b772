//! Configuration for the replicator.
//!
//! Configuration is passed to
//! [`Controller::new()`](crate::controller::Controller::new) and can be
//! constructed programmatically or deserialized from YAML/JSON.
//!
//! # Quick Start
//!
//! ```rust
//! use policy_replicator::config::ReplicatorConfig;
//!
//! let config = ReplicatorConfig {
//!     controller_id: "replicator-1".into(),
//!     kind: "ClusterwideNetworkPolicy".into(),
//!     ..Default::default()
//! };
//! ```
//!
//! # Configuration Structure
//!
//! ```text
//! ReplicatorConfig
//! ├── controller_id: String         # Ownership-marker value on replicas
//! ├── kind: String                  # Watched resource kind
//! └── settings: ReplicatorSettings
//!     ├── worker: WorkerConfig      # Pool size, dispatch rate limit
//!     ├── watch: WatchConfig        # Resync interval, resubscribe backoff
//!     ├── reconcile: ReconcileConfig # Conflict budget, per-attempt timeout
//!     └── requeue: RequeueConfig    # Exponential backoff for retries
//! ```

use crate::resilience::{RateLimitConfig, RetryConfig};
use serde::{Deserialize, Serialize};
use std::time::Duration;

// ═══════════════════════════════════════════════════════════════════════════════
// Top-level config: passed from the bootstrap layer to Controller::new()
// ═══════════════════════════════════════════════════════════════════════════════

/// The top-level config object passed to `Controller::new()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicatorConfig {
    /// Identity of this controller instance.
    ///
    /// Written into the managed-by label on every replica it creates, so
    /// replicated objects can be told apart from independently-created ones.
    pub controller_id: String,

    /// The resource kind being replicated.
    #[serde(default = "default_kind")]
    pub kind: String,

    /// Tunable parameters for workers, watching, and retries.
    #[serde(default)]
    pub settings: ReplicatorSettings,
}

fn default_kind() -> String {
    "ClusterwideNetworkPolicy".to_string()
}

impl Default for ReplicatorConfig {
    fn default() -> Self {
        Self {
            controller_id: "policy-replicator".to_string(),
            kind: default_kind(),
            settings: ReplicatorSettings::default(),
        }
    }
}

impl ReplicatorConfig {
    /// Create a config tuned for fast tests: single-digit millisecond
    /// backoffs, short resync interval, no dispatch rate limit.
    pub fn for_testing(controller_id: &str) -> Self {
        Self {
            controller_id: controller_id.to_string(),
            kind: default_kind(),
            settings: ReplicatorSettings {
                worker: WorkerConfig {
                    count: 2,
                    rate_limit_enabled: false,
                    ..WorkerConfig::default()
                },
                watch: WatchConfig {
                    resync_interval_sec: 1,
                    ..WatchConfig::default()
                },
                reconcile: ReconcileConfig {
                    timeout_ms: 1_000,
                    ..ReconcileConfig::default()
                },
                requeue: RequeueConfig {
                    initial_backoff_ms: 1,
                    max_backoff_ms: 20,
                    backoff_factor: 2.0,
                },
            },
        }
    }
}

/// General settings for the replication logic.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReplicatorSettings {
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub watch: WatchConfig,
    #[serde(default)]
    pub reconcile: ReconcileConfig,
    #[serde(default)]
    pub requeue: RequeueConfig,
}

// ═══════════════════════════════════════════════════════════════════════════════
// WorkerConfig: reconcile worker pool
// ═══════════════════════════════════════════════════════════════════════════════

/// Worker pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Number of concurrent reconcile workers.
    ///
    /// Bounds reconciliation concurrency. Reconciles for different
    /// identities run in parallel; the work queue guarantees the same
    /// identity is never reconciled by two workers at once.
    #[serde(default = "default_worker_count")]
    pub count: usize,

    /// Whether the overall dispatch rate limit is applied.
    #[serde(default = "default_true")]
    pub rate_limit_enabled: bool,

    /// Sustained reconciles per second across all workers.
    #[serde(default = "default_rate_limit_per_sec")]
    pub rate_limit_per_sec: u32,

    /// Burst capacity for the dispatch rate limit.
    #[serde(default = "default_rate_limit_burst")]
    pub rate_limit_burst: u32,
}

fn default_worker_count() -> usize {
    4
}

fn default_rate_limit_per_sec() -> u32 {
    100
}

fn default_rate_limit_burst() -> u32 {
    20
}

fn default_true() -> bool {
    true
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            count: 4,
            rate_limit_enabled: true,
            rate_limit_per_sec: 100,
            rate_limit_burst: 20,
        }
    }
}

impl WorkerConfig {
    /// Build the dispatch rate limit config, if enabled.
    pub fn rate_limit_config(&self) -> Option<RateLimitConfig> {
        if !self.rate_limit_enabled {
            return None;
        }
        Some(RateLimitConfig {
            burst_size: self.rate_limit_burst,
            refill_rate: self.rate_limit_per_sec,
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// WatchConfig: change source behavior
// ═══════════════════════════════════════════════════════════════════════════════

/// Change source configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Interval between periodic full resyncs (seconds).
    ///
    /// Resync enqueues every existing source object, healing notifications
    /// missed while a subscription was down. `0` disables the timer
    /// (resync-on-reconnect still runs).
    #[serde(default = "default_resync_interval_sec")]
    pub resync_interval_sec: u64,

    /// Initial backoff before resubscribing after a dropped watch (millis).
    #[serde(default = "default_resubscribe_backoff_ms")]
    pub resubscribe_backoff_ms: u64,

    /// Backoff ceiling for resubscription (millis).
    #[serde(default = "default_resubscribe_max_backoff_ms")]
    pub resubscribe_max_backoff_ms: u64,
}

fn default_resync_interval_sec() -> u64 {
    300 // 5 minutes
}

fn default_resubscribe_backoff_ms() -> u64 {
    500
}

fn default_resubscribe_max_backoff_ms() -> u64 {
    30_000
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            resync_interval_sec: 300,
            resubscribe_backoff_ms: 500,
            resubscribe_max_backoff_ms: 30_000,
        }
    }
}

impl WatchConfig {
    /// Resync interval as a `Duration`, `None` when disabled.
    pub fn resync_interval(&self) -> Option<Duration> {
        if self.resync_interval_sec == 0 {
            None
        } else {
            Some(Duration::from_secs(self.resync_interval_sec))
        }
    }

    /// Backoff schedule for resubscription.
    pub fn resubscribe_retry(&self) -> RetryConfig {
        RetryConfig {
            initial_delay: Duration::from_millis(self.resubscribe_backoff_ms),
            max_delay: Duration::from_millis(self.resubscribe_max_backoff_ms),
            backoff_factor: 2.0,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ReconcileConfig: per-reconcile behavior
// ═══════════════════════════════════════════════════════════════════════════════

/// Per-reconcile configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileConfig {
    /// Immediate in-reconcile retries on a destination version conflict
    /// before the failure surfaces as retryable.
    #[serde(default = "default_conflict_retries")]
    pub conflict_retries: u32,

    /// Deadline for one reconcile attempt (millis). Exceeding it is a
    /// retryable failure, not a fatal one.
    #[serde(default = "default_reconcile_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_conflict_retries() -> u32 {
    3
}

fn default_reconcile_timeout_ms() -> u64 {
    30_000
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            conflict_retries: 3,
            timeout_ms: 30_000,
        }
    }
}

impl ReconcileConfig {
    /// Per-attempt deadline as a `Duration`.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// RequeueConfig: work queue backoff
// ═══════════════════════════════════════════════════════════════════════════════

/// Backoff configuration for failed-reconcile requeues.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequeueConfig {
    /// Delay before the first retry (millis).
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Backoff ceiling (millis).
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Multiplier applied per consecutive failure.
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
}

fn default_initial_backoff_ms() -> u64 {
    100
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

fn default_backoff_factor() -> f64 {
    2.0
}

impl Default for RequeueConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 100,
            max_backoff_ms: 30_000,
            backoff_factor: 2.0,
        }
    }
}

impl RequeueConfig {
    /// Convert into the backoff schedule used by the work queue.
    pub fn retry(&self) -> RetryConfig {
        RetryConfig {
            initial_delay: Duration::from_millis(self.initial_backoff_ms),
            max_delay: Duration::from_millis(self.max_backoff_ms),
            backoff_factor: self.backoff_factor,
        }
    }
}
