//! Controller state types.
//!
//! Defines the state machine for the controller lifecycle.
//!
//! # State Transitions
//!
//! ```text
//!              start()
//! Created ────────────────→ Running
//!    │                         │
//!    │ (already stopped)       │ shutdown()
//!    ↓                         ↓
//! Stopped ←───────────── ShuttingDown
//! ```
//!
//! # State Descriptions
//!
//! - **Created**: Initial state after `Controller::new()`. No tasks spawned.
//! - **Running**: Change source subscribed, workers pulling from the queue.
//! - **ShuttingDown**: `shutdown()` called. Queue draining, workers finishing
//!   their in-flight reconciles.
//! - **Stopped**: Graceful shutdown complete. Safe to drop.
//!
//! There is no failure state: cluster errors are handled per identity
//! (retried or reported via [`HealthCheck::terminal_failures`]) and never
//! stop the controller. Only the shutdown signal does.

use crate::resource::ObjectRef;
use std::collections::BTreeMap;

/// State of the controller.
///
/// See module docs for the state transition diagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    /// Controller created but not started.
    ///
    /// Call [`start()`](super::Controller::start) to begin replicating.
    Created,

    /// Running and replicating.
    ///
    /// The change source is subscribed to the source cluster and the worker
    /// pool is reconciling queued identities.
    Running,

    /// Shutting down gracefully.
    ///
    /// No new change events are accepted; in-flight reconciles run to
    /// completion. Transitions to `Stopped` when all tasks have exited.
    ShuttingDown,

    /// Stopped.
    ///
    /// Controller has shut down cleanly. Safe to drop.
    Stopped,
}

impl std::fmt::Display for ControllerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ControllerState::Created => write!(f, "Created"),
            ControllerState::Running => write!(f, "Running"),
            ControllerState::ShuttingDown => write!(f, "ShuttingDown"),
            ControllerState::Stopped => write!(f, "Stopped"),
        }
    }
}

/// Snapshot of controller health for monitoring endpoints.
///
/// Collected from cached internal state; no cluster I/O is performed.
#[derive(Debug, Clone)]
pub struct HealthCheck {
    /// Current lifecycle state.
    pub state: ControllerState,

    /// True when the controller is running.
    pub ready: bool,

    /// Identities ready for pickup (excludes in-flight reconciles).
    pub queue_depth: usize,

    /// Configured worker pool size.
    pub workers: usize,

    /// Identities whose last reconcile failed terminally, with the failure
    /// reason. Cleared per identity on the next successful reconcile.
    pub terminal_failures: BTreeMap<ObjectRef, String>,

    /// True when running with no outstanding terminal failures.
    pub healthy: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_controller_state_display() {
        assert_eq!(ControllerState::Created.to_string(), "Created");
        assert_eq!(ControllerState::Running.to_string(), "Running");
        assert_eq!(ControllerState::ShuttingDown.to_string(), "ShuttingDown");
        assert_eq!(ControllerState::Stopped.to_string(), "Stopped");
    }

    #[test]
    fn test_controller_state_equality() {
        assert_eq!(ControllerState::Created, ControllerState::Created);
        assert_ne!(ControllerState::Created, ControllerState::Running);
    }

    #[test]
    fn test_controller_state_copy() {
        let state = ControllerState::Running;
        let copied: ControllerState = state;
        assert_eq!(state, copied);
    }
}
