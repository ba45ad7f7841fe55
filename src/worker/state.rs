// SPDX-License-Identifier: GPL-3.0-only

//! Coordinator state machine
//!
//! ```text
//!   Idle ──► Starting ──► Running ──► Stopping ──► Idle
//!    ▲          │            ▲           │
//!    └──────────┘            └───────────┘
//!   spawn failed              re-acquired before teardown
//! ```

use super::executor::ExecutionContext;
use std::fmt;

/// Coordinator state. Only `Idle` and `Running` are stable.
#[derive(Debug)]
pub(crate) enum ContextState {
    /// No owners, no worker thread
    Idle,
    /// Worker thread is being spawned
    Starting,
    /// Worker thread serving at least one owner
    Running(ExecutionContext),
    /// Last owner released; the teardown marker is queued on the worker
    Stopping(ExecutionContext),
}

impl ContextState {
    pub(crate) fn kind(&self) -> StateKind {
        match self {
            ContextState::Idle => StateKind::Idle,
            ContextState::Starting => StateKind::Starting,
            ContextState::Running(_) => StateKind::Running,
            ContextState::Stopping(_) => StateKind::Stopping,
        }
    }

    pub(crate) fn context(&self) -> Option<&ExecutionContext> {
        match self {
            ContextState::Running(ctx) | ContextState::Stopping(ctx) => Some(ctx),
            ContextState::Idle | ContextState::Starting => None,
        }
    }
}

/// Payload-free view of [`ContextState`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateKind {
    Idle,
    Starting,
    Running,
    Stopping,
}

impl StateKind {
    /// Whether the state machine allows moving from `self` to `next`
    pub fn can_transition_to(self, next: StateKind) -> bool {
        matches!(
            (self, next),
            (StateKind::Idle, StateKind::Starting)
                | (StateKind::Starting, StateKind::Running)
                | (StateKind::Starting, StateKind::Idle)
                | (StateKind::Running, StateKind::Stopping)
                | (StateKind::Stopping, StateKind::Running)
                | (StateKind::Stopping, StateKind::Idle)
        )
    }

    /// Stable states are the only ones observable outside the lock
    pub fn is_stable(self) -> bool {
        matches!(self, StateKind::Idle | StateKind::Running)
    }
}

impl fmt::Display for StateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StateKind::Idle => "idle",
            StateKind::Starting => "starting",
            StateKind::Running => "running",
            StateKind::Stopping => "stopping",
        };
        write!(f, "{}", name)
    }
}
