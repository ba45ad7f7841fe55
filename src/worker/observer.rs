// SPDX-License-Identifier: GPL-3.0-only

//! Hooks into the worker lifecycle

use super::executor::panic_message;
use super::state::StateKind;
use std::panic::{self, AssertUnwindSafe};
use tracing::warn;

/// Sequential id of an execution context, starting at 1
pub type ContextId = u64;

/// Receives lifecycle events from a [`CameraThread`](super::CameraThread).
///
/// `on_transition` is called while the coordinator lock is held, so the
/// reported sequence is totally ordered. The thread callbacks run on the
/// worker thread itself: `on_context_started` before the first task, and
/// `on_context_stopped` as the last thing the thread does.
///
/// A panicking callback is logged and otherwise ignored, except in
/// `on_context_started`, where it fails the thread's startup.
///
/// Implementations must not call back into the coordinator.
pub trait LifecycleObserver: Send + Sync {
    fn on_transition(&self, _from: StateKind, _to: StateKind) {}

    fn on_context_started(&self, _id: ContextId) {}

    fn on_context_stopped(&self, _id: ContextId) {}
}

/// Observer that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl LifecycleObserver for NoopObserver {}

/// Run one observer callback, containing a panic. Returns false if it panicked.
pub(crate) fn notify<F: FnOnce()>(hook: &'static str, callback: F) -> bool {
    match panic::catch_unwind(AssertUnwindSafe(callback)) {
        Ok(()) => true,
        Err(payload) => {
            warn!(
                hook,
                panic = panic_message(payload.as_ref()),
                "Lifecycle observer panicked"
            );
            false
        }
    }
}
