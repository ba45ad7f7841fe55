// SPDX-License-Identifier: GPL-3.0-only

//! On-demand camera worker thread
//!
//! Every camera operation runs on one dedicated thread. The thread is opened
//! when the first owner acquires it and closes itself after the last owner
//! releases it.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐           ┌───────────────────────┐
//! │  CameraThread        │           │   Execution context   │
//! │  (any thread)        │           │   (worker thread)     │
//! │                      │  Run      │                       │
//! │  acquire_and_enqueue ├──────────►│  task, task, ...      │
//! │  enqueue             ├──────────►│                       │
//! │  release ────────────┼─Teardown─►│  takes the lock,      │
//! │                      │           │  clears the context,  │
//! │  owners, epoch,      │◄──────────┤  stops its own loop   │
//! │  state (one Mutex)   │           │                       │
//! └──────────────────────┘           └───────────────────────┘
//! ```
//!
//! All state transitions happen under one mutex, on both sides. A release
//! that drops the owner count to zero does not stop the thread; it queues a
//! teardown marker behind all pending work. When the worker reaches the
//! marker it re-checks the owner count and the acquire epoch under the same
//! lock, so an acquire that raced in between keeps the thread alive.
//!
//! A worker whose queue is found closed is taken out of the state machine
//! through `Stopping -> Idle` and a fresh one is opened for the next task.

pub mod executor;
pub mod observer;
pub mod state;

pub use executor::{LoopAction, Task};
pub use observer::{ContextId, LifecycleObserver, NoopObserver};
pub use state::StateKind;

use crate::config::Config;
use crate::errors::{WorkerError, WorkerResult};
use executor::{ExecutionContext, Message};
use state::ContextState;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock, Weak};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Snapshot of the coordinator, taken under its lock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorStatus {
    /// Owners currently holding a reference
    pub owners: usize,
    /// Current state
    pub state: StateKind,
    /// Id of the live execution context, if any
    pub context: Option<ContextId>,
    /// Number of execution contexts created so far
    pub contexts_started: u64,
}

struct Inner {
    owners: usize,
    /// Bumped by every acquire; a teardown marker from an older epoch is stale
    epoch: u64,
    state: ContextState,
    /// Thread of the last context that shut itself down, joined before the
    /// next one is spawned
    retired: Option<JoinHandle<()>>,
    contexts_started: u64,
    #[cfg(test)]
    fail_next_spawn: bool,
}

struct Shared {
    inner: Mutex<Inner>,
    /// Signalled when the coordinator returns to Idle
    idle: Condvar,
    config: Config,
    observer: Arc<dyn LifecycleObserver>,
}

/// Reference-counted owner of the camera worker thread
///
/// Cloning is cheap and every clone refers to the same coordinator.
#[derive(Clone)]
pub struct CameraThread {
    shared: Arc<Shared>,
}

impl CameraThread {
    /// Create a coordinator. No thread is started until the first acquire.
    pub fn new(config: Config) -> Self {
        Self::with_observer(config, Arc::new(NoopObserver))
    }

    /// Create a coordinator that reports lifecycle events to `observer`
    pub fn with_observer(config: Config, observer: Arc<dyn LifecycleObserver>) -> Self {
        debug!(thread = %config.thread_name, "Creating camera thread coordinator");

        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    owners: 0,
                    epoch: 0,
                    state: ContextState::Idle,
                    retired: None,
                    contexts_started: 0,
                    #[cfg(test)]
                    fail_next_spawn: false,
                }),
                idle: Condvar::new(),
                config,
                observer,
            }),
        }
    }

    /// The process-wide coordinator, created on first use from the config
    /// file (defaults if it cannot be read).
    pub fn global() -> &'static CameraThread {
        static GLOBAL: OnceLock<CameraThread> = OnceLock::new();
        GLOBAL.get_or_init(|| {
            let config = Config::load().unwrap_or_else(|e| {
                warn!(error = %e, "Falling back to default camera thread config");
                Config::default()
            });
            CameraThread::new(config)
        })
    }

    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    /// Take a new owner reference and queue `task`.
    ///
    /// Opens the worker thread if none is running. A thread that is
    /// stopping but has not yet processed its teardown is kept alive instead.
    /// A thread that has died is replaced. If no thread can be created the
    /// owner count is left unchanged and [`WorkerError::ResourceUnavailable`]
    /// is returned.
    pub fn acquire_and_enqueue<F>(&self, task: F) -> WorkerResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut inner = self.shared.lock();
        inner.owners += 1;
        inner.epoch += 1;

        let opened = match inner.state.kind() {
            StateKind::Running => Ok(()),
            StateKind::Stopping => self
                .shared
                .move_context(&mut inner, StateKind::Running)
                .map(|id| {
                    debug!(context = id, "Reviving stopping camera thread");
                }),
            StateKind::Idle => self.open_context(&mut inner),
            StateKind::Starting => Err(WorkerError::InvalidState(
                "camera thread observed in Starting outside the lock".to_string(),
            )),
        };

        let queued = opened.and_then(|()| self.deliver(&mut inner, Message::Run(Box::new(task))));
        if let Err(e) = queued {
            inner.owners -= 1;
            if inner.owners == 0 && inner.state.kind() == StateKind::Idle {
                self.shared.idle.notify_all();
            }
            error!(error = %e, owners = inner.owners, "Acquire failed");
            return Err(e);
        }

        debug!(owners = inner.owners, "Camera thread acquired");
        Ok(())
    }

    /// Queue `task` for an owner that already holds a reference.
    ///
    /// Fails with [`WorkerError::InvalidState`] when nobody owns the thread;
    /// the task is dropped without running.
    pub fn enqueue<F>(&self, task: F) -> WorkerResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut inner = self.shared.lock();
        if inner.owners == 0 {
            return Err(WorkerError::InvalidState(
                "enqueue() called while the camera thread has no owners".to_string(),
            ));
        }
        self.deliver(&mut inner, Message::Run(Box::new(task)))
    }

    /// Drop one owner reference.
    ///
    /// When the last reference goes, a teardown marker is queued behind all
    /// pending tasks and the worker closes itself when it gets there. Releasing
    /// more often than acquiring is [`WorkerError::InvalidState`].
    pub fn release(&self) -> WorkerResult<()> {
        let mut inner = self.shared.lock();
        if inner.owners == 0 {
            return Err(WorkerError::InvalidState(
                "release() without a matching acquire".to_string(),
            ));
        }

        inner.owners -= 1;
        if inner.owners > 0 {
            debug!(owners = inner.owners, "Camera thread released");
            return Ok(());
        }

        if inner.state.kind() == StateKind::Idle {
            // The thread died and could not be replaced
            debug!("Last owner released with no camera thread");
            self.shared.idle.notify_all();
            return Ok(());
        }

        let epoch = inner.epoch;
        let id = match self.shared.move_context(&mut inner, StateKind::Stopping) {
            Ok(id) => id,
            Err(e) => {
                inner.owners += 1;
                return Err(e);
            }
        };

        debug!(context = id, epoch, "Last owner released, queueing teardown");
        match post(&inner, Message::Teardown { epoch }) {
            Ok(()) => Ok(()),
            Err(PostError::Closed(_)) => {
                self.shared.discard_dead_context(&mut inner)?;
                self.shared.idle.notify_all();
                Ok(())
            }
            Err(PostError::NoContext(_)) => Err(no_context(&inner)),
        }
    }

    /// Current owners and state
    pub fn status(&self) -> CoordinatorStatus {
        let inner = self.shared.lock();
        CoordinatorStatus {
            owners: inner.owners,
            state: inner.state.kind(),
            context: inner.state.context().map(|ctx| ctx.id()),
            contexts_started: inner.contexts_started,
        }
    }

    /// Block until the coordinator is idle and its last thread has exited.
    ///
    /// Returns false on timeout. Must not be called from a camera task, since
    /// the worker could never reach its teardown marker.
    pub fn wait_until_idle(&self, timeout: Duration) -> bool {
        let inner = self.shared.lock();
        let (mut inner, result) = self
            .shared
            .idle
            .wait_timeout_while(inner, timeout, |inner| {
                inner.owners > 0 || inner.state.kind() != StateKind::Idle
            })
            .unwrap_or_else(|e| e.into_inner());

        if result.timed_out() {
            return false;
        }
        join_retired(&mut inner);
        true
    }

    /// Post `message` on behalf of a current owner, opening a new thread if
    /// there is none or the current one has exited.
    fn deliver(&self, inner: &mut Inner, message: Message) -> WorkerResult<()> {
        let message = match post(inner, message) {
            Ok(()) => return Ok(()),
            Err(PostError::Closed(message)) => {
                self.shared.discard_dead_context(inner)?;
                message
            }
            Err(PostError::NoContext(message)) => message,
        };

        self.open_context(inner)?;
        match post(inner, message) {
            Ok(()) => Ok(()),
            Err(PostError::Closed(_)) => {
                self.shared.discard_dead_context(inner)?;
                Err(WorkerError::ResourceUnavailable(
                    "camera thread exited before taking work".to_string(),
                ))
            }
            Err(PostError::NoContext(_)) => Err(no_context(inner)),
        }
    }

    fn open_context(&self, inner: &mut Inner) -> WorkerResult<()> {
        join_retired(inner);
        self.shared.replace_state(inner, ContextState::Starting)?;

        inner.contexts_started += 1;
        let id = inner.contexts_started;

        match self.spawn_context(inner, id) {
            Ok(ctx) => {
                self.shared.replace_state(inner, ContextState::Running(ctx))?;
                Ok(())
            }
            Err(e) => {
                inner.contexts_started -= 1;
                self.shared.replace_state(inner, ContextState::Idle)?;
                self.shared.idle.notify_all();
                Err(e)
            }
        }
    }

    fn spawn_context(&self, inner: &mut Inner, id: ContextId) -> WorkerResult<ExecutionContext> {
        #[cfg(test)]
        if std::mem::take(&mut inner.fail_next_spawn) {
            return Err(WorkerError::ResourceUnavailable(
                "injected spawn failure".to_string(),
            ));
        }
        #[cfg(not(test))]
        let _ = inner;

        // Weak so a dropped coordinator lets its thread exit
        let shared = Arc::downgrade(&self.shared);
        ExecutionContext::spawn(
            id,
            &self.shared.config,
            Arc::clone(&self.shared.observer),
            move |epoch| finish_teardown(&shared, id, epoch),
        )
    }

    #[cfg(test)]
    fn fail_next_spawn(&self) {
        self.shared.lock().fail_next_spawn = true;
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_transition(&self, from: StateKind, to: StateKind) -> WorkerResult<()> {
        if !from.can_transition_to(to) {
            error!(from = %from, to = %to, "Illegal camera thread transition");
            return Err(WorkerError::InvalidState(format!(
                "illegal camera thread transition {} -> {}",
                from, to
            )));
        }
        observer::notify("on_transition", || self.observer.on_transition(from, to));
        Ok(())
    }

    /// Install `next`, returning the previous state
    fn replace_state(&self, inner: &mut Inner, next: ContextState) -> WorkerResult<ContextState> {
        self.check_transition(inner.state.kind(), next.kind())?;
        Ok(std::mem::replace(&mut inner.state, next))
    }

    /// Take out a context whose thread has exited and return to Idle
    fn discard_dead_context(&self, inner: &mut Inner) -> WorkerResult<()> {
        if inner.state.kind() == StateKind::Running {
            self.move_context(inner, StateKind::Stopping)?;
        }

        match self.replace_state(inner, ContextState::Idle)? {
            ContextState::Stopping(ctx) => {
                warn!(context = ctx.id(), thread = %ctx.name(), "Camera thread exited unexpectedly");
                join_retired(inner);
                inner.retired = Some(ctx.into_thread());
                Ok(())
            }
            other => {
                inner.state = other;
                Err(no_context(inner))
            }
        }
    }

    /// Move the live context between Running and Stopping
    fn move_context(&self, inner: &mut Inner, to: StateKind) -> WorkerResult<ContextId> {
        let from = inner.state.kind();
        if !matches!(to, StateKind::Running | StateKind::Stopping) {
            return Err(WorkerError::InvalidState(format!(
                "cannot carry a context from {} to {}",
                from, to
            )));
        }
        self.check_transition(from, to)?;

        let (state, id) = match std::mem::replace(&mut inner.state, ContextState::Idle) {
            ContextState::Running(ctx) | ContextState::Stopping(ctx) => {
                let id = ctx.id();
                let state = if to == StateKind::Running {
                    ContextState::Running(ctx)
                } else {
                    ContextState::Stopping(ctx)
                };
                (state, id)
            }
            other => {
                inner.state = other;
                return Err(WorkerError::InvalidState(format!(
                    "no context to carry from {} to {}",
                    from, to
                )));
            }
        };
        inner.state = state;
        Ok(id)
    }
}

/// A message that could not be queued, handed back to the caller
enum PostError {
    NoContext(Message),
    /// The context's thread has exited
    Closed(Message),
}

fn post(inner: &Inner, message: Message) -> Result<(), PostError> {
    match inner.state.context() {
        Some(ctx) => ctx.post(message).map_err(PostError::Closed),
        None => Err(PostError::NoContext(message)),
    }
}

fn no_context(inner: &Inner) -> WorkerError {
    WorkerError::InvalidState(format!(
        "no camera thread to post to ({})",
        inner.state.kind()
    ))
}

fn join_retired(inner: &mut Inner) {
    if let Some(thread) = inner.retired.take()
        && let Err(e) = thread.join()
    {
        error!("Camera thread panicked: {:?}", e);
    }
}

/// Runs on the worker thread when it reaches a teardown marker
fn finish_teardown(shared: &Weak<Shared>, id: ContextId, epoch: u64) -> LoopAction {
    let Some(shared) = shared.upgrade() else {
        return LoopAction::Stop;
    };
    let mut inner = shared.lock();

    if inner.owners > 0 || inner.epoch != epoch {
        debug!(
            context = id,
            epoch,
            current_epoch = inner.epoch,
            owners = inner.owners,
            "Ignoring stale teardown"
        );
        return LoopAction::Continue;
    }

    if inner.state.context().map(|ctx| ctx.id()) != Some(id) {
        error!(context = id, state = %inner.state.kind(), "Teardown for a context that is not current");
        return LoopAction::Continue;
    }

    match shared.replace_state(&mut inner, ContextState::Idle) {
        Ok(ContextState::Stopping(ctx)) => {
            info!(context = id, thread = %ctx.name(), "Closing camera thread");
            inner.retired = Some(ctx.into_thread());
            shared.idle.notify_all();
            LoopAction::Stop
        }
        Ok(other) => {
            inner.state = other;
            error!(context = id, "Teardown from a state other than Stopping");
            LoopAction::Continue
        }
        Err(_) => LoopAction::Continue,
    }
}

impl std::fmt::Debug for CameraThread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = self.status();
        f.debug_struct("CameraThread")
            .field("thread_name", &self.shared.config.thread_name)
            .field("owners", &status.owners)
            .field("state", &status.state)
            .field("context", &status.context)
            .finish()
    }
}
