// SPDX-License-Identifier: GPL-3.0-only

//! Execution context: one named thread draining a FIFO task queue
//!
//! The context knows nothing about ownership. It runs [`Message::Run`] tasks
//! one at a time and hands every [`Message::Teardown`] marker to a callback,
//! which decides whether the loop keeps going.

use super::observer::{self, ContextId, LifecycleObserver};
use crate::config::Config;
use crate::errors::{WorkerError, WorkerResult};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

/// A unit of work for the camera thread
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Queue entries understood by the worker loop
pub(crate) enum Message {
    Run(Task),
    /// Posted behind all pending tasks when the last owner releases.
    /// Carries the acquire epoch it was issued in.
    Teardown { epoch: u64 },
}

impl std::fmt::Debug for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Message::Run(_) => write!(f, "Run"),
            Message::Teardown { epoch } => write!(f, "Teardown({})", epoch),
        }
    }
}

/// Returned by the teardown callback to control the loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopAction {
    /// Keep draining the queue
    Continue,
    /// Exit the loop; the thread finishes
    Stop,
}

/// Handle to a running worker thread
#[derive(Debug)]
pub(crate) struct ExecutionContext {
    id: ContextId,
    name: String,
    sender: Sender<Message>,
    thread: JoinHandle<()>,
}

impl ExecutionContext {
    /// Spawn the worker thread and wait until its loop is about to start.
    ///
    /// Messages posted before the loop runs wait in the channel. A panic in
    /// `on_context_started` counts as a failed start.
    pub(crate) fn spawn<T>(
        id: ContextId,
        config: &Config,
        observer: Arc<dyn LifecycleObserver>,
        mut on_teardown: T,
    ) -> WorkerResult<Self>
    where
        T: FnMut(u64) -> LoopAction + Send + 'static,
    {
        let (sender, receiver) = mpsc::channel::<Message>();
        let (ready_tx, ready_rx) = mpsc::sync_channel::<()>(1);
        let name = config.thread_name.clone();

        let mut builder = thread::Builder::new().name(name.clone());
        if let Some(size) = config.stack_size {
            builder = builder.stack_size(size);
        }

        info!(context = id, thread = %name, "Opening camera thread");

        let thread = builder
            .spawn(move || {
                // Dropping ready_tx unanswered reports a failed start
                if !observer::notify("on_context_started", || observer.on_context_started(id)) {
                    return;
                }
                if ready_tx.send(()).is_ok() {
                    run_loop(id, &receiver, &mut on_teardown);
                }
                observer::notify("on_context_stopped", || observer.on_context_stopped(id));
            })
            .map_err(|e| {
                WorkerError::ResourceUnavailable(format!("Spawn thread '{}': {}", name, e))
            })?;

        if ready_rx.recv().is_err() {
            let _ = thread.join();
            return Err(WorkerError::ResourceUnavailable(format!(
                "Thread '{}' died during startup",
                name
            )));
        }

        Ok(Self {
            id,
            name,
            sender,
            thread,
        })
    }

    pub(crate) fn id(&self) -> ContextId {
        self.id
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    /// Append a message to the queue. Hands the message back if the thread
    /// has exited.
    pub(crate) fn post(&self, message: Message) -> Result<(), Message> {
        self.sender.send(message).map_err(|e| e.0)
    }

    #[cfg(test)]
    pub(crate) fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Give up the queue, keeping only the thread handle for joining
    pub(crate) fn into_thread(self) -> JoinHandle<()> {
        self.thread
    }
}

fn run_loop<T>(id: ContextId, receiver: &Receiver<Message>, on_teardown: &mut T)
where
    T: FnMut(u64) -> LoopAction,
{
    debug!(context = id, "Camera thread loop started");
    let mut executed: u64 = 0;
    let mut failed: u64 = 0;

    // Ends on Stop, or when every sender is gone
    for message in receiver.iter() {
        let action = match message {
            Message::Run(task) => {
                if !run_task(id, task) {
                    failed += 1;
                }
                executed += 1;
                LoopAction::Continue
            }
            // A panicking callback must not take the thread down with it
            Message::Teardown { epoch } => {
                match panic::catch_unwind(AssertUnwindSafe(|| on_teardown(epoch))) {
                    Ok(action) => action,
                    Err(payload) => {
                        warn!(
                            context = id,
                            epoch,
                            panic = panic_message(payload.as_ref()),
                            "Teardown callback panicked"
                        );
                        LoopAction::Continue
                    }
                }
            }
        };

        if action == LoopAction::Stop {
            break;
        }
    }

    info!(
        context = id,
        tasks = executed,
        failed,
        "Camera thread exiting"
    );
}

/// Run one task. A panic is logged and contained; returns false if it panicked.
fn run_task(id: ContextId, task: Task) -> bool {
    match panic::catch_unwind(AssertUnwindSafe(task)) {
        Ok(()) => true,
        Err(payload) => {
            warn!(
                context = id,
                panic = panic_message(payload.as_ref()),
                "Camera task panicked"
            );
            false
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "non-string panic payload"
    }
}
