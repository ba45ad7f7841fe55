// SPDX-License-Identifier: GPL-3.0-only

//! Camera session ownership
//!
//! A [`CameraSession`] is one owner of the camera thread. Opening it takes a
//! reference, closing or dropping it gives the reference back exactly once.

use crate::errors::WorkerResult;
use crate::worker::CameraThread;
use futures::channel::oneshot;
use tracing::{debug, warn};
use uuid::Uuid;

pub struct CameraSession {
    id: Uuid,
    camera: CameraThread,
    /// Cleared once the reference has been given back
    open: bool,
}

impl CameraSession {
    /// Become an owner of `camera` and run `task` on its thread.
    ///
    /// This is where a session would open the device.
    pub fn open<F>(camera: &CameraThread, task: F) -> WorkerResult<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        let id = Uuid::new_v4();
        camera.acquire_and_enqueue(task)?;
        debug!(session = %id, "Camera session opened");

        Ok(Self {
            id,
            camera: camera.clone(),
            open: true,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Queue `task` on the camera thread
    pub fn submit<F>(&self, task: F) -> WorkerResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.camera.enqueue(task)
    }

    /// Run `f` on the camera thread and receive its result.
    ///
    /// The receiver reports `Canceled` if `f` panics.
    pub fn call<F, R>(&self, f: F) -> WorkerResult<oneshot::Receiver<R>>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.camera.enqueue(move || {
            // Receiver may already be gone; the result is then unused
            let _ = tx.send(f());
        })?;
        Ok(rx)
    }

    /// Give the reference back
    pub fn close(mut self) -> WorkerResult<()> {
        self.open = false;
        debug!(session = %self.id, "Camera session closed");
        self.camera.release()
    }

    /// Queue `task` (typically closing the device) and give the reference
    /// back. The task runs before the thread can shut down.
    pub fn close_with<F>(mut self, task: F) -> WorkerResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.open = false;
        let queued = self.camera.enqueue(task);
        let released = self.camera.release();
        debug!(session = %self.id, "Camera session closed");
        queued.and(released)
    }
}

impl Drop for CameraSession {
    fn drop(&mut self) {
        if self.open
            && let Err(e) = self.camera.release()
        {
            warn!(session = %self.id, error = %e, "Failed to release camera session on drop");
        }
    }
}

impl std::fmt::Debug for CameraSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CameraSession")
            .field("id", &self.id)
            .field("open", &self.open)
            .finish()
    }
}
