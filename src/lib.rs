// SPDX-License-Identifier: GPL-3.0-only

//! Camera worker - an on-demand camera thread shared by camera sessions
//!
//! Camera hardware must only be touched from one thread. This crate owns that
//! thread: it is opened when the first session needs the camera, runs every
//! submitted task in order, and closes itself once the last session is done.
//!
//! # Architecture
//!
//! - [`worker`]: the reference-counted thread coordinator and its state machine
//! - [`session`]: owner handles that acquire and release the thread
//! - [`config`]: user configuration handling
//! - [`errors`]: error types
//!
//! # Example
//!
//! ```no_run
//! use camera_worker::{CameraSession, CameraThread, Config};
//!
//! let camera = CameraThread::new(Config::default());
//! let session = CameraSession::open(&camera, || { /* open the device */ })?;
//! session.submit(|| { /* grab a frame */ })?;
//! session.close_with(|| { /* close the device */ })?;
//! # Ok::<(), camera_worker::WorkerError>(())
//! ```

pub mod config;
pub mod constants;
pub mod errors;
pub mod session;
pub mod worker;

// Re-export commonly used types
pub use config::Config;
pub use errors::{AppError, AppResult, WorkerError, WorkerResult};
pub use session::CameraSession;
pub use worker::{CameraThread, CoordinatorStatus, LifecycleObserver, StateKind};
