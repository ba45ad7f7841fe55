// SPDX-License-Identifier: GPL-3.0-only

//! Error types for the camera worker

use std::fmt;

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;

/// Result type alias for coordinator operations
pub type WorkerResult<T> = Result<T, WorkerError>;

/// Main application error type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    /// Worker coordination errors
    Worker(WorkerError),
    /// Configuration errors
    Config(String),
    /// Filesystem errors
    Io(String),
    /// Generic error with message
    Other(String),
}

/// Errors reported by the camera worker coordinator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerError {
    /// The caller broke the ownership contract (enqueue without an owner,
    /// release without a matching acquire) or an illegal state transition
    /// was attempted.
    InvalidState(String),
    /// The background execution context could not be created or is gone
    ResourceUnavailable(String),
}

impl WorkerError {
    /// True for contract violations that indicate a caller bug
    pub fn is_invalid_state(&self) -> bool {
        matches!(self, WorkerError::InvalidState(_))
    }

    /// True when the worker thread could not be provided
    pub fn is_resource_unavailable(&self) -> bool {
        matches!(self, WorkerError::ResourceUnavailable(_))
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Worker(e) => write!(f, "Worker error: {}", e),
            AppError::Config(msg) => write!(f, "Configuration error: {}", msg),
            AppError::Io(msg) => write!(f, "I/O error: {}", msg),
            AppError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl fmt::Display for WorkerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerError::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
            WorkerError::ResourceUnavailable(msg) => write!(f, "Resource unavailable: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}
impl std::error::Error for WorkerError {}

impl From<WorkerError> for AppError {
    fn from(err: WorkerError) -> Self {
        AppError::Worker(err)
    }
}

impl From<String> for AppError {
    fn from(msg: String) -> Self {
        AppError::Other(msg)
    }
}

impl From<&str> for AppError {
    fn from(msg: &str) -> Self {
        AppError::Other(msg.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Config(err.to_string())
    }
}
