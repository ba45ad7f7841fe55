// SPDX-License-Identifier: GPL-3.0-only

//! Application-wide constants

/// Worker thread defaults
pub mod worker {
    /// Name given to the camera worker thread
    pub const DEFAULT_THREAD_NAME: &str = "CameraThread";
}

/// Logging defaults
pub mod logging {
    /// Filter used when neither RUST_LOG nor the config file set one
    pub const DEFAULT_LOG_FILTER: &str = "warn";
}

/// Configuration file location
pub mod paths {
    /// Directory below the platform config dir
    pub const APP_DIR_NAME: &str = "camera-worker";

    /// Configuration file name
    pub const CONFIG_FILE_NAME: &str = "config.json";
}

/// Timing used by the command-line simulation
pub mod timing {
    use std::time::Duration;

    /// How long `simulate` waits for the worker to shut itself down
    pub const TEARDOWN_WAIT: Duration = Duration::from_secs(5);
}

/// Application information utilities
pub mod app_info {
    /// Get the application version from build-time environment
    pub fn version() -> &'static str {
        env!("GIT_VERSION")
    }
}
