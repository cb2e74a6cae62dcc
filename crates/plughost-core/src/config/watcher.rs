//! File watcher configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Settings for the file-change watcher loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherConfig {
    /// Pause after a backend error before reading the next event.
    #[serde(default = "default_error_backoff_ms")]
    pub error_backoff_ms: u64,
}

impl WatcherConfig {
    /// Returns the error backoff as a [`Duration`].
    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            error_backoff_ms: default_error_backoff_ms(),
        }
    }
}

fn default_error_backoff_ms() -> u64 {
    250
}
