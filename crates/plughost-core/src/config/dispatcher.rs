//! Message dispatcher configuration.

use serde::{Deserialize, Serialize};

/// Settings for the manager's single dispatcher worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Capacity of the bounded message queue. Producers wait while it is full.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
        }
    }
}

fn default_queue_capacity() -> usize {
    128
}
