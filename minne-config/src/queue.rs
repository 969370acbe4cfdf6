//! Bounded queue sizing.

use serde::{Deserialize, Serialize};
use validator::{self, Validate};

#[derive(Debug, Serialize, Deserialize, Validate, Clone)]
pub struct QueueConfig {
    /// Items the queue holds before producers must drain it.
    #[serde(default = "default_capacity")]
    #[validate(range(min = 1, max = 1048576))]
    pub capacity: usize,
}

fn default_capacity() -> usize {
    1024
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
        }
    }
}
