use serde::{Deserialize, Serialize};

/// Per-owner request queue configuration.
///
/// Requests for one owner are released in FIFO batches of at most
/// `max_concurrent_per_owner`; the next batch starts only after the
/// previous one has fully settled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "d_max_concurrent")]
    pub max_concurrent_per_owner: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent_per_owner: d_max_concurrent(),
        }
    }
}

fn d_max_concurrent() -> usize {
    3
}
