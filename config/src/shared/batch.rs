use serde::{Deserialize, Serialize};

/// Default number of entries accumulated before a batch is flushed.
pub const DEFAULT_BATCH_SIZE: usize = 100;

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

/// Batch processing configuration for a datastream.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct BatchConfig {
    /// Maximum number of entries read before the batch goes through transform, filter and write.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Whether writers receive the whole write group of a batch in one call.
    #[serde(default)]
    pub write_many: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            write_many: false,
        }
    }
}
