//! Consumer and broker configuration.

use serde::{Deserialize, Serialize};

/// Per-consumer options passed when a consumer is created
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerOptions {
    /// Create topics on subscribe when they do not exist yet
    pub allow_auto_topic_creation: bool,
    /// Maximum number of records fetched per poll before the handler runs
    pub max_records_per_poll: usize,
}

impl Default for ConsumerOptions {
    fn default() -> Self {
        Self {
            allow_auto_topic_creation: true,
            max_records_per_poll: 100,
        }
    }
}

/// In-memory broker configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InMemoryConfig {
    /// Maximum records retained per topic before publishes are rejected
    pub max_topic_size: usize,
    /// Create topics on first publish
    pub auto_create_topics: bool,
}

impl Default for InMemoryConfig {
    fn default() -> Self {
        Self {
            max_topic_size: 100_000,
            auto_create_topics: true,
        }
    }
}
