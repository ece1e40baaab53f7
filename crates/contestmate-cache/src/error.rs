use std::sync::Arc;

use thiserror::Error;

/// Cache failures. Cloneable so one fetch outcome can be handed to every
/// caller waiting on the same key.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    #[error("fetch for {key} failed: {reason}")]
    Fetch {
        key: String,
        reason: Arc<anyhow::Error>,
    },

    #[error("durable store error: {0}")]
    Store(Arc<anyhow::Error>),

    #[error("cannot encode value for {key}: {reason}")]
    Encode {
        key: String,
        reason: Arc<serde_json::Error>,
    },

    #[error("cannot decode value for {key}: {reason}")]
    Decode {
        key: String,
        reason: Arc<serde_json::Error>,
    },
}

impl CacheError {
    pub fn store(err: anyhow::Error) -> Self {
        Self::Store(Arc::new(err))
    }

    /// True when the failure came from the fetch itself rather than the cache.
    pub fn is_fetch(&self) -> bool {
        matches!(self, Self::Fetch { .. })
    }
}
