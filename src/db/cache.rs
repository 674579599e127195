//! Advisory result cache.
//!
//! Execution results can be stored under a caller-supplied key with a fixed
//! TTL. The cache is never consulted automatically: callers that want a
//! cached result must ask for the key again themselves.

use crate::config::RESULT_CACHE_TTL_SECS;
use crate::models::ExecutionResult;
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

#[derive(Clone)]
pub struct ResultCache {
    entries: Cache<String, Arc<ExecutionResult>>,
}

impl ResultCache {
    /// Cache with the standard 5-minute expiry.
    pub fn new() -> Self {
        Self::with_ttl(Duration::from_secs(RESULT_CACHE_TTL_SECS))
    }

    /// Cache with a custom expiry.
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: Cache::builder().time_to_live(ttl).build(),
        }
    }

    /// Store a result under the given key.
    pub async fn insert(&self, key: &str, result: Arc<ExecutionResult>) {
        debug!(cache_key = %key, rows = result.row_count, "Cached execution result");
        self.entries.insert(key.to_string(), result).await;
    }

    /// Look up a previously stored result.
    pub async fn get(&self, key: &str) -> Option<Arc<ExecutionResult>> {
        self.entries.get(key).await
    }
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new()
    }
}
