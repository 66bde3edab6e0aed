//! Per-key sliding-window rate limiting.
//!
//! The window lives in the store, not in process memory, because the
//! validators run as independent stateless instances. Recording a request
//! also prunes entries that fell out of the window, keeping the table
//! bounded without a sweeper.

use storykeep_core::{TokenHash, HOUR_MS};
use storykeep_store::{Store, StoreError};

/// Sliding-window limit for API-key reads.
#[derive(Debug, Clone, Copy)]
pub struct SlidingWindow {
    pub max_requests: u32,
    pub window_ms: i64,
}

impl Default for SlidingWindow {
    fn default() -> Self {
        Self {
            max_requests: 100,
            window_ms: HOUR_MS,
        }
    }
}

impl SlidingWindow {
    /// Record this request and allow it if the key is under the limit.
    ///
    /// Counting and recording happen as one atomic store operation, so
    /// two requests racing at the window edge cannot both slip in.
    pub async fn check_and_record<S: Store>(
        &self,
        store: &S,
        key: &TokenHash,
        now: i64,
    ) -> Result<bool, StoreError> {
        store
            .try_record_api_request(key, now, now - self.window_ms, self.max_requests)
            .await
    }
}
