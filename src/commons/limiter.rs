use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::ApiError;

/// Upper bound on simultaneous requests to the remote API.
///
/// Owned by one pipeline invocation and cloned into every component that
/// issues requests; clones share the same permits.
#[derive(Debug, Clone)]
pub struct OutboundLimiter {
    sem: Arc<Semaphore>,
}

impl OutboundLimiter {
    pub fn new(limit: usize) -> Self {
        Self {
            sem: Arc::new(Semaphore::new(limit.max(1))),
        }
    }

    /// Wait for a slot. The permit releases the slot on drop.
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit, ApiError> {
        self.sem
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ApiError::LimiterClosed)
    }
}
