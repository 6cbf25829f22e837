//! Bounded pool for operations that must block.
//!
//! The event loop never blocks: anything that does (credential
//! verification, feed fetches for relay bots) runs on tokio's blocking
//! threads behind a semaphore so a burst cannot exhaust them. Results
//! are awaited back on the loop.

use crate::LogicError;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Semaphore-bounded wrapper around `spawn_blocking`.
pub struct BlockingPool {
    permits: Arc<Semaphore>,
}

impl BlockingPool {
    pub fn new(limit: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(limit.max(1))),
        }
    }

    /// Runs `work` on a blocking thread, waiting for a permit first.
    pub async fn run<F, T>(&self, work: F) -> Result<T, LogicError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| LogicError::Blocking("pool closed".into()))?;
        let result = tokio::task::spawn_blocking(move || {
            let result = work();
            drop(permit);
            result
        })
        .await
        .map_err(|e| LogicError::Blocking(e.to_string()))?;
        Ok(result)
    }

    /// Permits currently available, for status reporting.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}
