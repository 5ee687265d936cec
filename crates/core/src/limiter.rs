//! Shared concurrency limits keyed by resource.
//!
//! Stages that talk to the same remote resource (a host, an account) can
//! share one limit through a [`LimiterRegistry`] built at startup and handed
//! to each stage.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, RwLock, Semaphore};
use tracing::debug;

/// Pool of semaphores, one per resource key.
///
/// Thread-safe and async-compatible. The first call for a key decides its
/// permit count; later calls get the same limiter.
#[derive(Debug, Default)]
pub struct LimiterRegistry {
    limiters: RwLock<HashMap<String, Arc<Semaphore>>>,
}

impl LimiterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the limiter for `key`, creating it with `permits` if absent.
    pub async fn get_or_create(&self, key: &str, permits: usize) -> Arc<Semaphore> {
        if let Some(limiter) = self.limiters.read().await.get(key) {
            return Arc::clone(limiter);
        }

        let mut limiters = self.limiters.write().await;
        Arc::clone(limiters.entry(key.to_string()).or_insert_with(|| {
            let permits = permits.max(1);
            debug!("Created limiter {} with {} permits", key, permits);
            Arc::new(Semaphore::new(permits))
        }))
    }

    /// Waits for a permit on `key`'s limiter.
    pub async fn acquire(&self, key: &str, permits: usize) -> Option<OwnedSemaphorePermit> {
        self.get_or_create(key, permits).await.acquire_owned().await.ok()
    }

    /// Permits currently free on `key`'s limiter.
    pub async fn available(&self, key: &str) -> Option<usize> {
        self.limiters
            .read()
            .await
            .get(key)
            .map(|limiter| limiter.available_permits())
    }

    pub async fn len(&self) -> usize {
        self.limiters.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.limiters.read().await.is_empty()
    }
}
