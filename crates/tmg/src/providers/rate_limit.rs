use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep_until, Instant};

use super::base::{ModelReply, ModelRequest, Provider};
use super::errors::ProviderError;

pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_secs(1);

/// Spaces backend calls at least `min_interval` apart across every caller
pub struct RateLimitedProvider {
    inner: Box<dyn Provider>,
    min_interval: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl RateLimitedProvider {
    pub fn new(inner: Box<dyn Provider>, min_interval: Duration) -> Self {
        Self {
            inner,
            min_interval,
            next_slot: Mutex::new(None),
        }
    }

    /// Wait for the next free slot and reserve the one after it
    async fn acquire(&self) {
        let mut next_slot = self.next_slot.lock().await;
        let now = Instant::now();
        let start = match *next_slot {
            Some(slot) if slot > now => {
                sleep_until(slot).await;
                slot
            }
            _ => now,
        };
        *next_slot = Some(start + self.min_interval);
    }
}

#[async_trait]
impl Provider for RateLimitedProvider {
    async fn complete(&self, request: &ModelRequest<'_>) -> Result<ModelReply, ProviderError> {
        self.acquire().await;
        self.inner.complete(request).await
    }
}
