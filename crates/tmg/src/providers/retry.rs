use async_trait::async_trait;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

use super::base::{ModelReply, ModelRequest, Provider};
use super::errors::ProviderError;

const DEFAULT_MAX_ATTEMPTS: usize = 3;
const DEFAULT_BASE_DELAY_MS: u64 = 500;
const DEFAULT_MAX_DELAY_MS: u64 = 8_000;

/// Retry and backoff behavior for backend calls
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryConfig {
    /// Maximum number of attempts including the first one
    pub max_attempts: usize,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
        }
    }
}

impl RetryConfig {
    /// Delay before the retry following attempt `attempt_index` (zero based)
    pub fn delay_for(&self, attempt_index: usize) -> Duration {
        let delay = self
            .base_delay_ms
            .saturating_mul(1u64 << attempt_index.min(16))
            .min(self.max_delay_ms);
        Duration::from_millis(delay)
    }
}

/// Retries the single failed call with exponential backoff.
///
/// Only transient failures are retried; anything else is returned on the
/// first occurrence. Running out of attempts yields `RetryExceeded`.
pub struct RetryingProvider {
    inner: Box<dyn Provider>,
    config: RetryConfig,
}

impl RetryingProvider {
    pub fn new(inner: Box<dyn Provider>, config: RetryConfig) -> Self {
        Self { inner, config }
    }
}

#[async_trait]
impl Provider for RetryingProvider {
    async fn complete(&self, request: &ModelRequest<'_>) -> Result<ModelReply, ProviderError> {
        let attempts = self.config.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 0..attempts {
            match self.inner.complete(request).await {
                Ok(reply) => return Ok(reply),
                Err(err) if !err.is_retryable() => return Err(err),
                Err(err) => {
                    warn!(attempt = attempt + 1, error = %err, "backend call failed");
                    last_error = err.to_string();
                    if attempt + 1 < attempts {
                        sleep(self.config.delay_for(attempt)).await;
                    }
                }
            }
        }

        Err(ProviderError::RetryExceeded {
            attempts,
            last_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::message::Message;
    use crate::providers::mock::MockProvider;
    use std::sync::Arc;

    fn fast() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            base_delay_ms: 1,
            max_delay_ms: 2,
        }
    }

    #[test]
    fn test_backoff_is_capped() {
        let config = RetryConfig::default();
        assert_eq!(config.delay_for(0), Duration::from_millis(500));
        assert_eq!(config.delay_for(1), Duration::from_millis(1000));
        assert_eq!(config.delay_for(10), Duration::from_millis(8000));
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failure() {
        let mock = Arc::new(MockProvider::from_steps(vec![
            Err(ProviderError::RateLimited),
            Ok(Message::assistant().with_text("listo")),
        ]));
        let provider = RetryingProvider::new(Box::new(mock.clone()), fast());

        let messages = vec![Message::user().with_text("hola")];
        let reply = provider
            .complete(&ModelRequest::new("", &messages, &[]))
            .await
            .unwrap();
        assert_eq!(reply.message.text(), "listo");
        assert_eq!(mock.request_count(), 2);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let mock = Arc::new(MockProvider::from_steps(vec![
            Err(ProviderError::MalformedReply("a".into())),
            Err(ProviderError::MalformedReply("b".into())),
            Err(ProviderError::MalformedReply("c".into())),
            Ok(Message::assistant().with_text("too late")),
        ]));
        let provider = RetryingProvider::new(Box::new(mock.clone()), fast());

        let messages = vec![Message::user().with_text("hola")];
        let result = provider
            .complete(&ModelRequest::new("", &messages, &[]))
            .await;
        match result {
            Err(ProviderError::RetryExceeded {
                attempts,
                last_error,
            }) => {
                assert_eq!(attempts, 3);
                assert!(last_error.contains('c'));
            }
            other => panic!("expected RetryExceeded, got {:?}", other.map(|r| r.message)),
        }
        assert_eq!(mock.request_count(), 3);
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        let mock = Arc::new(MockProvider::from_steps(vec![Err(ProviderError::Request {
            status: 401,
            body: "bad key".into(),
        })]));
        let provider = RetryingProvider::new(Box::new(mock.clone()), fast());

        let messages = vec![Message::user().with_text("hola")];
        let result = provider
            .complete(&ModelRequest::new("", &messages, &[]))
            .await;
        assert!(matches!(result, Err(ProviderError::Request { status: 401, .. })));
        assert_eq!(mock.request_count(), 1);
    }
}
