use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use super::traits::Backend;
use super::types::Turn;
use crate::app::BackendSettings;
use crate::constants::MAX_RETRY_BACKOFF_MS;
use crate::utils::BackendError;

/// Bounded exponential backoff for transient backend failures
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    /// Delay before retry number `attempt` (zero based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        let settings = BackendSettings::default();
        Self::from(&settings)
    }
}

impl From<&BackendSettings> for RetryPolicy {
    fn from(settings: &BackendSettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            initial_backoff: settings.retry_backoff(),
            max_backoff: Duration::from_millis(MAX_RETRY_BACKOFF_MS),
        }
    }
}

/// Shared entry point for generation calls.
///
/// Wraps a [`Backend`] with a deadline covering the whole call and retries
/// for transient unavailability. Cheap to share across connections behind `Arc`.
pub struct BackendClient {
    backend: Arc<dyn Backend>,
    timeout: Duration,
    retry: RetryPolicy,
}

impl BackendClient {
    pub fn new(backend: Arc<dyn Backend>, timeout: Duration, retry: RetryPolicy) -> Self {
        Self {
            backend,
            timeout,
            retry,
        }
    }

    pub fn from_settings(backend: Arc<dyn Backend>, settings: &BackendSettings) -> Self {
        Self::new(backend, settings.timeout(), RetryPolicy::from(settings))
    }

    pub fn name(&self) -> &str {
        self.backend.name()
    }

    /// Generate a reply for `history`, whose last turn is the pending user message
    pub async fn generate(&self, history: &[Turn]) -> Result<String, BackendError> {
        match tokio::time::timeout(self.timeout, self.generate_with_retry(history)).await {
            Ok(result) => result,
            Err(_) => Err(BackendError::Timeout(self.timeout)),
        }
    }

    async fn generate_with_retry(&self, history: &[Turn]) -> Result<String, BackendError> {
        let mut attempt = 0;
        loop {
            match self.backend.generate(history).await {
                Ok(text) => return Ok(text),
                Err(e) if e.is_retryable() && attempt < self.retry.max_retries => {
                    let delay = self.retry.backoff(attempt);
                    attempt += 1;
                    warn!(
                        backend = self.backend.name(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retrying generation"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub async fn validate_connection(&self) -> Result<bool, BackendError> {
        self.backend.validate_connection().await
    }
}
