use crate::config::env_parse;
use crate::llm::error::{FailureKind, ProviderError};
use std::future::Future;
use std::time::Duration;

const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_BASE_MS: u64 = 1000;
const DEFAULT_CAP_MS: u64 = 5000;

/// Same-vendor retry applied inside an adapter before a failure is surfaced for cross-provider
/// fallback. Only `Overloaded` is retried here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base: Duration,
    pub cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base: Duration::from_millis(DEFAULT_BASE_MS),
            cap: Duration::from_millis(DEFAULT_CAP_MS),
        }
    }
}

impl RetryPolicy {
    pub fn from_env() -> Self {
        Self {
            max_retries: env_parse("LLM_RETRY_MAX", DEFAULT_MAX_RETRIES),
            base: Duration::from_millis(env_parse("LLM_RETRY_BASE_MS", DEFAULT_BASE_MS)),
            cap: Duration::from_millis(env_parse("LLM_RETRY_CAP_MS", DEFAULT_CAP_MS)),
        }
    }

    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `retry` (0-based): `min(base * 2^retry, cap)`.
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.cap)
    }

    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, ProviderError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let mut retry: u32 = 0;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(err) if err.kind == FailureKind::Overloaded && retry < self.max_retries => {
                    let backoff = self.backoff(retry);
                    tracing::warn!(
                        provider = %err.provider,
                        attempt = retry + 1,
                        ?backoff,
                        error = %err,
                        "provider overloaded; retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    retry += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
