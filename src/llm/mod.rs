pub mod cache;
pub mod openai;
pub mod prompts;
pub mod repair;

pub use cache::{CacheEntry, LlmCache};
pub use openai::OpenAiClient;

use crate::error::{Result, TransubError};
use crate::jobs::log_store::JobLogger;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Base delay for exponential backoff (milliseconds).
const BASE_DELAY_MS: u64 = 1000;

const JSON: &str = "json";

/// A chat model that turns one prompt into one reply.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    async fn complete(&self, prompt: &str, json: bool) -> Result<String>;
    fn model(&self) -> &str;
}

/// Cached, retried and validated access to an [`LlmBackend`].
#[derive(Clone)]
pub struct LlmClient {
    backend: Arc<dyn LlmBackend>,
    cache: Option<Arc<LlmCache>>,
    max_retries: u32,
    base_delay: Duration,
    logger: Option<JobLogger>,
}

impl LlmClient {
    pub fn new(backend: Arc<dyn LlmBackend>) -> Self {
        Self {
            backend,
            cache: None,
            max_retries: 5,
            base_delay: Duration::from_millis(BASE_DELAY_MS),
            logger: None,
        }
    }

    pub fn with_cache(mut self, cache: Arc<LlmCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_logger(mut self, logger: JobLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn model(&self) -> &str {
        self.backend.model()
    }

    /// Ask for a JSON reply of shape `T`.
    ///
    /// A cached reply for the same prompt in `scope` short-circuits the call.
    /// Transport errors, undecodable replies and replies rejected by `validate`
    /// are retried with exponential backoff; rejected replies are also recorded
    /// in the error scope of the cache.
    pub async fn ask_json<T, F>(&self, prompt: &str, scope: &str, validate: F) -> Result<T>
    where
        T: DeserializeOwned + Serialize,
        F: Fn(&T) -> std::result::Result<(), String>,
    {
        if let Some(hit) = self.cached(prompt, scope)? {
            match serde_json::from_value::<T>(hit) {
                Ok(value) => return Ok(value),
                Err(e) => warn!("Ignoring stale cache entry in '{}': {}", scope, e),
            }
        }

        let mut last_error = None;

        for attempt in 0..self.max_retries {
            if attempt > 0 {
                let delay = self.base_delay.saturating_mul(2u32.saturating_pow(attempt - 1));
                debug!("Retry attempt {} after {:?} delay", attempt, delay);
                tokio::time::sleep(delay).await;
            }

            let started = Instant::now();
            let raw = match self.backend.complete(prompt, true).await {
                Ok(raw) => raw,
                Err(e) if e.is_retryable() => {
                    warn!("LLM attempt {} failed ({}): {}", attempt + 1, scope, e);
                    last_error = Some(e);
                    continue;
                }
                Err(e) => return Err(e),
            };
            let elapsed = started.elapsed();
            self.log_request(scope, prompt, elapsed);

            let outcome = repair::decode::<T>(&raw).and_then(|value| match validate(&value) {
                Ok(()) => Ok(value),
                Err(message) => Err(TransubError::InvalidResponse(message)),
            });

            match outcome {
                Ok(value) => {
                    if let Some(cache) = &self.cache {
                        let entry = CacheEntry::new(
                            self.backend.model(),
                            prompt,
                            JSON,
                            &raw,
                            serde_json::to_value(&value)?,
                        )
                        .with_duration(elapsed.as_secs_f64());
                        cache.store(scope, entry)?;
                    }
                    return Ok(value);
                }
                Err(e) => {
                    warn!("LLM reply rejected ({}): {}", scope, e);
                    if let Some(cache) = &self.cache {
                        let entry = CacheEntry::new(
                            self.backend.model(),
                            prompt,
                            JSON,
                            &raw,
                            serde_json::Value::Null,
                        )
                        .with_message(e.to_string())
                        .with_duration(elapsed.as_secs_f64());
                        cache.record_error(entry)?;
                    }
                    if let Some(logger) = &self.logger {
                        logger.warning("llm", format!("LLM reply rejected ({scope}): {e}"));
                    }
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| TransubError::Api("Unknown LLM error".to_string())))
    }

    fn cached(&self, prompt: &str, scope: &str) -> Result<Option<serde_json::Value>> {
        let Some(cache) = &self.cache else {
            return Ok(None);
        };
        let hit = cache.lookup(scope, prompt, JSON)?;
        if hit.is_some() {
            if let Some(logger) = &self.logger {
                logger.info("llm", format!("LLM cache hit for {scope}"));
            }
        }
        Ok(hit)
    }

    fn log_request(&self, scope: &str, prompt: &str, elapsed: Duration) {
        debug!("LLM request ({}) took {:.2}s", scope, elapsed.as_secs_f64());
        if let Some(logger) = &self.logger {
            let preview: String = prompt.chars().take(50).collect();
            let ellipsis = if prompt.chars().count() > 50 { "..." } else { "" };
            logger.timed(
                "llm",
                format!("LLM request ({scope}): {preview}{ellipsis}"),
                elapsed.as_millis() as u64,
            );
        }
    }
}
