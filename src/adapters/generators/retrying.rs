//! Bounded exponential backoff around another Generator.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backoff::ExponentialBackoffBuilder;
use tracing::warn;

use crate::domain::errors::{CoverError, CoverResult, GeneratorError};
use crate::domain::models::RetryConfig;
use crate::domain::ports::{GenerationRequest, Generator, GeneratorResponse};

/// Retries `Transient` Generator errors with exponential backoff.
///
/// Delays start at `initial_backoff_ms` and double up to `max_backoff_ms`.
/// After `max_retries` retries the last transient error is escalated to
/// [`GeneratorError::Fatal`]. Non-transient errors pass through untouched.
pub struct RetryingGenerator {
    inner: Arc<dyn Generator>,
    config: RetryConfig,
}

impl RetryingGenerator {
    pub fn new(inner: Arc<dyn Generator>, config: RetryConfig) -> Self {
        Self { inner, config }
    }

    fn policy(&self) -> backoff::ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(self.config.initial_backoff_ms))
            .with_multiplier(2.0)
            .with_randomization_factor(0.0)
            .with_max_interval(Duration::from_millis(self.config.max_backoff_ms))
            .with_max_elapsed_time(None)
            .build()
    }
}

#[async_trait]
impl Generator for RetryingGenerator {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    async fn generate(&self, request: &GenerationRequest) -> CoverResult<GeneratorResponse> {
        let attempts = AtomicU32::new(0);
        let max_retries = self.config.max_retries;

        let operation = || {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst);
            let inner = &self.inner;
            async move {
                match inner.generate(request).await {
                    Ok(response) => Ok(response),
                    Err(CoverError::Generator(GeneratorError::Transient(message))) => {
                        if attempt >= max_retries {
                            Err(backoff::Error::permanent(CoverError::Generator(
                                GeneratorError::Fatal(format!(
                                    "giving up after {attempt} retries: {message}"
                                )),
                            )))
                        } else {
                            Err(backoff::Error::transient(CoverError::Generator(
                                GeneratorError::Transient(message),
                            )))
                        }
                    }
                    Err(other) => Err(backoff::Error::permanent(other)),
                }
            }
        };

        backoff::future::retry_notify(self.policy(), operation, |err: CoverError, delay: Duration| {
            warn!(
                generator = self.inner.name(),
                error = %err,
                retry_in_ms = delay.as_millis() as u64,
                "transient generator error, backing off"
            );
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::generators::ScriptedGenerator;
    use crate::domain::models::{GroupHash, PromptFingerprint};
    use crate::domain::ports::Prompt;

    fn request() -> GenerationRequest {
        GenerationRequest {
            group: GroupHash::compute(b"s", b"t"),
            fingerprint: PromptFingerprint::of_bytes(b"p"),
            prompt: Prompt {
                system: String::new(),
                user: "u".into(),
            },
        }
    }

    fn config(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            initial_backoff_ms: 1,
            max_backoff_ms: 4,
        }
    }

    #[tokio::test]
    async fn recovers_from_transient_errors() {
        let scripted = Arc::new(
            ScriptedGenerator::new()
                .then_error(GeneratorError::Transient("429".into()))
                .then_error(GeneratorError::Transient("529".into()))
                .then_text("ok"),
        );
        let retrying = RetryingGenerator::new(scripted.clone(), config(3));
        let response = retrying.generate(&request()).await.unwrap();
        assert_eq!(response.content, "ok");
        assert_eq!(scripted.calls(), 3);
    }

    #[tokio::test]
    async fn escalates_after_max_retries() {
        let scripted = Arc::new(
            ScriptedGenerator::new()
                .then_error(GeneratorError::Transient("a".into()))
                .then_error(GeneratorError::Transient("b".into()))
                .then_error(GeneratorError::Transient("c".into()))
                .then_text("never reached"),
        );
        let retrying = RetryingGenerator::new(scripted.clone(), config(2));
        let err = retrying.generate(&request()).await.unwrap_err();
        assert!(matches!(err, CoverError::Generator(GeneratorError::Fatal(_))));
        assert_eq!(scripted.calls(), 3);
    }

    #[tokio::test]
    async fn fatal_errors_are_not_retried() {
        let scripted = Arc::new(
            ScriptedGenerator::new()
                .then_error(GeneratorError::Fatal("bad key".into()))
                .then_text("never reached"),
        );
        let retrying = RetryingGenerator::new(scripted.clone(), config(5));
        assert!(retrying.generate(&request()).await.is_err());
        assert_eq!(scripted.calls(), 1);
    }
}
