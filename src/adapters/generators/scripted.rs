//! Deterministic Generator double.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::errors::{CoverResult, GeneratorError};
use crate::domain::ports::{GenerationRequest, Generator, GeneratorResponse};

/// Replies from a fixed script, one entry per call.
///
/// Once the script runs out every further call fails with a fatal error, so
/// a generator built with [`ScriptedGenerator::failing`] doubles as proof
/// that no live call was made.
#[derive(Debug, Default)]
pub struct ScriptedGenerator {
    script: Mutex<VecDeque<Result<GeneratorResponse, GeneratorError>>>,
    calls: AtomicUsize,
    seen: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// A generator that fails every call.
    pub fn failing() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn then_text(self, content: impl Into<String>) -> Self {
        self.then_response(GeneratorResponse::new(content))
    }

    #[must_use]
    pub fn then_response(mut self, response: GeneratorResponse) -> Self {
        self.script.get_mut().push_back(Ok(response));
        self
    }

    #[must_use]
    pub fn then_error(mut self, error: GeneratorError) -> Self {
        self.script.get_mut().push_back(Err(error));
        self
    }

    /// Number of `generate` calls received.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Every request received so far, in order.
    pub async fn requests(&self) -> Vec<GenerationRequest> {
        self.seen.lock().await.clone()
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn generate(&self, request: &GenerationRequest) -> CoverResult<GeneratorResponse> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.seen.lock().await.push(request.clone());
        let next = self.script.lock().await.pop_front();
        match next {
            Some(Ok(response)) => Ok(response),
            Some(Err(error)) => Err(error.into()),
            None => Err(GeneratorError::Fatal(format!(
                "scripted generator has no reply for call {call} (prompt {})",
                request.fingerprint.short()
            ))
            .into()),
        }
    }
}
