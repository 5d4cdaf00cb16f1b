//! Generator port - interface for the model backend that proposes tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::errors::CoverResult;
use crate::domain::models::{GroupHash, PromptFingerprint};

/// A fully rendered prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

/// One request to a Generator.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// Group the session's recordings live under.
    pub group: GroupHash,
    /// Fingerprint of `prompt`, computed once by the prompt builder.
    pub fingerprint: PromptFingerprint,
    pub prompt: Prompt,
}

/// Raw Generator output plus token accounting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratorResponse {
    pub content: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl GeneratorResponse {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            prompt_tokens: 0,
            completion_tokens: 0,
        }
    }
}

/// Trait for Generator implementations.
///
/// Backends report failures as [`CoverError::Generator`](crate::domain::errors::CoverError::Generator)
/// so that wrappers can tell transient errors from fatal ones.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Short backend name for log lines.
    fn name(&self) -> &'static str;

    async fn generate(&self, request: &GenerationRequest) -> CoverResult<GeneratorResponse>;
}
