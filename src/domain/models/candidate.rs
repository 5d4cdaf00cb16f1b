use serde::{Deserialize, Serialize};

use super::recording::PromptFingerprint;

/// Test code proposed by the Generator, plus where it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCandidate {
    /// Code to append to the test file.
    pub code: String,
    /// Iteration that requested the candidate.
    pub iteration: u32,
    /// Fingerprint of the prompt that produced it.
    pub prompt_fingerprint: PromptFingerprint,
}

impl TestCandidate {
    pub fn new(code: impl Into<String>, iteration: u32, prompt_fingerprint: PromptFingerprint) -> Self {
        Self {
            code: code.into(),
            iteration,
            prompt_fingerprint,
        }
    }

    /// Body with all whitespace removed, used for duplicate detection.
    pub fn normalized_body(&self) -> String {
        normalize_body(&self.code)
    }
}

/// Strip every whitespace character so formatting differences don't defeat
/// duplicate detection.
pub fn normalize_body(code: &str) -> String {
    code.chars().filter(|c| !c.is_whitespace()).collect()
}
