//! Content-addressed keys for recorded Generator interactions.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Number of hex characters shown when a hash appears in logs.
pub const HASH_DISPLAY_LENGTH: usize = 12;

fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Fingerprint of a session's inputs: the source and test file bytes at
/// session start.
///
/// `sha256(hex(sha256(source)) || hex(sha256(test)))`, so it is stable for
/// byte-identical inputs and changes whenever either file does.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupHash(String);

impl GroupHash {
    pub fn compute(source: &[u8], test: &[u8]) -> Self {
        let combined = format!("{}{}", sha256_hex(source), sha256_hex(test));
        Self(sha256_hex(combined.as_bytes()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Truncated form for log lines.
    pub fn short(&self) -> &str {
        &self.0[..HASH_DISPLAY_LENGTH.min(self.0.len())]
    }
}

impl fmt::Display for GroupHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// SHA-256 of a prompt's canonical serialization.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PromptFingerprint(String);

impl PromptFingerprint {
    pub fn of_bytes(bytes: &[u8]) -> Self {
        Self(sha256_hex(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn short(&self) -> &str {
        &self.0[..HASH_DISPLAY_LENGTH.min(self.0.len())]
    }
}

impl fmt::Display for PromptFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A Generator response as persisted in a recording file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedResponse {
    /// Prompt text the response answered, kept for humans reading the file.
    pub prompt: String,
    /// Raw response bytes, returned verbatim on replay.
    pub response: String,
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    /// Group the entry belongs to.
    pub files_hash: GroupHash,
    pub recorded_at: DateTime<Utc>,
}
