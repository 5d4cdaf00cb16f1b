use async_trait::async_trait;

use crate::domain::errors::CoverResult;
use crate::domain::models::{GroupHash, PromptFingerprint, RecordedResponse};

/// Content-addressed store of recorded Generator responses.
///
/// Implementations must be safe to share between concurrent sessions. Within
/// one group a fingerprint maps to exactly one response; `store` replaces any
/// previous entry.
#[async_trait]
pub trait RecordingStore: Send + Sync {
    async fn lookup(
        &self,
        group: &GroupHash,
        fingerprint: &PromptFingerprint,
    ) -> CoverResult<Option<RecordedResponse>>;

    async fn store(
        &self,
        group: &GroupHash,
        fingerprint: &PromptFingerprint,
        response: RecordedResponse,
    ) -> CoverResult<()>;
}
