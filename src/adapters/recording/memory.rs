use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::errors::CoverResult;
use crate::domain::models::{GroupHash, PromptFingerprint, RecordedResponse};
use crate::domain::ports::RecordingStore;

/// Process-local [`RecordingStore`], mainly for tests and batch runs that
/// do not need recordings to outlive the process.
#[derive(Debug, Default)]
pub struct InMemoryRecordingStore {
    entries: RwLock<HashMap<(GroupHash, PromptFingerprint), RecordedResponse>>,
    lookups: AtomicUsize,
}

impl InMemoryRecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Number of `lookup` calls served so far.
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl RecordingStore for InMemoryRecordingStore {
    async fn lookup(
        &self,
        group: &GroupHash,
        fingerprint: &PromptFingerprint,
    ) -> CoverResult<Option<RecordedResponse>> {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        Ok(self
            .entries
            .read()
            .await
            .get(&(group.clone(), fingerprint.clone()))
            .cloned())
    }

    async fn store(
        &self,
        group: &GroupHash,
        fingerprint: &PromptFingerprint,
        response: RecordedResponse,
    ) -> CoverResult<()> {
        self.entries
            .write()
            .await
            .insert((group.clone(), fingerprint.clone()), response);
        Ok(())
    }
}
