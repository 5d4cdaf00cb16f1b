//! Recording Store in front of a live Generator.
//!
//! Replay mode answers only from the store and never touches a live
//! backend; a miss is a fatal `NoRecording`. Record mode always calls the
//! live backend and stores the answer before returning it, replacing any
//! earlier recording for the same fingerprint.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::info;

use crate::domain::errors::{CoverError, CoverResult};
use crate::domain::models::RecordedResponse;
use crate::domain::ports::{GenerationRequest, Generator, GeneratorResponse, RecordingStore};

enum Mode {
    Replay,
    Record(Arc<dyn Generator>),
}

/// [`Generator`] that records to or replays from a [`RecordingStore`].
pub struct RecordReplayGenerator {
    mode: Mode,
    store: Arc<dyn RecordingStore>,
}

impl RecordReplayGenerator {
    /// Serve every request from `store`.
    pub fn replay(store: Arc<dyn RecordingStore>) -> Self {
        Self {
            mode: Mode::Replay,
            store,
        }
    }

    /// Forward every request to `live` and record the response.
    pub fn record(live: Arc<dyn Generator>, store: Arc<dyn RecordingStore>) -> Self {
        Self {
            mode: Mode::Record(live),
            store,
        }
    }
}

fn render_prompt(request: &GenerationRequest) -> String {
    format!("{}\n\n{}", request.prompt.system, request.prompt.user)
}

#[async_trait]
impl Generator for RecordReplayGenerator {
    fn name(&self) -> &'static str {
        match &self.mode {
            Mode::Replay => "replay",
            Mode::Record(_) => "record",
        }
    }

    async fn generate(&self, request: &GenerationRequest) -> CoverResult<GeneratorResponse> {
        match &self.mode {
            Mode::Replay => {
                let recorded = self
                    .store
                    .lookup(&request.group, &request.fingerprint)
                    .await?
                    .ok_or_else(|| CoverError::NoRecording {
                        group: request.group.clone(),
                        fingerprint: request.fingerprint.clone(),
                    })?;
                info!(
                    group_hash = request.group.short(),
                    fingerprint = request.fingerprint.short(),
                    "replaying recorded response"
                );
                Ok(GeneratorResponse {
                    content: recorded.response,
                    prompt_tokens: recorded.prompt_tokens,
                    completion_tokens: recorded.completion_tokens,
                })
            }
            Mode::Record(live) => {
                let response = live.generate(request).await?;
                let entry = RecordedResponse {
                    prompt: render_prompt(request),
                    response: response.content.clone(),
                    prompt_tokens: response.prompt_tokens,
                    completion_tokens: response.completion_tokens,
                    files_hash: request.group.clone(),
                    recorded_at: Utc::now(),
                };
                self.store
                    .store(&request.group, &request.fingerprint, entry)
                    .await?;
                Ok(response)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::generators::ScriptedGenerator;
    use crate::adapters::recording::InMemoryRecordingStore;
    use crate::domain::models::{GroupHash, PromptFingerprint};
    use crate::domain::ports::Prompt;

    fn request(user: &str) -> GenerationRequest {
        GenerationRequest {
            group: GroupHash::compute(b"src", b"test"),
            fingerprint: PromptFingerprint::of_bytes(user.as_bytes()),
            prompt: Prompt {
                system: "sys".into(),
                user: user.into(),
            },
        }
    }

    #[tokio::test]
    async fn record_then_replay_returns_identical_bytes() {
        let store = Arc::new(InMemoryRecordingStore::new());
        let live = Arc::new(ScriptedGenerator::new().then_text("def test_x():\n    assert x() == 1\n"));

        let recorder = RecordReplayGenerator::record(live.clone(), store.clone());
        let recorded = recorder.generate(&request("cover x")).await.unwrap();

        let replayer = RecordReplayGenerator::replay(store.clone());
        let replayed = replayer.generate(&request("cover x")).await.unwrap();
        assert_eq!(recorded.content, replayed.content);
        assert_eq!(live.calls(), 1);
    }

    #[tokio::test]
    async fn replay_miss_is_fatal_no_recording() {
        let store = Arc::new(InMemoryRecordingStore::new());
        let replayer = RecordReplayGenerator::replay(store);
        let err = replayer.generate(&request("unseen")).await.unwrap_err();
        assert!(matches!(err, CoverError::NoRecording { .. }));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn record_mode_overwrites_existing_entries() {
        let store = Arc::new(InMemoryRecordingStore::new());
        let live = Arc::new(ScriptedGenerator::new().then_text("first").then_text("second"));
        let recorder = RecordReplayGenerator::record(live.clone(), store.clone());
        recorder.generate(&request("p")).await.unwrap();
        recorder.generate(&request("p")).await.unwrap();
        assert_eq!(live.calls(), 2);

        let replayed = RecordReplayGenerator::replay(store)
            .generate(&request("p"))
            .await
            .unwrap();
        assert_eq!(replayed.content, "second");
    }
}
