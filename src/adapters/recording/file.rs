//! YAML file recording store.
//!
//! One file per (scenario, group): `{dir}/{scenario}_responses_{group}.yml`,
//! holding a mapping from prompt fingerprint to [`RecordedResponse`]. Files
//! accumulate entries across recording sessions unless the store was opened
//! with `regenerate`, in which case each group's file starts empty on its
//! first write in this process.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::errors::{CoverError, CoverResult};
use crate::domain::models::{GroupHash, PromptFingerprint, RecordedResponse};
use crate::domain::ports::RecordingStore;

type RecordingFile = BTreeMap<PromptFingerprint, RecordedResponse>;

/// [`RecordingStore`] persisted as YAML files on disk.
#[derive(Debug)]
pub struct FileRecordingStore {
    dir: PathBuf,
    scenario: String,
    regenerate: bool,
    /// Serializes writers and remembers which groups were regenerated.
    written: Mutex<HashSet<GroupHash>>,
}

impl FileRecordingStore {
    pub fn new(dir: impl Into<PathBuf>, scenario: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            scenario: scenario.into(),
            regenerate: false,
            written: Mutex::new(HashSet::new()),
        }
    }

    /// Start each group's file from empty instead of extending it.
    #[must_use]
    pub const fn regenerate(mut self, regenerate: bool) -> Self {
        self.regenerate = regenerate;
        self
    }

    pub fn file_path(&self, group: &GroupHash) -> PathBuf {
        self.dir
            .join(format!("{}_responses_{}.yml", self.scenario, group.as_str()))
    }

    /// Whether a recording file exists for `group`.
    pub async fn has_recording(&self, group: &GroupHash) -> bool {
        tokio::fs::try_exists(self.file_path(group))
            .await
            .unwrap_or(false)
    }

    async fn load(path: &Path) -> CoverResult<Option<RecordingFile>> {
        let text = match tokio::fs::read_to_string(path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CoverError::io(path, e)),
        };
        if text.trim().is_empty() {
            return Ok(Some(RecordingFile::new()));
        }
        match serde_yaml::from_str(&text) {
            Ok(entries) => Ok(Some(entries)),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "recording file is not valid YAML");
                Ok(None)
            }
        }
    }

    async fn write_atomically(path: &Path, entries: &RecordingFile) -> CoverResult<()> {
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| CoverError::io(parent, e))?;

        let yaml = serde_yaml::to_string(entries)?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let tmp = parent.join(format!(".{file_name}.{}.tmp", Uuid::new_v4().simple()));
        tokio::fs::write(&tmp, yaml)
            .await
            .map_err(|e| CoverError::io(&tmp, e))?;
        if let Err(e) = tokio::fs::rename(&tmp, path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(CoverError::io(path, e));
        }
        Ok(())
    }
}

#[async_trait]
impl RecordingStore for FileRecordingStore {
    async fn lookup(
        &self,
        group: &GroupHash,
        fingerprint: &PromptFingerprint,
    ) -> CoverResult<Option<RecordedResponse>> {
        let path = self.file_path(group);
        let hit = Self::load(&path)
            .await?
            .and_then(|mut entries| entries.remove(fingerprint));
        debug!(
            group_hash = group.short(),
            fingerprint = fingerprint.short(),
            hit = hit.is_some(),
            "recording lookup"
        );
        Ok(hit)
    }

    async fn store(
        &self,
        group: &GroupHash,
        fingerprint: &PromptFingerprint,
        response: RecordedResponse,
    ) -> CoverResult<()> {
        let path = self.file_path(group);
        let mut written = self.written.lock().await;

        let first_write = !written.contains(group);
        let mut entries = if self.regenerate && first_write {
            info!(path = %path.display(), "regenerating recording file from empty");
            RecordingFile::new()
        } else {
            Self::load(&path).await?.unwrap_or_default()
        };
        entries.insert(fingerprint.clone(), response);
        Self::write_atomically(&path, &entries).await?;
        written.insert(group.clone());

        info!(
            group_hash = group.short(),
            fingerprint = fingerprint.short(),
            entries = entries.len(),
            "recorded generator response"
        );
        Ok(())
    }
}
