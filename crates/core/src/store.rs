use std::{
    collections::HashMap,
    io,
    path::PathBuf,
};

use tokio::fs;
use tracing::{debug, warn};

use crate::{
    error::StoreError,
    fsutil,
    identity::ItemId,
    stage::{Stage, StagePayload, StageResult},
};

const RESUMABLE_STAGES: [Stage; 3] = [Stage::Extract, Stage::Transcribe, Stage::Classify];

/// Durable `item_id → stage → latest StageResult` map, one JSON file per key
/// under `root/<stage>/<item_id>.json`.
///
/// Every write replaces the file atomically, so distinct keys never contend
/// and a reader never sees a half-written record.
#[derive(Debug, Clone)]
pub struct ResumeStore {
    root: PathBuf,
}

impl ResumeStore {
    /// Open (creating if needed) the store and sweep temp files left behind by
    /// an interrupted run.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        for stage in RESUMABLE_STAGES {
            let dir = root.join(stage.name());
            fs::create_dir_all(&dir)
                .await
                .map_err(|source| StoreError::Io {
                    path: dir.clone(),
                    source,
                })?;
            let swept = fsutil::sweep_temp_files(&dir)
                .await
                .map_err(|source| StoreError::Io {
                    path: dir.clone(),
                    source,
                })?;
            if swept > 0 {
                debug!(stage = %stage, swept, "removed stale temp records");
            }
        }
        Ok(Self { root })
    }

    fn record_path(&self, item_id: &ItemId, stage: Stage) -> PathBuf {
        self.root
            .join(stage.name())
            .join(format!("{}.json", item_id.as_str()))
    }

    /// Whether `T`'s stage is complete for `item_id`.
    pub async fn has<T: StagePayload>(&self, item_id: &ItemId) -> bool {
        self.get::<T>(item_id)
            .await
            .is_some_and(|result| result.is_complete())
    }

    /// Latest recorded result, failed ones included. Unreadable or mismatched
    /// records are reported as absent.
    pub async fn get<T: StagePayload>(&self, item_id: &ItemId) -> Option<StageResult<T>> {
        let path = self.record_path(item_id, T::STAGE);
        let result = match fsutil::read_json::<StageResult<T>>(&path).await {
            Ok(result) => result,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring unreadable resume record");
                return None;
            }
        };

        if &result.item_id != item_id || result.stage != T::STAGE {
            warn!(
                path = %path.display(),
                recorded_item = %result.item_id,
                recorded_stage = %result.stage,
                "ignoring resume record filed under the wrong key"
            );
            return None;
        }

        Some(result)
    }

    pub async fn put<T: StagePayload>(&self, result: &StageResult<T>) -> Result<(), StoreError> {
        let path = self.record_path(&result.item_id, T::STAGE);
        let json = serde_json::to_vec_pretty(result)?;
        fsutil::write_atomic(&path, &json)
            .await
            .map_err(|source| StoreError::Io { path, source })
    }

    /// Every readable record for `T`'s stage, keyed by item.
    pub async fn load_all<T: StagePayload>(
        &self,
    ) -> Result<HashMap<ItemId, StageResult<T>>, StoreError> {
        let dir = self.root.join(T::STAGE.name());
        let io_err = |source| StoreError::Io {
            path: dir.clone(),
            source,
        };

        let mut results = HashMap::new();
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(results),
            Err(e) => return Err(io_err(e)),
        };

        while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
            let path = entry.path();
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with('.') || path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }

            match fsutil::read_json::<StageResult<T>>(&path).await {
                Ok(result) if result.stage == T::STAGE => {
                    results.insert(result.item_id.clone(), result);
                }
                Ok(_) => warn!(path = %path.display(), "ignoring record of another stage"),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "ignoring unreadable resume record")
                }
            }
        }

        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        identity::resolve,
        types::{AudioArtifact, Classification, TranscriptRecord},
    };

    fn transcript(text: &str) -> TranscriptRecord {
        TranscriptRecord {
            text: text.into(),
            language: "en".into(),
            duration_secs: 12.0,
        }
    }

    #[tokio::test]
    async fn put_then_get_returns_latest_result() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = ResumeStore::open(dir.path()).await.unwrap();
        let id = resolve("https://www.tiktok.com/@a/video/1").unwrap();

        assert!(!store.has::<TranscriptRecord>(&id).await);

        store
            .put(&StageResult::<TranscriptRecord>::failure(id.clone(), "HTTP 503"))
            .await
            .unwrap();
        assert!(!store.has::<TranscriptRecord>(&id).await);
        assert!(!store.get::<TranscriptRecord>(&id).await.unwrap().succeeded);

        store
            .put(&StageResult::success(id.clone(), transcript("buy now")))
            .await
            .unwrap();
        assert!(store.has::<TranscriptRecord>(&id).await);
        let got = store.get::<TranscriptRecord>(&id).await.unwrap();
        assert_eq!(got.payload.unwrap().text, "buy now");
    }

    #[tokio::test]
    async fn stages_are_independent() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = ResumeStore::open(dir.path()).await.unwrap();
        let id = resolve("a").unwrap();

        store
            .put(&StageResult::success(id.clone(), transcript("x")))
            .await
            .unwrap();

        assert!(store.has::<TranscriptRecord>(&id).await);
        assert!(!store.has::<Classification>(&id).await);
    }

    #[tokio::test]
    async fn corrupt_record_is_treated_as_absent() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = ResumeStore::open(dir.path()).await.unwrap();
        let id = resolve("a").unwrap();

        let path = dir.path().join("transcribe").join(format!("{id}.json"));
        std::fs::write(&path, b"{\"item_id\": \"").unwrap();
        assert!(store.get::<TranscriptRecord>(&id).await.is_none());

        // A record without its success flag does not count either.
        std::fs::write(
            &path,
            format!(r#"{{"item_id":"{id}","stage":"transcribe","payload":{{"text":"x","language":"en","duration_secs":1.0}},"error":null,"finished_at":"2025-01-01T00:00:00Z"}}"#),
        )
        .unwrap();
        assert!(!store.has::<TranscriptRecord>(&id).await);
    }

    #[tokio::test]
    async fn record_under_wrong_key_is_ignored() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = ResumeStore::open(dir.path()).await.unwrap();
        let a = resolve("a").unwrap();
        let b = resolve("b").unwrap();

        store
            .put(&StageResult::success(a.clone(), transcript("x")))
            .await
            .unwrap();
        std::fs::copy(
            dir.path().join("transcribe").join(format!("{a}.json")),
            dir.path().join("transcribe").join(format!("{b}.json")),
        )
        .unwrap();

        assert!(store.get::<TranscriptRecord>(&b).await.is_none());
    }

    #[tokio::test]
    async fn audio_record_without_file_is_incomplete() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = ResumeStore::open(dir.path().join("store")).await.unwrap();
        let id = resolve("a").unwrap();
        let audio = dir.path().join(format!("{id}.mp3"));

        store
            .put(&StageResult::success(
                id.clone(),
                AudioArtifact {
                    path: audio.clone(),
                    duration_secs: 4.0,
                },
            ))
            .await
            .unwrap();
        assert!(!store.has::<AudioArtifact>(&id).await);

        std::fs::write(&audio, b"ID3...").unwrap();
        assert!(store.has::<AudioArtifact>(&id).await);
    }

    #[tokio::test]
    async fn concurrent_writers_on_distinct_keys_all_land() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = Arc::new(ResumeStore::open(dir.path()).await.unwrap());

        let mut tasks = tokio::task::JoinSet::new();
        for n in 0..32 {
            let store = Arc::clone(&store);
            tasks.spawn(async move {
                let id = resolve(&format!("https://example.com/{n}")).unwrap();
                store
                    .put(&StageResult::success(id, transcript(&n.to_string())))
                    .await
                    .unwrap();
            });
        }
        while let Some(joined) = tasks.join_next().await {
            joined.unwrap();
        }

        let all = store.load_all::<TranscriptRecord>().await.unwrap();
        assert_eq!(all.len(), 32);
    }

    #[tokio::test]
    async fn open_sweeps_interrupted_writes() {
        let dir = tempfile::TempDir::new().unwrap();
        let stale = dir.path().join("classify").join(".abc.json.1234.tmp");
        std::fs::create_dir_all(stale.parent().unwrap()).unwrap();
        std::fs::write(&stale, b"{\"item_").unwrap();

        let store = ResumeStore::open(dir.path()).await.unwrap();

        assert!(!stale.exists());
        assert!(store.load_all::<Classification>().await.unwrap().is_empty());
    }
}
