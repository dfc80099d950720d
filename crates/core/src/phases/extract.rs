use std::{collections::HashSet, path::PathBuf, sync::Arc, time::Duration};

use tokio::fs;
use tracing::{debug, error, info};

use crate::{
    adapters::{
        AudioExtractor, Downloader,
        ffmpeg::{FFMPEG, FFPROBE},
        tools::ensure_tool,
        ytdlp::YT_DLP,
    },
    config::PipelineConfig,
    error::{AdapterError, Result},
    fsutil,
    identity::ItemId,
    phases::load_items,
    phases::persist_aborted,
    pool::WorkerPool,
    progress::ProgressSink,
    report::PhaseSummary,
    retry::RetryPolicy,
    stage::{Stage, StageResult},
    store::ResumeStore,
    types::{AudioArtifact, ExtractionRow, Item},
};

const DOWNLOAD_PREFIX: &str = "download: ";
const EXTRACT_PREFIX: &str = "extract: ";

/// Fail fast when any media tool is missing.
pub async fn check_media_tools() -> Result<()> {
    ensure_tool(YT_DLP, "--version").await?;
    ensure_tool(FFMPEG, "-version").await?;
    ensure_tool(FFPROBE, "-version").await?;
    Ok(())
}

pub struct MediaAdapters {
    pub downloader: Arc<dyn Downloader>,
    pub extractor: Arc<dyn AudioExtractor>,
}

struct ExtractContext {
    adapters: MediaAdapters,
    store: ResumeStore,
    audio_dir: PathBuf,
    temp_media_dir: PathBuf,
    max_duration: Duration,
    retry: RetryPolicy,
}

#[derive(Debug, Clone, Default)]
pub struct ExtractSummary {
    pub phase: PhaseSummary,
    pub total_audio_secs: f64,
    pub table_path: PathBuf,
}

/// Download and extract audio for every item without a complete artifact,
/// then rewrite `extraction_results.json`.
pub async fn run_extract(
    config: &PipelineConfig,
    store: &ResumeStore,
    adapters: MediaAdapters,
    progress: &dyn ProgressSink,
) -> Result<ExtractSummary> {
    let items = load_items(&config.layout).await?;
    let mut phase = PhaseSummary::new(Stage::Extract);

    let mut units = Vec::new();
    let mut cached = HashSet::new();
    for item in &items {
        if store.has::<AudioArtifact>(&item.item_id).await {
            cached.insert(item.item_id.clone());
        } else {
            units.push((item.item_id.clone(), item.source_url.clone()));
        }
    }
    phase.skipped = cached.len();
    info!(pending = units.len(), cached = cached.len(), "starting audio extraction");

    let ctx = Arc::new(ExtractContext {
        adapters,
        store: store.clone(),
        audio_dir: config.layout.audio_dir(),
        temp_media_dir: config.layout.temp_media_dir.clone(),
        max_duration: config.max_audio_duration,
        retry: config.retry,
    });
    fs::create_dir_all(&ctx.audio_dir).await?;
    fs::create_dir_all(&ctx.temp_media_dir).await?;

    progress.started(Stage::Extract, units.len());
    let pool = WorkerPool::new(config.media_workers);
    let results = pool
        .run(
            units,
            move |item_id, url| {
                let ctx = Arc::clone(&ctx);
                async move { extract_item(&ctx, item_id, url).await }
            },
            |result| progress.advanced(result.succeeded),
        )
        .await;
    progress.finished();
    persist_aborted(store, &results).await;
    phase.record_all(&results);

    let table_path = config.layout.extraction_table_path();
    let total_audio_secs = write_table(store, &items, &cached, &table_path).await?;

    Ok(ExtractSummary {
        phase,
        total_audio_secs,
        table_path,
    })
}

async fn extract_item(ctx: &ExtractContext, item_id: ItemId, url: String) -> StageResult<AudioArtifact> {
    let result = match extract_audio(ctx, &item_id, &url).await {
        Ok(artifact) => {
            debug!(item = %item_id, duration = artifact.duration_secs, "audio extracted");
            StageResult::success(item_id, artifact)
        }
        Err(reason) => {
            debug!(item = %item_id, reason, "extraction failed");
            StageResult::failure(item_id, reason)
        }
    };
    if let Err(e) = ctx.store.put(&result).await {
        error!(item = %result.item_id, error = %e, "could not record extraction result");
    }
    result
}

/// The returned error is already prefixed with the step that failed.
async fn extract_audio(
    ctx: &ExtractContext,
    item_id: &ItemId,
    url: &str,
) -> std::result::Result<AudioArtifact, String> {
    let workdir = tempfile::Builder::new()
        .prefix(&format!("{item_id}-"))
        .tempdir_in(&ctx.temp_media_dir)
        .map_err(|e| format!("{DOWNLOAD_PREFIX}temp dir: {e}"))?;

    let video = ctx
        .retry
        .run("download", || {
            ctx.adapters
                .downloader
                .download(url, workdir.path(), item_id.as_str())
        })
        .await
        .map_err(|e| format!("{DOWNLOAD_PREFIX}{e}"))?;

    let final_path = ctx.audio_dir.join(format!("{item_id}.mp3"));
    let staging = fsutil::temp_sibling(&final_path);
    let extracted = async {
        ctx.retry
            .run("extract audio", || ctx.adapters.extractor.extract(&video, &staging))
            .await?;
        let duration_secs = ctx.adapters.extractor.probe_duration(&staging).await?;
        let limit = ctx.max_duration.as_secs_f64();
        if duration_secs > limit {
            return Err(AdapterError::Rejected(format!(
                "audio is {duration_secs:.0}s, longer than the {limit:.0}s limit"
            )));
        }
        fs::rename(&staging, &final_path).await?;
        Ok(duration_secs)
    }
    .await;

    match extracted {
        Ok(duration_secs) => Ok(AudioArtifact {
            path: final_path,
            duration_secs,
        }),
        Err(e) => {
            fsutil::cleanup_logged(&staging).await;
            Err(format!("{EXTRACT_PREFIX}{e}"))
        }
    }
}

/// Rebuild the aggregated status table from the store. Returns the total
/// duration of all extracted audio.
async fn write_table(
    store: &ResumeStore,
    items: &[Item],
    cached: &HashSet<ItemId>,
    path: &std::path::Path,
) -> Result<f64> {
    let results = store.load_all::<AudioArtifact>().await?;
    let mut total = 0.0;

    let rows: Vec<ExtractionRow> = items
        .iter()
        .map(|item| {
            let result = results.get(&item.item_id);
            let artifact = result.and_then(StageResult::completed_payload);
            let error = result.filter(|r| !r.is_complete()).map(|r| {
                r.error
                    .clone()
                    .unwrap_or_else(|| "audio artifact missing".to_string())
            });
            let downloaded = artifact.is_some()
                || error.as_deref().is_some_and(|e| e.starts_with(EXTRACT_PREFIX));
            total += artifact.map_or(0.0, |a| a.duration_secs);

            ExtractionRow {
                item_id: item.item_id.clone(),
                source_url: item.source_url.clone(),
                platform: item.platform,
                video_downloaded: downloaded,
                audio_extracted: artifact.is_some(),
                audio_duration: artifact.map_or(0.0, |a| a.duration_secs),
                audio_path: artifact
                    .map(|a| a.path.display().to_string())
                    .unwrap_or_default(),
                cached: cached.contains(&item.item_id),
                error,
            }
        })
        .collect();

    fsutil::write_json_atomic(path, &rows).await?;
    Ok(total)
}

#[cfg(test)]
mod tests {
    use std::{
        path::Path,
        sync::atomic::{AtomicUsize, Ordering},
    };

    use async_trait::async_trait;

    use super::*;
    use crate::{phases::testing, progress::NoProgress};

    #[derive(Default)]
    struct FakeDownloader {
        calls: AtomicUsize,
        fail_for: Option<String>,
        panic_for: Option<String>,
        /// Calls that time out before the first success.
        timeouts: usize,
    }

    #[async_trait]
    impl Downloader for FakeDownloader {
        async fn download(
            &self,
            url: &str,
            dest_dir: &Path,
            stem: &str,
        ) -> std::result::Result<PathBuf, AdapterError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.timeouts {
                return Err(AdapterError::Timeout {
                    operation: YT_DLP.to_string(),
                    secs: 300,
                });
            }
            if self.panic_for.as_deref() == Some(url) {
                panic!("yt-dlp wrapper crashed");
            }
            if self.fail_for.as_deref() == Some(url) {
                return Err(AdapterError::ToolFailed {
                    tool: YT_DLP,
                    status: "exit status: 1".into(),
                    stderr: "ERROR: video unavailable".into(),
                });
            }
            let path = dest_dir.join(format!("{stem}.mp4"));
            fs::write(&path, b"video").await?;
            Ok(path)
        }
    }

    struct FakeExtractor {
        calls: AtomicUsize,
        duration: f64,
    }

    impl FakeExtractor {
        fn new(duration: f64) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                duration,
            }
        }
    }

    #[async_trait]
    impl AudioExtractor for FakeExtractor {
        async fn extract(&self, _video: &Path, audio: &Path) -> std::result::Result<(), AdapterError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            fs::write(audio, b"ID3 audio").await?;
            Ok(())
        }

        async fn probe_duration(&self, _audio: &Path) -> std::result::Result<f64, AdapterError> {
            Ok(self.duration)
        }
    }

    fn adapters(
        downloader: &Arc<FakeDownloader>,
        extractor: &Arc<FakeExtractor>,
    ) -> MediaAdapters {
        MediaAdapters {
            downloader: downloader.clone(),
            extractor: extractor.clone(),
        }
    }

    #[tokio::test]
    async fn second_run_does_no_tool_work() {
        let items = [testing::item("a", 100), testing::item("b", 50)];
        let (_dir, config, store) = testing::workspace(&items).await;
        let downloader = Arc::new(FakeDownloader::default());
        let extractor = Arc::new(FakeExtractor::new(30.0));

        let first = run_extract(&config, &store, adapters(&downloader, &extractor), &NoProgress)
            .await
            .unwrap();
        let before = store.get::<AudioArtifact>(&items[0].item_id).await.unwrap();

        let second = run_extract(&config, &store, adapters(&downloader, &extractor), &NoProgress)
            .await
            .unwrap();
        let after = store.get::<AudioArtifact>(&items[0].item_id).await.unwrap();

        assert_eq!(first.phase.succeeded, 2);
        assert_eq!(second.phase.processed, 0);
        assert_eq!(second.phase.skipped, 2);
        assert_eq!(downloader.calls.load(Ordering::SeqCst), 2);
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 2);
        assert_eq!(before, after);
        assert_eq!(second.total_audio_secs, 60.0);
    }

    #[tokio::test]
    async fn one_failed_download_leaves_siblings_intact() {
        let items = [testing::item("a", 100), testing::item("b", 50)];
        let (_dir, config, store) = testing::workspace(&items).await;
        let downloader = Arc::new(FakeDownloader {
            fail_for: Some("b".to_string()),
            ..FakeDownloader::default()
        });
        let extractor = Arc::new(FakeExtractor::new(30.0));

        let summary = run_extract(&config, &store, adapters(&downloader, &extractor), &NoProgress)
            .await
            .unwrap();

        assert_eq!(summary.phase.succeeded, 1);
        assert_eq!(summary.phase.failed, 1);
        assert!(store.has::<AudioArtifact>(&items[0].item_id).await);
        assert!(!store.has::<AudioArtifact>(&items[1].item_id).await);

        let rows: Vec<ExtractionRow> = fsutil::read_json(&summary.table_path).await.unwrap();
        let b = rows.iter().find(|r| r.item_id == items[1].item_id).unwrap();
        assert!(!b.video_downloaded);
        assert!(b.error.as_deref().unwrap().contains("video unavailable"));
        assert!(rows.iter().any(|r| r.audio_extracted && r.audio_path.ends_with(".mp3")));
    }

    #[tokio::test]
    async fn overlong_audio_is_rejected_and_not_left_behind() {
        let items = [testing::item("long", 10)];
        let (_dir, mut config, store) = testing::workspace(&items).await;
        config.max_audio_duration = Duration::from_secs(60);
        let downloader = Arc::new(FakeDownloader::default());
        let extractor = Arc::new(FakeExtractor::new(3600.0));

        let summary = run_extract(&config, &store, adapters(&downloader, &extractor), &NoProgress)
            .await
            .unwrap();

        assert_eq!(summary.phase.failed, 1);
        let result = store.get::<AudioArtifact>(&items[0].item_id).await.unwrap();
        assert!(result.error.unwrap().contains("limit"));
        let mut entries = std::fs::read_dir(config.layout.audio_dir()).unwrap();
        assert!(entries.next().is_none());
        let rows: Vec<ExtractionRow> = fsutil::read_json(&summary.table_path).await.unwrap();
        assert!(rows[0].video_downloaded);
        assert!(!rows[0].audio_extracted);
    }

    #[tokio::test]
    async fn missing_audio_file_triggers_reextraction() {
        let items = [testing::item("a", 1)];
        let (_dir, config, store) = testing::workspace(&items).await;
        let downloader = Arc::new(FakeDownloader::default());
        let extractor = Arc::new(FakeExtractor::new(5.0));

        run_extract(&config, &store, adapters(&downloader, &extractor), &NoProgress)
            .await
            .unwrap();
        fs::remove_file(config.layout.audio_path(items[0].item_id.as_str()))
            .await
            .unwrap();
        let summary = run_extract(&config, &store, adapters(&downloader, &extractor), &NoProgress)
            .await
            .unwrap();

        assert_eq!(summary.phase.succeeded, 1);
        assert_eq!(downloader.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn timed_out_download_is_retried() {
        let items = [testing::item("a", 1)];
        let (_dir, mut config, store) = testing::workspace(&items).await;
        config.retry = RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(1),
        };
        let downloader = Arc::new(FakeDownloader {
            timeouts: 1,
            ..FakeDownloader::default()
        });
        let extractor = Arc::new(FakeExtractor::new(5.0));

        let summary = run_extract(&config, &store, adapters(&downloader, &extractor), &NoProgress)
            .await
            .unwrap();

        assert_eq!(summary.phase.succeeded, 1);
        assert_eq!(summary.phase.failed, 0);
        assert_eq!(downloader.calls.load(Ordering::SeqCst), 2);
        assert!(store.has::<AudioArtifact>(&items[0].item_id).await);
    }

    #[tokio::test]
    async fn retries_stop_at_the_configured_limit() {
        let items = [testing::item("a", 1)];
        let (_dir, mut config, store) = testing::workspace(&items).await;
        config.retry = RetryPolicy {
            max_retries: 2,
            base_delay: Duration::from_millis(1),
        };
        let downloader = Arc::new(FakeDownloader {
            timeouts: 10,
            ..FakeDownloader::default()
        });
        let extractor = Arc::new(FakeExtractor::new(5.0));

        let summary = run_extract(&config, &store, adapters(&downloader, &extractor), &NoProgress)
            .await
            .unwrap();

        assert_eq!(summary.phase.failed, 1);
        assert_eq!(downloader.calls.load(Ordering::SeqCst), 3);
        let result = store.get::<AudioArtifact>(&items[0].item_id).await.unwrap();
        assert!(result.error.unwrap().starts_with("download: "));
    }

    #[tokio::test]
    async fn crashed_worker_is_recorded_as_failed() {
        let items = [testing::item("a", 2), testing::item("crash", 1)];
        let (_dir, config, store) = testing::workspace(&items).await;
        let downloader = Arc::new(FakeDownloader {
            panic_for: Some("crash".to_string()),
            ..FakeDownloader::default()
        });
        let extractor = Arc::new(FakeExtractor::new(5.0));

        let summary = run_extract(&config, &store, adapters(&downloader, &extractor), &NoProgress)
            .await
            .unwrap();

        assert_eq!(summary.phase.failed, 1);
        let crashed = store.get::<AudioArtifact>(&items[1].item_id).await.unwrap();
        assert!(!crashed.succeeded);
        let rows: Vec<ExtractionRow> = fsutil::read_json(&summary.table_path).await.unwrap();
        let row = rows.iter().find(|r| r.item_id == items[1].item_id).unwrap();
        assert!(row.error.as_deref().unwrap().contains("aborted"));
    }
}
