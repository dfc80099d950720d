use std::{path::PathBuf, sync::Arc, time::Duration};

use tracing::{debug, error, info};

use crate::{
    adapters::Transcriber,
    config::{PipelineConfig, require_artifact},
    error::Result,
    identity::ItemId,
    phases::{load_items, persist_aborted},
    pool::WorkerPool,
    progress::ProgressSink,
    provider::transcription_cost,
    report::PhaseSummary,
    stage::{Stage, StageResult},
    store::ResumeStore,
    types::{AudioArtifact, TranscriptRecord},
};

#[derive(Debug, Clone, Default)]
pub struct TranscribeSummary {
    pub phase: PhaseSummary,
    /// Items with no usable audio yet.
    pub blocked: usize,
    pub transcribed_secs: f64,
}

/// Transcribe every item whose audio is ready and whose transcript is not.
pub async fn run_transcribe(
    config: &PipelineConfig,
    store: &ResumeStore,
    transcriber: Arc<dyn Transcriber>,
    progress: &dyn ProgressSink,
) -> Result<TranscribeSummary> {
    require_artifact(&config.layout.extraction_table_path(), "extract")?;
    let items = load_items(&config.layout).await?;
    let audio = store.load_all::<AudioArtifact>().await?;

    let mut summary = TranscribeSummary {
        phase: PhaseSummary::new(Stage::Transcribe),
        ..TranscribeSummary::default()
    };
    let mut units: Vec<(_, PathBuf)> = Vec::new();
    for item in &items {
        if store.has::<TranscriptRecord>(&item.item_id).await {
            summary.phase.skipped += 1;
            continue;
        }
        match audio
            .get(&item.item_id)
            .and_then(StageResult::completed_payload)
        {
            Some(artifact) => units.push((item.item_id.clone(), artifact.path.clone())),
            None => summary.blocked += 1,
        }
    }
    info!(
        pending = units.len(),
        skipped = summary.phase.skipped,
        blocked = summary.blocked,
        "starting transcription"
    );

    let delay = config.rate_limit_delay;
    let task_store = store.clone();
    progress.started(Stage::Transcribe, units.len());
    let results = WorkerPool::new(config.api_workers)
        .run(
            units,
            move |item_id, audio_path| {
                let transcriber = Arc::clone(&transcriber);
                let store = task_store.clone();
                async move { transcribe_item(transcriber, store, delay, item_id, audio_path).await }
            },
            |result| progress.advanced(result.succeeded),
        )
        .await;
    progress.finished();
    persist_aborted(store, &results).await;

    summary.phase.record_all(&results);
    summary.transcribed_secs = results
        .iter()
        .filter_map(|r| r.completed_payload())
        .map(|t| t.duration_secs)
        .sum();
    summary.phase.estimated_cost = transcription_cost(summary.transcribed_secs);

    Ok(summary)
}

async fn transcribe_item(
    transcriber: Arc<dyn Transcriber>,
    store: ResumeStore,
    delay: Duration,
    item_id: ItemId,
    audio_path: PathBuf,
) -> StageResult<TranscriptRecord> {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
    let result = match transcriber.transcribe(&audio_path).await {
        Ok(record) => {
            debug!(item = %item_id, language = %record.language, "transcribed");
            StageResult::success(item_id, record)
        }
        Err(e) => {
            debug!(item = %item_id, error = %e, "transcription failed");
            StageResult::failure(item_id, e.to_string())
        }
    };
    if let Err(e) = store.put(&result).await {
        error!(item = %result.item_id, error = %e, "could not record transcript");
    }
    result
}
