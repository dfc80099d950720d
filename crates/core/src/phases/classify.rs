use std::sync::Arc;

use tracing::{debug, error, info};

use crate::{
    adapters::{BatchProvider, ClassificationRequest, Classifier},
    batch::{BatchJob, BatchReconciler, PendingRequest, ReconcileOutcome, discard_job},
    config::PipelineConfig,
    error::Result,
    identity::ItemId,
    phases::{load_items, persist_aborted},
    pool::WorkerPool,
    progress::ProgressSink,
    provider::{batch_classification_cost, sync_classification_cost},
    report::PhaseSummary,
    stage::{Stage, StageResult},
    store::ResumeStore,
    types::{Classification, TranscriptRecord},
};

/// Items with a usable transcript or caption and no complete classification.
pub async fn pending_requests(
    config: &PipelineConfig,
    store: &ResumeStore,
) -> Result<Vec<PendingRequest>> {
    let items = load_items(&config.layout).await?;
    let transcripts = store.load_all::<TranscriptRecord>().await?;

    let mut pending = Vec::new();
    for item in items {
        let Some(transcript) = transcripts
            .get(&item.item_id)
            .and_then(StageResult::completed_payload)
        else {
            continue;
        };
        if transcript.text.trim().is_empty() && item.caption.trim().is_empty() {
            debug!(item = %item.item_id, "nothing to classify, skipping");
            continue;
        }
        if store.has::<Classification>(&item.item_id).await {
            continue;
        }
        pending.push(PendingRequest {
            item_id: item.item_id,
            request: ClassificationRequest {
                platform: item.platform,
                caption: item.caption,
                transcript: transcript.text.clone(),
            },
        });
    }
    Ok(pending)
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchRun {
    pub pending: usize,
    pub outcome: ReconcileOutcome,
    pub estimated_cost: f64,
}

/// One reconcile step of the batch job.
pub async fn run_classify_batch(
    config: &PipelineConfig,
    store: &ResumeStore,
    provider: Arc<dyn BatchProvider>,
) -> Result<BatchRun> {
    let pending = pending_requests(config, store).await?;
    let count = pending.len();
    let reconciler = BatchReconciler::new(
        provider,
        store.clone(),
        config.layout.batch_job_path(),
        config.layout.batch_requests_path(),
        config.provider.classify_model.clone(),
        config.thresholds,
    );

    let outcome = reconciler.reconcile(pending).await?;
    let estimated_cost = match &outcome {
        ReconcileOutcome::Submitted { requests, .. } => batch_classification_cost(*requests),
        _ => 0.0,
    };
    info!(pending = count, outcome = ?outcome, "batch classification step done");

    Ok(BatchRun {
        pending: count,
        outcome,
        estimated_cost,
    })
}

/// Classify pending items one request each, on the pool.
pub async fn run_classify_sync(
    config: &PipelineConfig,
    store: &ResumeStore,
    classifier: Arc<dyn Classifier>,
    progress: &dyn ProgressSink,
) -> Result<PhaseSummary> {
    let units: Vec<(ItemId, ClassificationRequest)> = pending_requests(config, store)
        .await?
        .into_iter()
        .map(|p| (p.item_id, p.request))
        .collect();
    info!(pending = units.len(), "starting synchronous classification");

    let mut summary = PhaseSummary::new(Stage::Classify);
    summary.estimated_cost = sync_classification_cost(units.len());

    let task_store = store.clone();
    progress.started(Stage::Classify, units.len());
    let results = WorkerPool::new(config.api_workers)
        .run(
            units,
            move |item_id, request| {
                let classifier = Arc::clone(&classifier);
                let store = task_store.clone();
                async move { classify_item(classifier, store, item_id, request).await }
            },
            |result| progress.advanced(result.succeeded),
        )
        .await;
    progress.finished();
    persist_aborted(store, &results).await;

    summary.record_all(&results);
    Ok(summary)
}

async fn classify_item(
    classifier: Arc<dyn Classifier>,
    store: ResumeStore,
    item_id: ItemId,
    request: ClassificationRequest,
) -> StageResult<Classification> {
    let result = match classifier.classify(&request).await {
        Ok(classification) => StageResult::success(item_id, classification),
        Err(e) => {
            debug!(item = %item_id, error = %e, "classification failed");
            StageResult::failure(item_id, e.to_string())
        }
    };
    if let Err(e) = store.put(&result).await {
        error!(item = %result.item_id, error = %e, "could not record classification");
    }
    result
}

/// Drop the batch job record so the next run can submit afresh.
pub async fn discard_batch_job(config: &PipelineConfig) -> Result<Option<BatchJob>> {
    discard_job(&config.layout.batch_job_path()).await
}
