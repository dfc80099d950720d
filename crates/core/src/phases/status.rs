use crate::{
    batch::load_job,
    config::PipelineConfig,
    error::Result,
    fsutil,
    report::StatusReport,
    store::ResumeStore,
    types::{AudioArtifact, Classification, Item, TranscriptRecord},
};

/// Snapshot of how far each stage has got. Never fails on missing artifacts;
/// an empty workspace simply reports zeros.
pub async fn run_status(config: &PipelineConfig, store: &ResumeStore) -> Result<StatusReport> {
    let layout = &config.layout;
    let items_path = layout.working_items_path();
    let items: Vec<Item> = if items_path.exists() {
        fsutil::read_json(&items_path).await?
    } else {
        Vec::new()
    };

    let mut report = StatusReport {
        items: items.len(),
        final_dataset: layout.final_dataset_path().exists(),
        batch_job: load_job(&layout.batch_job_path())
            .await?
            .map(|job| format!("{} ({:?})", job.job_label(), job.status)),
        ..StatusReport::default()
    };

    let audio = store.load_all::<AudioArtifact>().await?;
    let transcripts = store.load_all::<TranscriptRecord>().await?;
    let classifications = store.load_all::<Classification>().await?;
    for item in &items {
        if audio.get(&item.item_id).is_some_and(|r| r.is_complete()) {
            report.audio_ready += 1;
        }
        match transcripts.get(&item.item_id) {
            Some(r) if r.is_complete() => report.transcribed += 1,
            Some(_) => report.transcribe_failed += 1,
            None => {}
        }
        match classifications.get(&item.item_id) {
            Some(r) if r.is_complete() => report.classified += 1,
            Some(_) => report.classify_failed += 1,
            None => {}
        }
    }

    Ok(report)
}
