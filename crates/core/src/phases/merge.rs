use std::path::PathBuf;

use tracing::info;

use crate::{
    config::PipelineConfig,
    error::Result,
    merge::{merge, write_csv},
    phases::load_items,
    report::DatasetReport,
    store::ResumeStore,
    types::{Classification, TranscriptRecord},
};

#[derive(Debug, Clone)]
pub struct MergeSummary {
    pub report: DatasetReport,
    pub orphan_transcripts: usize,
    pub orphan_classifications: usize,
    pub output_path: PathBuf,
}

/// Join the item table with every recorded transcript and classification
/// and write the final CSV.
pub async fn run_merge(config: &PipelineConfig, store: &ResumeStore) -> Result<MergeSummary> {
    let items = load_items(&config.layout).await?;
    let transcripts = store.load_all::<TranscriptRecord>().await?;
    let classifications = store.load_all::<Classification>().await?;

    let merged = merge(items, &transcripts, &classifications);
    let output_path = config.layout.final_dataset_path();
    write_csv(&output_path, &merged.records).await?;
    info!(rows = merged.records.len(), path = %output_path.display(), "final dataset written");

    Ok(MergeSummary {
        report: DatasetReport::from_records(&merged.records),
        orphan_transcripts: merged.orphan_transcripts,
        orphan_classifications: merged.orphan_classifications,
        output_path,
    })
}
