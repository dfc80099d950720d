//! Terminal left outer join of the item table with every stage's results.

use std::{
    collections::{HashMap, HashSet},
    path::Path,
};

use tracing::{debug, warn};

use crate::{
    error::PipelineError,
    fsutil,
    identity::ItemId,
    stage::{StagePayload, StageResult},
    types::{Classification, FinalRecord, Item, StageStatus, TranscriptRecord},
};

#[derive(Debug, Default)]
pub struct MergeOutput {
    pub records: Vec<FinalRecord>,
    /// Stage results whose item is not in the item table.
    pub orphan_transcripts: usize,
    pub orphan_classifications: usize,
}

/// Collapse duplicate ids. The copy with the highest `view_count` wins and
/// takes the slot of the first occurrence; ties keep the first seen.
/// Returns the survivors and the number of dropped duplicates.
pub fn dedupe_items(items: Vec<Item>) -> (Vec<Item>, usize) {
    let mut slots: HashMap<ItemId, usize> = HashMap::with_capacity(items.len());
    let mut kept: Vec<Item> = Vec::with_capacity(items.len());
    let mut dropped = 0;

    for item in items {
        match slots.get(&item.item_id) {
            Some(&slot) => {
                dropped += 1;
                if item.view_count > kept[slot].view_count {
                    kept[slot] = item;
                }
            }
            None => {
                slots.insert(item.item_id.clone(), kept.len());
                kept.push(item);
            }
        }
    }

    (kept, dropped)
}

fn status_of<T: StagePayload>(result: Option<&StageResult<T>>) -> StageStatus {
    match result {
        Some(r) if r.is_complete() => StageStatus::Ok,
        Some(_) => StageStatus::Failed,
        None => StageStatus::Missing,
    }
}

fn count_orphans<T>(results: &HashMap<ItemId, StageResult<T>>, known: &HashSet<&ItemId>) -> usize {
    results.keys().filter(|id| !known.contains(id)).count()
}

/// Exactly one row per distinct item, sorted by `view_count` descending.
pub fn merge(
    items: Vec<Item>,
    transcripts: &HashMap<ItemId, StageResult<TranscriptRecord>>,
    classifications: &HashMap<ItemId, StageResult<Classification>>,
) -> MergeOutput {
    let (items, duplicates) = dedupe_items(items);
    if duplicates > 0 {
        debug!(duplicates, "collapsed duplicate items before merge");
    }

    let known: HashSet<&ItemId> = items.iter().map(|i| &i.item_id).collect();
    let orphan_transcripts = count_orphans(transcripts, &known);
    let orphan_classifications = count_orphans(classifications, &known);
    if orphan_transcripts + orphan_classifications > 0 {
        warn!(
            orphan_transcripts,
            orphan_classifications, "stage results without a matching item were not attached"
        );
    }

    let mut records: Vec<FinalRecord> = items
        .into_iter()
        .map(|item| {
            let transcript = transcripts.get(&item.item_id);
            let classification = classifications.get(&item.item_id);
            final_record(item, transcript, classification)
        })
        .collect();

    // `sort_by` is stable, so equal view counts keep ingestion order.
    records.sort_by(|a, b| b.view_count.cmp(&a.view_count));

    MergeOutput {
        records,
        orphan_transcripts,
        orphan_classifications,
    }
}

fn final_record(
    item: Item,
    transcript: Option<&StageResult<TranscriptRecord>>,
    classification: Option<&StageResult<Classification>>,
) -> FinalRecord {
    let transcript_status = status_of(transcript);
    let classification_status = status_of(classification);
    let t = transcript.and_then(StageResult::completed_payload);
    let c = classification
        .and_then(StageResult::completed_payload)
        .cloned()
        .unwrap_or_default();

    FinalRecord {
        item_id: item.item_id,
        caption: item.caption,
        account_name: item.account_name,
        view_count: item.view_count,
        source_url: item.source_url,
        product_category: c.product_category,
        product_name: c.product_name,
        transcript: t.map(|t| t.text.clone()).unwrap_or_default(),
        platform: item.platform,
        intended_age_category: c.intended_age_category,
        intended_spending_category: c.intended_spending_category,
        likes_count: item.likes_count,
        comments_count: item.comments_count,
        share_count: item.share_count,
        detected_language: t.map(|t| t.language.clone()).unwrap_or_default(),
        audio_duration: t
            .map(|t| format!("{:.2}", t.duration_secs))
            .unwrap_or_default(),
        price_ugx: c.price_ugx.map(|p| format!("{p:.0}")).unwrap_or_default(),
        brand: c.brand,
        product_type: c.product_type,
        niche: c.niche,
        timestamp: item.timestamp,
        transcript_status,
        classification_status,
    }
}

/// Write the final table as CSV through a temp file.
pub async fn write_csv(path: &Path, records: &[FinalRecord]) -> Result<(), PipelineError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for record in records {
        writer.serialize(record)?;
    }
    let bytes = writer.into_inner().map_err(|e| e.into_error())?;
    fsutil::write_atomic(path, &bytes).await?;
    Ok(())
}
