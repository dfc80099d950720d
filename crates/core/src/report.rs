//! Phase summaries and dataset statistics.

use std::collections::HashMap;

use crate::{
    stage::{Stage, StagePayload, StageResult},
    types::{FinalRecord, Platform, StageStatus},
};

/// Remaining-work estimate used by `status`: minutes of audio assumed per
/// untranscribed video.
pub const EST_MINUTES_PER_VIDEO: f64 = 2.5;
/// Classification cost assumed per unclassified video by `status`.
pub const EST_CLASSIFY_COST_PER_VIDEO: f64 = 0.002;

/// Counters printed at the end of every phase.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PhaseSummary {
    pub phase: Option<Stage>,
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Items already complete in the store and not touched this run.
    pub skipped: usize,
    pub estimated_cost: f64,
    /// First few failure messages, for the operator.
    pub sample_errors: Vec<String>,
}

const SAMPLE_ERRORS: usize = 5;

impl PhaseSummary {
    pub fn new(phase: Stage) -> Self {
        Self {
            phase: Some(phase),
            ..Self::default()
        }
    }

    pub fn record<T: StagePayload>(&mut self, result: &StageResult<T>) {
        self.processed += 1;
        if result.is_complete() {
            self.succeeded += 1;
        } else {
            self.failed += 1;
            if self.sample_errors.len() < SAMPLE_ERRORS {
                let error = result.error.as_deref().unwrap_or("unknown error");
                self.sample_errors
                    .push(format!("{}: {}", result.item_id, error));
            }
        }
    }

    pub fn record_all<T: StagePayload>(&mut self, results: &[StageResult<T>]) {
        for result in results {
            self.record(result);
        }
    }
}

/// Label counts, most frequent first; ties in label order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Distribution(Vec<(String, usize)>);

impl Distribution {
    pub fn from_labels<'a>(labels: impl IntoIterator<Item = &'a str>) -> Self {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for label in labels.into_iter().filter(|l| !l.is_empty()) {
            *counts.entry(label).or_default() += 1;
        }
        let mut entries: Vec<(String, usize)> = counts
            .into_iter()
            .map(|(label, count)| (label.to_string(), count))
            .collect();
        entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        Self(entries)
    }

    pub fn entries(&self) -> &[(String, usize)] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn count(&self, label: &str) -> usize {
        self.0
            .iter()
            .find(|(l, _)| l == label)
            .map_or(0, |(_, c)| *c)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DatasetReport {
    pub total: usize,
    pub instagram: usize,
    pub tiktok: usize,
    pub with_transcript: usize,
    pub with_classification: usize,
    pub total_views: u64,
    pub average_views: u64,
    pub max_views: u64,
    pub product_categories: Distribution,
    pub spending_categories: Distribution,
    pub languages: Distribution,
}

impl DatasetReport {
    pub fn from_records(records: &[FinalRecord]) -> Self {
        let total = records.len();
        let total_views: u64 = records.iter().map(|r| r.view_count).sum();
        let classified: Vec<&FinalRecord> = records
            .iter()
            .filter(|r| r.classification_status == StageStatus::Ok)
            .collect();
        let transcribed: Vec<&FinalRecord> = records
            .iter()
            .filter(|r| r.transcript_status == StageStatus::Ok)
            .collect();

        Self {
            total,
            instagram: records
                .iter()
                .filter(|r| r.platform == Platform::Instagram)
                .count(),
            tiktok: records
                .iter()
                .filter(|r| r.platform == Platform::TikTok)
                .count(),
            with_transcript: transcribed.len(),
            with_classification: classified.len(),
            total_views,
            average_views: if total == 0 {
                0
            } else {
                total_views / total as u64
            },
            max_views: records.iter().map(|r| r.view_count).max().unwrap_or(0),
            product_categories: Distribution::from_labels(
                classified.iter().map(|r| r.product_category.as_str()),
            ),
            spending_categories: Distribution::from_labels(
                classified
                    .iter()
                    .map(|r| r.intended_spending_category.as_str()),
            ),
            languages: Distribution::from_labels(
                transcribed.iter().map(|r| r.detected_language.as_str()),
            ),
        }
    }
}

/// Per-stage completion counts shown by `status`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusReport {
    pub items: usize,
    pub audio_ready: usize,
    pub transcribed: usize,
    pub transcribe_failed: usize,
    pub classified: usize,
    pub classify_failed: usize,
    pub batch_job: Option<String>,
    pub final_dataset: bool,
}

impl StatusReport {
    pub fn remaining_transcriptions(&self) -> usize {
        self.items.saturating_sub(self.transcribed)
    }

    pub fn remaining_classifications(&self) -> usize {
        self.items.saturating_sub(self.classified)
    }

    pub fn remaining_cost(&self) -> f64 {
        let transcribe = self.remaining_transcriptions() as f64
            * EST_MINUTES_PER_VIDEO
            * crate::provider::TRANSCRIBE_COST_PER_MINUTE;
        let classify = self.remaining_classifications() as f64 * EST_CLASSIFY_COST_PER_VIDEO;
        transcribe + classify
    }
}
