use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{
    identity::ItemId,
    types::{AudioArtifact, Classification, TranscriptRecord},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Extract,
    Transcribe,
    Classify,
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Extract => "extract",
            Stage::Transcribe => "transcribe",
            Stage::Classify => "classify",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A payload that can be recorded in the resume store.
pub trait StagePayload: Serialize + DeserializeOwned + Send + Sync + 'static {
    const STAGE: Stage;

    /// Whether the payload still describes a usable artifact.
    fn is_consistent(&self) -> bool {
        true
    }
}

impl StagePayload for AudioArtifact {
    const STAGE: Stage = Stage::Extract;

    fn is_consistent(&self) -> bool {
        std::fs::metadata(&self.path)
            .map(|m| m.is_file() && m.len() > 0)
            .unwrap_or(false)
    }
}

impl StagePayload for TranscriptRecord {
    const STAGE: Stage = Stage::Transcribe;
}

impl StagePayload for Classification {
    const STAGE: Stage = Stage::Classify;
}

/// Outcome of running one stage on one item. Never mutated; a retry writes a
/// new result over the old one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult<T> {
    pub item_id: ItemId,
    pub stage: Stage,
    #[serde(rename = "success")]
    pub succeeded: bool,
    pub payload: Option<T>,
    pub error: Option<String>,
    pub finished_at: DateTime<Utc>,
}

impl<T: StagePayload> StageResult<T> {
    pub fn success(item_id: ItemId, payload: T) -> Self {
        Self {
            item_id,
            stage: T::STAGE,
            succeeded: true,
            payload: Some(payload),
            error: None,
            finished_at: Utc::now(),
        }
    }

    pub fn failure(item_id: ItemId, error: impl Into<String>) -> Self {
        Self {
            item_id,
            stage: T::STAGE,
            succeeded: false,
            payload: None,
            error: Some(error.into()),
            finished_at: Utc::now(),
        }
    }

    /// True only for a successful result whose payload is present and intact.
    pub fn is_complete(&self) -> bool {
        self.succeeded && self.payload.as_ref().is_some_and(|p| p.is_consistent())
    }

    /// Payload of a complete result.
    pub fn completed_payload(&self) -> Option<&T> {
        if self.is_complete() {
            self.payload.as_ref()
        } else {
            None
        }
    }
}
