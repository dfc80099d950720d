//! Thin wrappers around the external collaborators. Each trait is the only
//! surface the phases see, so tests substitute in-process fakes.

pub mod ffmpeg;
pub mod openai;
pub mod tools;
pub mod ytdlp;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    error::AdapterError,
    types::{Classification, Platform, TranscriptRecord},
};

pub use ffmpeg::Ffmpeg;
pub use openai::OpenAiClient;
pub use ytdlp::YtDlp;

#[async_trait]
pub trait Downloader: Send + Sync {
    /// Download `url` into `dest_dir` as `<stem>.<ext>` and return the file.
    async fn download(&self, url: &str, dest_dir: &Path, stem: &str)
    -> Result<PathBuf, AdapterError>;
}

#[async_trait]
pub trait AudioExtractor: Send + Sync {
    async fn extract(&self, video: &Path, audio: &Path) -> Result<(), AdapterError>;

    async fn probe_duration(&self, audio: &Path) -> Result<f64, AdapterError>;
}

#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio: &Path) -> Result<TranscriptRecord, AdapterError>;
}

/// What the classifier sees about one item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationRequest {
    pub platform: Platform,
    pub caption: String,
    pub transcript: String,
}

#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(
        &self,
        request: &ClassificationRequest,
    ) -> Result<Classification, AdapterError>;
}

/// Provider-side view of a batch job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchStatus {
    pub job_id: String,
    /// Raw provider status string (`validating`, `in_progress`, `completed`, ...).
    pub status: String,
    pub created_at: Option<i64>,
    pub request_counts: RequestCounts,
    pub output_file_id: Option<String>,
    pub error_file_id: Option<String>,
    pub submission_id: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestCounts {
    pub total: u64,
    pub completed: u64,
    pub failed: u64,
}

#[async_trait]
pub trait BatchProvider: Send + Sync {
    /// Upload a JSONL request file, returning its file id.
    async fn upload_requests(&self, jsonl: String) -> Result<String, AdapterError>;

    /// Create a batch over an uploaded file, tagged with `submission_id`.
    async fn create_batch(
        &self,
        input_file_id: &str,
        submission_id: &str,
    ) -> Result<BatchStatus, AdapterError>;

    /// Find a previously created batch carrying `submission_id`, if any.
    async fn find_by_submission(
        &self,
        submission_id: &str,
    ) -> Result<Option<BatchStatus>, AdapterError>;

    async fn retrieve_batch(&self, job_id: &str) -> Result<BatchStatus, AdapterError>;

    async fn download_file(&self, file_id: &str) -> Result<String, AdapterError>;
}
