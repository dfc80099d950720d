//! Life cycle of one bulk classification job.
//!
//! A job record on disk is the only memory between runs. Each call to
//! [`BatchReconciler::reconcile`] advances the record by at most one step and
//! returns; the operator re-runs `classify` until the job has been retrieved.
//!
//! ```text
//! (no record) --submit--> not_submitted --create--> submitted
//! submitted | in_progress --poll--> in_progress | completed | failed
//! completed --retrieve--> (no record, results in the store)
//! failed  (kept until `classify --discard-job`)
//! ```

use std::{
    collections::{HashMap, HashSet},
    io,
    path::{Path, PathBuf},
    sync::Arc,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    adapters::{BatchProvider, BatchStatus, ClassificationRequest, RequestCounts},
    classification::{batch_request_line, parse_chat_completion},
    config::PriceThresholds,
    error::{AdapterError, PipelineError},
    fsutil::{self, Cleanup},
    identity::{ItemId, parse_custom_id},
    stage::StageResult,
    store::ResumeStore,
    types::Classification,
};

const MISSING_FROM_OUTPUT: &str = "missing from batch output";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Intent recorded, provider not yet known to have the job.
    NotSubmitted,
    Submitted,
    InProgress,
    Completed,
    Failed,
}

impl JobStatus {
    /// Map a provider status string. Unknown strings are treated as still
    /// running so a new provider status never ends a job early.
    pub fn from_provider(status: &str) -> Self {
        match status {
            "validating" | "in_progress" | "finalizing" | "cancelling" => JobStatus::InProgress,
            "completed" => JobStatus::Completed,
            "failed" | "expired" | "cancelled" => JobStatus::Failed,
            other => {
                warn!(status = other, "unrecognised batch status, treating as in progress");
                JobStatus::InProgress
            }
        }
    }
}

/// Persisted `batch_job.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchJob {
    pub submission_id: String,
    pub job_id: Option<String>,
    pub input_file_id: Option<String>,
    pub status: JobStatus,
    /// Raw status last reported by the provider.
    #[serde(default)]
    pub provider_status: Option<String>,
    pub submitted_item_ids: Vec<ItemId>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub request_counts: RequestCounts,
    #[serde(default)]
    pub output_file_id: Option<String>,
    #[serde(default)]
    pub error_file_id: Option<String>,
}

impl BatchJob {
    fn intent(submitted_item_ids: Vec<ItemId>) -> Self {
        Self {
            submission_id: Uuid::new_v4().to_string(),
            job_id: None,
            input_file_id: None,
            status: JobStatus::NotSubmitted,
            provider_status: None,
            submitted_item_ids,
            created_at: Utc::now(),
            request_counts: RequestCounts::default(),
            output_file_id: None,
            error_file_id: None,
        }
    }

    fn apply(&mut self, remote: &BatchStatus) {
        self.job_id = Some(remote.job_id.clone());
        self.status = JobStatus::from_provider(&remote.status);
        self.provider_status = Some(remote.status.clone());
        self.request_counts = remote.request_counts;
        self.output_file_id.clone_from(&remote.output_file_id);
        self.error_file_id.clone_from(&remote.error_file_id);
    }

    pub fn job_label(&self) -> String {
        self.job_id
            .clone()
            .unwrap_or_else(|| format!("submission {}", self.submission_id))
    }
}

/// One item waiting for classification.
#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub item_id: ItemId,
    pub request: ClassificationRequest,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetrievalSummary {
    pub succeeded: usize,
    pub failed: usize,
    /// Result lines whose custom id matched no submitted item.
    pub orphans: usize,
    /// Lines that were not valid JSON or carried no custom id.
    pub malformed: usize,
}

/// What one reconcile step did.
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    /// No job on disk and nothing pending.
    Idle,
    Submitted { job_id: String, requests: usize },
    /// An earlier interrupted submission was found at the provider.
    Adopted { job_id: String, status: JobStatus },
    InProgress {
        job_id: String,
        provider_status: String,
        counts: RequestCounts,
    },
    Failed { job_id: String, reason: String },
    Retrieved(RetrievalSummary),
    /// The provider could not be reached; the record is unchanged.
    Stalled { reason: String },
}

pub struct BatchReconciler {
    provider: Arc<dyn BatchProvider>,
    store: ResumeStore,
    job_path: PathBuf,
    requests_path: PathBuf,
    model: String,
    thresholds: PriceThresholds,
}

impl BatchReconciler {
    pub fn new(
        provider: Arc<dyn BatchProvider>,
        store: ResumeStore,
        job_path: PathBuf,
        requests_path: PathBuf,
        model: impl Into<String>,
        thresholds: PriceThresholds,
    ) -> Self {
        Self {
            provider,
            store,
            job_path,
            requests_path,
            model: model.into(),
            thresholds,
        }
    }

    pub async fn load_job(&self) -> Result<Option<BatchJob>, PipelineError> {
        load_job(&self.job_path).await
    }

    async fn save_job(&self, job: &BatchJob) -> Result<(), PipelineError> {
        fsutil::write_json_atomic(&self.job_path, job).await?;
        Ok(())
    }

    /// Advance the job by one step. `pending` is only consulted when no job
    /// record exists.
    pub async fn reconcile(
        &self,
        pending: Vec<PendingRequest>,
    ) -> Result<ReconcileOutcome, PipelineError> {
        let step = match self.load_job().await? {
            None if pending.is_empty() => return Ok(ReconcileOutcome::Idle),
            None => self.submit(pending).await,
            Some(job) if job.job_id.is_none() => self.resume_intent(job).await,
            Some(job) if job.status == JobStatus::Failed => Ok(Ok(failed_outcome(&job))),
            Some(job) => self.poll(job).await,
        };

        match step? {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                warn!(error = %e, "batch provider call failed, job record left as is");
                Ok(ReconcileOutcome::Stalled {
                    reason: e.to_string(),
                })
            }
        }
    }

    async fn submit(
        &self,
        pending: Vec<PendingRequest>,
    ) -> Result<Result<ReconcileOutcome, AdapterError>, PipelineError> {
        let mut jsonl = String::new();
        let mut ids = Vec::with_capacity(pending.len());
        for p in &pending {
            let line = batch_request_line(
                &p.item_id.custom_id(),
                &self.model,
                &p.request,
                &self.thresholds,
            );
            jsonl.push_str(&serde_json::to_string(&line)?);
            jsonl.push('\n');
            ids.push(p.item_id.clone());
        }

        fsutil::write_atomic(&self.requests_path, jsonl.as_bytes()).await?;
        let job = BatchJob::intent(ids);
        self.save_job(&job).await?;
        info!(
            submission = %job.submission_id,
            requests = pending.len(),
            "batch intent recorded"
        );

        self.create(job, jsonl).await
    }

    async fn create(
        &self,
        mut job: BatchJob,
        jsonl: String,
    ) -> Result<Result<ReconcileOutcome, AdapterError>, PipelineError> {
        let file_id = match self.provider.upload_requests(jsonl).await {
            Ok(id) => id,
            Err(e) => return Ok(Err(e)),
        };
        job.input_file_id = Some(file_id.clone());
        self.save_job(&job).await?;

        let remote = match self
            .provider
            .create_batch(&file_id, &job.submission_id)
            .await
        {
            Ok(remote) => remote,
            Err(e) => return Ok(Err(e)),
        };
        job.apply(&remote);
        if job.status == JobStatus::InProgress {
            job.status = JobStatus::Submitted;
        }
        self.save_job(&job).await?;
        info!(job = %remote.job_id, requests = job.submitted_item_ids.len(), "batch job submitted");

        Ok(Ok(ReconcileOutcome::Submitted {
            job_id: remote.job_id,
            requests: job.submitted_item_ids.len(),
        }))
    }

    /// An intent without a job id means the last run stopped somewhere in
    /// upload/create. Adopt the provider's job if it exists, else finish the
    /// submission from the saved request file.
    async fn resume_intent(
        &self,
        mut job: BatchJob,
    ) -> Result<Result<ReconcileOutcome, AdapterError>, PipelineError> {
        match self.provider.find_by_submission(&job.submission_id).await {
            Ok(Some(remote)) => {
                job.apply(&remote);
                self.save_job(&job).await?;
                info!(job = %remote.job_id, submission = %job.submission_id, "adopted interrupted batch submission");
                Ok(Ok(ReconcileOutcome::Adopted {
                    job_id: remote.job_id,
                    status: job.status,
                }))
            }
            Ok(None) => {
                let jsonl = match tokio::fs::read_to_string(&self.requests_path).await {
                    Ok(jsonl) => jsonl,
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {
                        warn!("batch intent has no request file, starting over");
                        fsutil::remove_if_exists(&self.job_path).await?;
                        return Ok(Ok(ReconcileOutcome::Stalled {
                            reason: "interrupted submission could not be resumed; re-run classify"
                                .to_string(),
                        }));
                    }
                    Err(e) => return Err(e.into()),
                };
                debug!(submission = %job.submission_id, "provider has no job for intent, resubmitting");
                self.create(job, jsonl).await
            }
            Err(e) => Ok(Err(e)),
        }
    }

    async fn poll(
        &self,
        mut job: BatchJob,
    ) -> Result<Result<ReconcileOutcome, AdapterError>, PipelineError> {
        let job_id = job.job_label();
        let remote = match self.provider.retrieve_batch(&job_id).await {
            Ok(remote) => remote,
            Err(e) => return Ok(Err(e)),
        };
        job.apply(&remote);
        self.save_job(&job).await?;

        match job.status {
            JobStatus::Completed => self.retrieve(job).await,
            JobStatus::Failed => {
                let outcome = failed_outcome(&job);
                if let ReconcileOutcome::Failed { reason, .. } = &outcome {
                    error!(job = %job_id, reason, "batch job failed");
                }
                Ok(Ok(outcome))
            }
            _ => {
                debug!(job = %job_id, status = %remote.status, "batch job still running");
                Ok(Ok(ReconcileOutcome::InProgress {
                    job_id,
                    provider_status: remote.status,
                    counts: job.request_counts,
                }))
            }
        }
    }

    async fn retrieve(
        &self,
        job: BatchJob,
    ) -> Result<Result<ReconcileOutcome, AdapterError>, PipelineError> {
        let mut payloads = Vec::new();
        for file_id in [&job.output_file_id, &job.error_file_id].into_iter().flatten() {
            match self.provider.download_file(file_id).await {
                Ok(text) => payloads.push(text),
                Err(e) => return Ok(Err(e)),
            }
        }

        let (results, summary) = demultiplex(&job, &payloads, &self.thresholds);
        for result in &results {
            self.store.put(result).await?;
        }
        fsutil::remove_if_exists(&self.job_path).await?;

        info!(
            job = %job.job_label(),
            succeeded = summary.succeeded,
            failed = summary.failed,
            orphans = summary.orphans,
            malformed = summary.malformed,
            "batch results retrieved"
        );
        Ok(Ok(ReconcileOutcome::Retrieved(summary)))
    }
}

/// Job record at `path`, if any.
pub async fn load_job(path: &Path) -> Result<Option<BatchJob>, PipelineError> {
    match fsutil::read_json::<BatchJob>(path).await {
        Ok(job) => Ok(Some(job)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(PipelineError::InvalidConfig(format!(
            "batch job record {} is unreadable ({e}); inspect it or run `reelmine classify --discard-job`",
            path.display()
        ))),
    }
}

/// Remove the job record. The provider-side job, if any, is left alone.
pub async fn discard_job(path: &Path) -> Result<Option<BatchJob>, PipelineError> {
    let job = load_job(path).await.ok().flatten();
    if let Some(job) = &job
        && job.status != JobStatus::Failed
    {
        warn!(
            job = %job.job_label(),
            status = ?job.status,
            "discarding a batch job that has not failed; its results will not be retrieved"
        );
    }
    match fsutil::remove_if_exists(path).await? {
        Cleanup::Removed => info!(path = %path.display(), "batch job record discarded"),
        Cleanup::NotPresent => debug!("no batch job record to discard"),
    }
    Ok(job)
}

fn failed_outcome(job: &BatchJob) -> ReconcileOutcome {
    ReconcileOutcome::Failed {
        job_id: job.job_label(),
        reason: format!(
            "provider status `{}`; clear it with `reelmine classify --discard-job`",
            job.provider_status.as_deref().unwrap_or("failed")
        ),
    }
}

/// Turn result files into exactly one stage result per submitted item.
fn demultiplex(
    job: &BatchJob,
    payloads: &[String],
    thresholds: &PriceThresholds,
) -> (Vec<StageResult<Classification>>, RetrievalSummary) {
    let submitted: HashSet<&ItemId> = job.submitted_item_ids.iter().collect();
    let mut by_item: HashMap<ItemId, StageResult<Classification>> = HashMap::new();
    let mut summary = RetrievalSummary::default();

    let lines = payloads
        .iter()
        .flat_map(|p| p.lines())
        .map(str::trim)
        .filter(|l| !l.is_empty());

    for (line_no, line) in lines.enumerate() {
        let Ok(value) = serde_json::from_str::<Value>(line) else {
            warn!(line = line_no, "skipping malformed batch result line");
            summary.malformed += 1;
            continue;
        };
        let Some(custom_id) = value["custom_id"].as_str() else {
            warn!(line = line_no, "skipping batch result line without custom_id");
            summary.malformed += 1;
            continue;
        };
        let Some(item_id) = parse_custom_id(custom_id).filter(|id| submitted.contains(id)) else {
            warn!(custom_id, "batch result matches no submitted item, dropping");
            summary.orphans += 1;
            continue;
        };
        if by_item.contains_key(&item_id) {
            warn!(custom_id, "duplicate batch result line, keeping the first");
            continue;
        }

        let result = match sub_request_outcome(&value, thresholds) {
            Ok(classification) => StageResult::success(item_id.clone(), classification),
            Err(reason) => {
                debug!(item = %item_id, reason, "batch sub-request failed");
                StageResult::failure(item_id.clone(), reason)
            }
        };
        by_item.insert(item_id, result);
    }

    for item_id in &job.submitted_item_ids {
        by_item
            .entry(item_id.clone())
            .or_insert_with(|| StageResult::failure(item_id.clone(), MISSING_FROM_OUTPUT));
    }

    let results: Vec<_> = job
        .submitted_item_ids
        .iter()
        .filter_map(|id| by_item.remove(id))
        .collect();
    summary.succeeded = results.iter().filter(|r| r.succeeded).count();
    summary.failed = results.len() - summary.succeeded;
    (results, summary)
}

fn sub_request_outcome(
    line: &Value,
    thresholds: &PriceThresholds,
) -> Result<Classification, String> {
    let error = &line["error"];
    if !error.is_null() {
        let message = error["message"].as_str().unwrap_or("unknown error");
        return Err(format!("batch request error: {message}"));
    }

    let response = &line["response"];
    let status = response["status_code"].as_u64().unwrap_or(0);
    if status != 200 {
        let message = response["body"]["error"]["message"]
            .as_str()
            .unwrap_or("no error message");
        return Err(format!("batch request returned {status}: {message}"));
    }

    parse_chat_completion(&response["body"], thresholds).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;
    use crate::{identity::resolve, types::Platform};

    #[derive(Default)]
    struct Calls {
        uploads: usize,
        creates: usize,
        finds: usize,
        retrievals: usize,
        downloads: usize,
    }

    struct FakeProvider {
        calls: Mutex<Calls>,
        remote_status: Mutex<String>,
        adoptable: Option<String>,
        output: String,
        uploaded: Mutex<Vec<String>>,
    }

    impl FakeProvider {
        fn new(remote_status: &str) -> Self {
            Self {
                calls: Mutex::new(Calls::default()),
                remote_status: Mutex::new(remote_status.to_string()),
                adoptable: None,
                output: String::new(),
                uploaded: Mutex::new(Vec::new()),
            }
        }

        fn status(&self, job_id: &str, submission_id: Option<String>) -> BatchStatus {
            let status = self.remote_status.lock().unwrap().clone();
            BatchStatus {
                job_id: job_id.to_string(),
                output_file_id: (status == "completed").then(|| "file-out".to_string()),
                status,
                created_at: Some(1_714_508_499),
                request_counts: RequestCounts::default(),
                error_file_id: None,
                submission_id,
            }
        }
    }

    #[async_trait]
    impl BatchProvider for FakeProvider {
        async fn upload_requests(&self, jsonl: String) -> Result<String, AdapterError> {
            self.calls.lock().unwrap().uploads += 1;
            self.uploaded.lock().unwrap().push(jsonl);
            Ok("file-in".to_string())
        }

        async fn create_batch(
            &self,
            _input_file_id: &str,
            submission_id: &str,
        ) -> Result<BatchStatus, AdapterError> {
            self.calls.lock().unwrap().creates += 1;
            Ok(self.status("batch_new", Some(submission_id.to_string())))
        }

        async fn find_by_submission(
            &self,
            submission_id: &str,
        ) -> Result<Option<BatchStatus>, AdapterError> {
            self.calls.lock().unwrap().finds += 1;
            Ok(self
                .adoptable
                .as_ref()
                .filter(|s| s.as_str() == submission_id)
                .map(|s| self.status("batch_adopted", Some(s.clone()))))
        }

        async fn retrieve_batch(&self, job_id: &str) -> Result<BatchStatus, AdapterError> {
            self.calls.lock().unwrap().retrievals += 1;
            Ok(self.status(job_id, None))
        }

        async fn download_file(&self, _file_id: &str) -> Result<String, AdapterError> {
            self.calls.lock().unwrap().downloads += 1;
            Ok(self.output.clone())
        }
    }

    struct Harness {
        _dir: TempDir,
        provider: Arc<FakeProvider>,
        reconciler: BatchReconciler,
        store: ResumeStore,
        job_path: PathBuf,
        requests_path: PathBuf,
    }

    async fn harness(provider: FakeProvider) -> Harness {
        let dir = TempDir::new().unwrap();
        let store = ResumeStore::open(dir.path().join("store")).await.unwrap();
        let provider = Arc::new(provider);
        let job_path = dir.path().join("batch_job.json");
        let requests_path = dir.path().join("batch_requests.jsonl");
        let reconciler = BatchReconciler::new(
            provider.clone(),
            store.clone(),
            job_path.clone(),
            requests_path.clone(),
            "gpt-4o-mini",
            PriceThresholds::default(),
        );
        Harness {
            _dir: dir,
            provider,
            reconciler,
            store,
            job_path,
            requests_path,
        }
    }

    fn pending(urls: &[&str]) -> Vec<PendingRequest> {
        urls.iter()
            .map(|url| PendingRequest {
                item_id: resolve(url).unwrap(),
                request: ClassificationRequest {
                    platform: Platform::TikTok,
                    caption: format!("caption for {url}"),
                    transcript: String::new(),
                },
            })
            .collect()
    }

    fn submitted_job(ids: Vec<ItemId>) -> BatchJob {
        BatchJob {
            job_id: Some("batch_existing".to_string()),
            status: JobStatus::Submitted,
            input_file_id: Some("file-in".to_string()),
            ..BatchJob::intent(ids)
        }
    }

    fn success_line(id: &ItemId, content: &str) -> String {
        json!({
            "id": "batch_req_1",
            "custom_id": id.custom_id(),
            "response": {
                "status_code": 200,
                "body": { "choices": [ { "message": { "content": content } } ] }
            },
            "error": null
        })
        .to_string()
    }

    #[tokio::test]
    async fn rerun_polls_instead_of_submitting_again() {
        let h = harness(FakeProvider::new("validating")).await;

        let first = h.reconciler.reconcile(pending(&["a", "b"])).await.unwrap();
        assert_eq!(
            first,
            ReconcileOutcome::Submitted {
                job_id: "batch_new".into(),
                requests: 2
            }
        );
        let job = h.reconciler.load_job().await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Submitted);
        assert_eq!(job.input_file_id.as_deref(), Some("file-in"));

        let second = h.reconciler.reconcile(pending(&["a", "b"])).await.unwrap();
        assert!(matches!(second, ReconcileOutcome::InProgress { .. }));

        let calls = h.provider.calls.lock().unwrap();
        assert_eq!(calls.creates, 1);
        assert_eq!(calls.uploads, 1);
        assert_eq!(calls.retrievals, 1);
    }

    #[tokio::test]
    async fn persisted_submitted_job_gets_one_poll_and_no_submission() {
        let h = harness(FakeProvider::new("in_progress")).await;
        let ids = pending(&["a"]).into_iter().map(|p| p.item_id).collect();
        fsutil::write_json_atomic(&h.job_path, &submitted_job(ids))
            .await
            .unwrap();

        let outcome = h.reconciler.reconcile(pending(&["a", "c"])).await.unwrap();

        assert!(matches!(outcome, ReconcileOutcome::InProgress { ref provider_status, .. } if provider_status == "in_progress"));
        let calls = h.provider.calls.lock().unwrap();
        assert_eq!(calls.creates, 0);
        assert_eq!(calls.uploads, 0);
        assert_eq!(calls.retrievals, 1);
    }

    #[tokio::test]
    async fn interrupted_submission_is_adopted() {
        let ids: Vec<ItemId> = pending(&["a"]).into_iter().map(|p| p.item_id).collect();
        let intent = BatchJob::intent(ids);
        let mut provider = FakeProvider::new("in_progress");
        provider.adoptable = Some(intent.submission_id.clone());
        let h = harness(provider).await;
        fsutil::write_json_atomic(&h.job_path, &intent).await.unwrap();

        let outcome = h.reconciler.reconcile(pending(&["a"])).await.unwrap();

        assert_eq!(
            outcome,
            ReconcileOutcome::Adopted {
                job_id: "batch_adopted".into(),
                status: JobStatus::InProgress
            }
        );
        let job = h.reconciler.load_job().await.unwrap().unwrap();
        assert_eq!(job.job_id.as_deref(), Some("batch_adopted"));
        assert_eq!(job.submission_id, intent.submission_id);
        assert_eq!(h.provider.calls.lock().unwrap().creates, 0);
    }

    #[tokio::test]
    async fn unknown_intent_is_resubmitted_from_the_saved_requests() {
        let ids: Vec<ItemId> = pending(&["a"]).into_iter().map(|p| p.item_id).collect();
        let intent = BatchJob::intent(ids);
        let h = harness(FakeProvider::new("validating")).await;
        fsutil::write_json_atomic(&h.job_path, &intent).await.unwrap();
        let saved = "{\"custom_id\":\"saved-line\"}\n";
        fsutil::write_atomic(&h.requests_path, saved.as_bytes())
            .await
            .unwrap();

        let outcome = h.reconciler.reconcile(pending(&["a", "b"])).await.unwrap();

        assert_eq!(
            outcome,
            ReconcileOutcome::Submitted {
                job_id: "batch_new".into(),
                requests: 1
            }
        );
        {
            let calls = h.provider.calls.lock().unwrap();
            assert_eq!(calls.finds, 1);
            assert_eq!(calls.creates, 1);
        }
        assert_eq!(h.provider.uploaded.lock().unwrap().as_slice(), [saved]);
        let job = h.reconciler.load_job().await.unwrap().unwrap();
        assert_eq!(job.submission_id, intent.submission_id);
        assert_eq!(job.job_id.as_deref(), Some("batch_new"));
    }

    #[tokio::test]
    async fn intent_without_request_file_is_dropped() {
        let ids: Vec<ItemId> = pending(&["a"]).into_iter().map(|p| p.item_id).collect();
        let h = harness(FakeProvider::new("validating")).await;
        fsutil::write_json_atomic(&h.job_path, &BatchJob::intent(ids))
            .await
            .unwrap();

        let outcome = h.reconciler.reconcile(pending(&["a"])).await.unwrap();

        assert!(matches!(outcome, ReconcileOutcome::Stalled { .. }));
        assert!(!h.job_path.exists());
        assert_eq!(h.provider.calls.lock().unwrap().creates, 0);
    }

    #[tokio::test]
    async fn completed_job_is_demultiplexed_into_the_store() {
        let [a, b, c]: [ItemId; 3] = ["a", "b", "c"].map(|u| resolve(u).unwrap());

        let mut provider = FakeProvider::new("completed");
        provider.output = [
            success_line(&a, r#"{"product_name": "Lexus LX600", "price_ugx": 650000000, "product_type": "vehicle"}"#),
            json!({
                "custom_id": b.custom_id(),
                "response": { "status_code": 429, "body": { "error": { "message": "rate limited" } } },
                "error": null
            })
            .to_string(),
            json!({
                "custom_id": "classify-unknown123",
                "response": { "status_code": 200, "body": {} },
                "error": null
            })
            .to_string(),
            "{not json".to_string(),
        ]
        .join("\n");
        let h = harness(provider).await;
        fsutil::write_json_atomic(&h.job_path, &submitted_job(vec![a.clone(), b.clone(), c.clone()]))
            .await
            .unwrap();

        let outcome = h.reconciler.reconcile(Vec::new()).await.unwrap();

        assert_eq!(
            outcome,
            ReconcileOutcome::Retrieved(RetrievalSummary {
                succeeded: 1,
                failed: 2,
                orphans: 1,
                malformed: 1
            })
        );

        let a_result = h.store.get::<Classification>(&a).await.unwrap();
        let a_payload = a_result.completed_payload().unwrap();
        assert_eq!(a_payload.product_name, "Lexus LX600");
        assert_eq!(a_payload.product_category, "high-end");

        let b_result = h.store.get::<Classification>(&b).await.unwrap();
        assert!(!b_result.succeeded);
        assert!(b_result.error.unwrap().contains("429"));

        let c_result = h.store.get::<Classification>(&c).await.unwrap();
        assert_eq!(c_result.error.as_deref(), Some(MISSING_FROM_OUTPUT));

        assert_eq!(h.store.load_all::<Classification>().await.unwrap().len(), 3);
        assert!(h.reconciler.load_job().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn failed_job_is_terminal_until_discarded() {
        let h = harness(FakeProvider::new("expired")).await;
        let ids = pending(&["a"]).into_iter().map(|p| p.item_id).collect();
        fsutil::write_json_atomic(&h.job_path, &submitted_job(ids))
            .await
            .unwrap();

        let first = h.reconciler.reconcile(Vec::new()).await.unwrap();
        assert!(matches!(first, ReconcileOutcome::Failed { ref reason, .. } if reason.contains("expired")));

        let second = h.reconciler.reconcile(pending(&["a"])).await.unwrap();
        assert!(matches!(second, ReconcileOutcome::Failed { .. }));
        assert_eq!(h.provider.calls.lock().unwrap().retrievals, 1);
        assert_eq!(h.provider.calls.lock().unwrap().creates, 0);

        let discarded = discard_job(&h.job_path).await.unwrap();
        assert_eq!(discarded.map(|j| j.status), Some(JobStatus::Failed));
        assert!(h.reconciler.load_job().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn nothing_pending_and_no_job_is_idle() {
        let h = harness(FakeProvider::new("completed")).await;
        assert_eq!(
            h.reconciler.reconcile(Vec::new()).await.unwrap(),
            ReconcileOutcome::Idle
        );
        assert_eq!(h.provider.calls.lock().unwrap().uploads, 0);
    }

    #[test]
    fn provider_statuses_map_onto_job_states() {
        assert_eq!(JobStatus::from_provider("finalizing"), JobStatus::InProgress);
        assert_eq!(JobStatus::from_provider("cancelling"), JobStatus::InProgress);
        assert_eq!(JobStatus::from_provider("completed"), JobStatus::Completed);
        assert_eq!(JobStatus::from_provider("cancelled"), JobStatus::Failed);
        assert_eq!(JobStatus::from_provider("something_new"), JobStatus::InProgress);
    }
}
