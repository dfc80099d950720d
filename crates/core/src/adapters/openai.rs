use std::{path::Path, time::Duration};

use async_trait::async_trait;
use reqwest::{
    Response,
    multipart::{Form, Part},
};
use serde_json::{Value, json};
use tokio::fs;
use tracing::debug;

use crate::{
    adapters::{
        BatchProvider, BatchStatus, ClassificationRequest, Classifier, RequestCounts, Transcriber,
    },
    classification::{CHAT_COMPLETIONS_PATH, chat_body, parse_chat_completion},
    config::PriceThresholds,
    error::{AdapterError, PipelineError},
    provider::ProviderConfig,
    retry::RetryPolicy,
};

const SUBMISSION_METADATA_KEY: &str = "submission_id";
const BATCH_LIST_LIMIT: u32 = 100;

/// Credentialed client for the OpenAI-compatible API. Built once per phase and
/// handed to whatever needs it.
pub struct OpenAiClient {
    http: reqwest::Client,
    config: ProviderConfig,
    api_key: String,
    retry: RetryPolicy,
    thresholds: PriceThresholds,
}

impl OpenAiClient {
    pub fn new(
        config: ProviderConfig,
        thresholds: PriceThresholds,
        retry: RetryPolicy,
        request_timeout: Duration,
    ) -> Result<Self, PipelineError> {
        let api_key = config.validate_api_key()?.to_string();
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| PipelineError::InvalidConfig(format!("HTTP client: {e}")))?;

        Ok(Self {
            http,
            config,
            api_key,
            retry,
            thresholds,
        })
    }

    fn auth(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request.header("Authorization", format!("Bearer {}", self.api_key))
    }

    async fn get_json(&self, path: &str) -> Result<Value, AdapterError> {
        let url = self.config.endpoint(path);
        self.retry
            .run(path, || async {
                let response = self.auth(self.http.get(&url)).send().await?;
                Ok(check(response).await?.json::<Value>().await?)
            })
            .await
    }
}

/// Map non-2xx responses to [`AdapterError::Api`] with the body text.
async fn check(response: Response) -> Result<Response, AdapterError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(AdapterError::Api {
        status: status.as_u16(),
        body,
    })
}

fn parse_batch(value: &Value) -> Result<BatchStatus, AdapterError> {
    let job_id = value["id"]
        .as_str()
        .ok_or_else(|| AdapterError::InvalidResponse(format!("batch without id: {value}")))?;
    let status = value["status"]
        .as_str()
        .ok_or_else(|| AdapterError::InvalidResponse(format!("batch without status: {value}")))?;

    let request_counts = value
        .get("request_counts")
        .filter(|v| !v.is_null())
        .map(|v| serde_json::from_value::<RequestCounts>(v.clone()))
        .transpose()?
        .unwrap_or_default();

    let string_field = |key: &str| value[key].as_str().map(str::to_string);

    Ok(BatchStatus {
        job_id: job_id.to_string(),
        status: status.to_string(),
        created_at: value["created_at"].as_i64(),
        request_counts,
        output_file_id: string_field("output_file_id"),
        error_file_id: string_field("error_file_id"),
        submission_id: value["metadata"][SUBMISSION_METADATA_KEY]
            .as_str()
            .map(str::to_string),
    })
}

#[async_trait]
impl Transcriber for OpenAiClient {
    async fn transcribe(
        &self,
        audio: &Path,
    ) -> Result<crate::types::TranscriptRecord, AdapterError> {
        let bytes = fs::read(audio).await?;
        let file_name = audio
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "audio.mp3".to_string());
        let url = self.config.endpoint("/audio/transcriptions");

        let body = self
            .retry
            .run("transcribe", || async {
                // Forms are consumed by send, so each attempt builds its own.
                let part = Part::bytes(bytes.clone())
                    .file_name(file_name.clone())
                    .mime_str("audio/mpeg")?;
                let form = Form::new()
                    .text("model", self.config.transcribe_model.clone())
                    .text("response_format", "verbose_json")
                    .part("file", part);

                let response = self
                    .auth(self.http.post(&url))
                    .multipart(form)
                    .send()
                    .await?;
                Ok(check(response).await?.json::<Value>().await?)
            })
            .await?;

        parse_transcription(&body)
    }
}

fn parse_transcription(body: &Value) -> Result<crate::types::TranscriptRecord, AdapterError> {
    let text = body["text"]
        .as_str()
        .ok_or_else(|| AdapterError::InvalidResponse("transcription without text".into()))?;

    Ok(crate::types::TranscriptRecord {
        text: text.trim().to_string(),
        language: body["language"].as_str().unwrap_or("unknown").to_string(),
        duration_secs: body["duration"].as_f64().unwrap_or(0.0),
    })
}

#[async_trait]
impl Classifier for OpenAiClient {
    async fn classify(
        &self,
        request: &ClassificationRequest,
    ) -> Result<crate::types::Classification, AdapterError> {
        let url = self.config.endpoint(CHAT_COMPLETIONS_PATH.trim_start_matches("/v1"));
        let body = chat_body(&self.config.classify_model, request, &self.thresholds);

        let response = self
            .retry
            .run("classify", || async {
                let response = self.auth(self.http.post(&url)).json(&body).send().await?;
                Ok(check(response).await?.json::<Value>().await?)
            })
            .await?;

        parse_chat_completion(&response, &self.thresholds)
    }
}

#[async_trait]
impl BatchProvider for OpenAiClient {
    async fn upload_requests(&self, jsonl: String) -> Result<String, AdapterError> {
        let url = self.config.endpoint("/files");

        let uploaded = self
            .retry
            .run("upload batch file", || async {
                let part = Part::bytes(jsonl.clone().into_bytes())
                    .file_name("batch_requests.jsonl")
                    .mime_str("application/jsonl")?;
                let form = Form::new().text("purpose", "batch").part("file", part);
                let response = self
                    .auth(self.http.post(&url))
                    .multipart(form)
                    .send()
                    .await?;
                Ok(check(response).await?.json::<Value>().await?)
            })
            .await?;

        let file_id = uploaded["id"]
            .as_str()
            .ok_or_else(|| AdapterError::InvalidResponse(format!("upload without id: {uploaded}")))?;
        debug!(file_id, "batch input uploaded");
        Ok(file_id.to_string())
    }

    async fn create_batch(
        &self,
        input_file_id: &str,
        submission_id: &str,
    ) -> Result<BatchStatus, AdapterError> {
        // Not retried: a timed-out create may still have succeeded, and the
        // reconciler recovers it through `find_by_submission`.
        let response = self
            .auth(self.http.post(self.config.endpoint("/batches")))
            .json(&json!({
                "input_file_id": input_file_id,
                "endpoint": CHAT_COMPLETIONS_PATH,
                "completion_window": "24h",
                "metadata": { SUBMISSION_METADATA_KEY: submission_id },
            }))
            .send()
            .await?;
        let created = check(response).await?.json::<Value>().await?;
        parse_batch(&created)
    }

    async fn find_by_submission(
        &self,
        submission_id: &str,
    ) -> Result<Option<BatchStatus>, AdapterError> {
        let listing = self
            .get_json(&format!("/batches?limit={BATCH_LIST_LIMIT}"))
            .await?;
        let Some(batches) = listing["data"].as_array() else {
            return Err(AdapterError::InvalidResponse(
                "batch listing without data".into(),
            ));
        };

        batches
            .iter()
            .find(|b| b["metadata"][SUBMISSION_METADATA_KEY].as_str() == Some(submission_id))
            .map(parse_batch)
            .transpose()
    }

    async fn retrieve_batch(&self, job_id: &str) -> Result<BatchStatus, AdapterError> {
        let value = self.get_json(&format!("/batches/{job_id}")).await?;
        parse_batch(&value)
    }

    async fn download_file(&self, file_id: &str) -> Result<String, AdapterError> {
        let url = self.config.endpoint(&format!("/files/{file_id}/content"));
        self.retry
            .run("download batch file", || async {
                let response = self.auth(self.http.get(&url)).send().await?;
                Ok(check(response).await?.text().await?)
            })
            .await
    }
}
