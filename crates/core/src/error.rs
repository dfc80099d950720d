use std::path::PathBuf;
use thiserror::Error;

/// Phase-level errors. Everything here aborts the phase; per-item problems
/// never surface as a `PipelineError`, they become failed stage results.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Required tool `{tool}` is not available: {reason}")]
    MissingTool { tool: String, reason: String },

    #[error("Missing API key: {env_var} environment variable is not set")]
    MissingCredential { env_var: String },

    #[error("Missing upstream artifact {path}. Run `reelmine {phase}` first")]
    MissingArtifact { path: PathBuf, phase: String },

    #[error("No platform exports found: expected {instagram} or {tiktok}")]
    MissingInput { instagram: PathBuf, tiktok: PathBuf },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Adapter error: {0}")]
    Adapter(#[from] AdapterError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
}

/// Failure of one external collaborator call.
#[derive(Error, Debug)]
pub enum AdapterError {
    #[error("`{tool}` exited with {status}: {stderr}")]
    ToolFailed {
        tool: &'static str,
        status: String,
        stderr: String,
    },

    #[error("`{tool}` could not be started: {source}")]
    Spawn {
        tool: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("{operation} timed out after {secs}s")]
    Timeout { operation: String, secs: u64 },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Invalid API response: {0}")]
    InvalidResponse(String),

    #[error("Media rejected: {0}")]
    Rejected(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AdapterError {
    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            AdapterError::Timeout { .. } => true,
            AdapterError::Http(e) => e.is_timeout() || e.is_connect(),
            AdapterError::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
