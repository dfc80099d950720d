use crate::error::PipelineError;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_TRANSCRIBE_MODEL: &str = "whisper-1";
pub const DEFAULT_CLASSIFY_MODEL: &str = "gpt-4o-mini";
pub const API_KEY_ENV_VAR: &str = "OPENAI_API_KEY";

/// Whisper price per audio minute (USD).
pub const TRANSCRIBE_COST_PER_MINUTE: f64 = 0.006;
/// Batch pricing per million tokens (USD), batch discount included.
pub const BATCH_INPUT_COST_PER_1M: f64 = 1.25;
pub const BATCH_OUTPUT_COST_PER_1M: f64 = 5.00;
pub const EST_INPUT_TOKENS_PER_REQUEST: u64 = 500;
pub const EST_OUTPUT_TOKENS_PER_REQUEST: u64 = 300;

/// Endpoint and credential for the transcription/classification provider.
#[derive(Clone, Debug)]
pub struct ProviderConfig {
    pub base_url: String,
    pub transcribe_model: String,
    pub classify_model: String,
    pub api_key: Option<String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            transcribe_model: DEFAULT_TRANSCRIBE_MODEL.to_string(),
            classify_model: DEFAULT_CLASSIFY_MODEL.to_string(),
            api_key: None,
        }
    }
}

impl ProviderConfig {
    /// Validate that the API key is set and not a template placeholder
    pub fn validate_api_key(&self) -> Result<&str, PipelineError> {
        match self.api_key.as_deref().map(str::trim) {
            Some(key) if !key.is_empty() && key != "your_openai_api_key_here" => Ok(key),
            _ => Err(PipelineError::MissingCredential {
                env_var: API_KEY_ENV_VAR.to_string(),
            }),
        }
    }

    pub fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

pub fn transcription_cost(duration_secs: f64) -> f64 {
    duration_secs / 60.0 * TRANSCRIBE_COST_PER_MINUTE
}

pub fn batch_classification_cost(requests: usize) -> f64 {
    let requests = requests as f64;
    let input = requests * EST_INPUT_TOKENS_PER_REQUEST as f64;
    let output = requests * EST_OUTPUT_TOKENS_PER_REQUEST as f64;
    input / 1_000_000.0 * BATCH_INPUT_COST_PER_1M + output / 1_000_000.0 * BATCH_OUTPUT_COST_PER_1M
}

/// Synchronous requests pay the full price, twice the batch rate.
pub fn sync_classification_cost(requests: usize) -> f64 {
    batch_classification_cost(requests) * 2.0
}
