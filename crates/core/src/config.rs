use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{error::PipelineError, provider::ProviderConfig, retry::RetryPolicy};

/// Price cut points (UGX) separating low-end, medium-end and high-end products.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PriceThresholds {
    pub low_end_max: f64,
    pub medium_end_max: f64,
}

impl Default for PriceThresholds {
    fn default() -> Self {
        Self {
            low_end_max: 150_000_000.0,
            medium_end_max: 400_000_000.0,
        }
    }
}

impl PriceThresholds {
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.low_end_max <= 0.0 || self.medium_end_max <= self.low_end_max {
            return Err(PipelineError::InvalidConfig(format!(
                "price thresholds must satisfy 0 < LOW_END_MAX ({}) < MEDIUM_END_MAX ({})",
                self.low_end_max, self.medium_end_max
            )));
        }
        Ok(())
    }

    pub fn categorize(&self, price: f64) -> &'static str {
        if price <= self.low_end_max {
            "low-end"
        } else if price <= self.medium_end_max {
            "medium-end"
        } else {
            "high-end"
        }
    }
}

/// Everything a phase needs, built once by the binary and passed down.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub provider: ProviderConfig,
    pub thresholds: PriceThresholds,
    pub layout: Layout,
    /// Parallel download+extract workers.
    pub media_workers: usize,
    /// Parallel transcription / sync classification workers.
    pub api_workers: usize,
    pub rate_limit_delay: Duration,
    pub max_audio_duration: Duration,
    pub retry: RetryPolicy,
    pub request_timeout: Duration,
    pub download_timeout: Duration,
    pub extract_timeout: Duration,
}

impl PipelineConfig {
    pub fn new(layout: Layout) -> Self {
        Self {
            provider: ProviderConfig::default(),
            thresholds: PriceThresholds::default(),
            layout,
            media_workers: 10,
            api_workers: 8,
            rate_limit_delay: Duration::from_millis(50),
            max_audio_duration: Duration::from_secs(7200),
            retry: RetryPolicy::default(),
            request_timeout: Duration::from_secs(120),
            download_timeout: Duration::from_secs(300),
            extract_timeout: Duration::from_secs(120),
        }
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        self.thresholds.validate()?;
        if self.max_audio_duration.is_zero() {
            return Err(PipelineError::InvalidConfig(
                "MAX_AUDIO_DURATION must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// On-disk locations of inputs, intermediate artifacts and the final table.
#[derive(Clone, Debug)]
pub struct Layout {
    pub data_dir: PathBuf,
    pub output_dir: PathBuf,
    pub temp_media_dir: PathBuf,
    /// Work on `items_subset.json` instead of the full item table.
    pub use_subset: bool,
}

impl Layout {
    pub fn new(data_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            output_dir: output_dir.into(),
            temp_media_dir: default_temp_media_dir(),
            use_subset: false,
        }
    }

    pub fn instagram_export(&self) -> PathBuf {
        self.data_dir.join("instagram.json")
    }

    pub fn tiktok_export(&self) -> PathBuf {
        self.data_dir.join("tiktok.json")
    }

    /// Ingested item table
    pub fn items_path(&self) -> PathBuf {
        self.output_dir.join("items.json")
    }

    /// Item table the per-item phases work on.
    pub fn working_items_path(&self) -> PathBuf {
        if self.use_subset {
            self.subset_path()
        } else {
            self.items_path()
        }
    }

    pub fn store_dir(&self) -> PathBuf {
        self.output_dir.join("store")
    }

    pub fn audio_dir(&self) -> PathBuf {
        self.output_dir.join("audio")
    }

    pub fn audio_path(&self, item_id: &str) -> PathBuf {
        self.audio_dir().join(format!("{item_id}.mp3"))
    }

    pub fn extraction_table_path(&self) -> PathBuf {
        self.output_dir.join("extraction_results.json")
    }

    pub fn batch_job_path(&self) -> PathBuf {
        self.output_dir.join("batch_job.json")
    }

    pub fn batch_requests_path(&self) -> PathBuf {
        self.output_dir.join("batch_requests.jsonl")
    }

    pub fn final_dataset_path(&self) -> PathBuf {
        self.output_dir.join("viral_database_final.csv")
    }

    pub fn subset_path(&self) -> PathBuf {
        self.output_dir.join("items_subset.json")
    }
}

pub fn default_temp_media_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("reelmine")
        .join("media")
}

/// Fail with a setup error unless `path` exists.
pub fn require_artifact(path: &Path, phase: &str) -> Result<(), PipelineError> {
    if path.exists() {
        Ok(())
    } else {
        Err(PipelineError::MissingArtifact {
            path: path.to_path_buf(),
            phase: phase.to_string(),
        })
    }
}
