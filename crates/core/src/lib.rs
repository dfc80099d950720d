pub mod adapters;
pub mod batch;
pub mod classification;
pub mod config;
pub mod error;
pub mod exports;
pub mod format;
pub mod fsutil;
pub mod identity;
pub mod merge;
pub mod phases;
pub mod pool;
pub mod progress;
pub mod provider;
pub mod report;
pub mod retry;
pub mod stage;
pub mod store;
pub mod types;

pub use adapters::{Ffmpeg, OpenAiClient, YtDlp};
pub use batch::{BatchJob, BatchReconciler, JobStatus, ReconcileOutcome};
pub use config::{Layout, PipelineConfig, PriceThresholds};
pub use error::{AdapterError, PipelineError, Result, StoreError};
pub use format::{format_count, format_dataset_report, format_duration, format_minutes, format_usd};
pub use identity::{ItemId, resolve};
pub use progress::{NoProgress, ProgressSink};
pub use provider::ProviderConfig;
pub use report::{DatasetReport, PhaseSummary, StatusReport};
pub use retry::RetryPolicy;
pub use stage::{Stage, StageResult};
pub use store::ResumeStore;
pub use types::{Classification, FinalRecord, Item, Platform, TranscriptRecord};
