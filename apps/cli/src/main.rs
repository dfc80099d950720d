use std::{
    path::PathBuf,
    process::ExitCode,
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use console::style;
use reelmine_core::{
    Ffmpeg, Layout, OpenAiClient, PipelineConfig, PipelineError, PriceThresholds, ProviderConfig,
    ResumeStore, RetryPolicy, YtDlp, format_duration,
    phases::{classify, extract, ingest, merge, status, subset, transcribe},
    provider::{DEFAULT_BASE_URL, DEFAULT_CLASSIFY_MODEL, DEFAULT_TRANSCRIBE_MODEL},
};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::progress::{BarProgress, create_spinner};

mod output;
mod progress;

#[derive(Parser)]
#[command(name = "reelmine", version)]
#[command(
    about = "Turn Instagram and TikTok exports into a product-marketing dataset: download, transcribe, classify, merge"
)]
struct Cli {
    #[command(flatten)]
    settings: Settings,

    #[command(subcommand)]
    command: Command,
}

/// Every setting can come from the environment (or a sourced `.env`).
#[derive(Args)]
struct Settings {
    /// Directory holding instagram.json and tiktok.json
    #[arg(long, env = "REELMINE_DATA_DIR", default_value = "data", global = true)]
    data_dir: PathBuf,

    /// Directory for intermediate artifacts and the final CSV
    #[arg(long, env = "REELMINE_OUTPUT_DIR", default_value = "output", global = true)]
    output_dir: PathBuf,

    /// Work on items_subset.json (see `reelmine subset`)
    #[arg(long, global = true)]
    subset: bool,

    /// Worker pool width for every phase. Defaults to 10 for media, 8 for API calls
    #[arg(long, env = "REELMINE_WORKERS", global = true)]
    workers: Option<usize>,

    /// Pause before each transcription request, in milliseconds
    #[arg(long, env = "REELMINE_RATE_LIMIT_DELAY_MS", default_value_t = 50, global = true)]
    rate_limit_delay_ms: u64,

    /// Longest audio accepted, in seconds
    #[arg(long, env = "MAX_AUDIO_DURATION", default_value_t = 7200, global = true)]
    max_audio_duration: u64,

    /// Highest low-end price (UGX)
    #[arg(long, env = "LOW_END_MAX", default_value_t = 150_000_000.0, global = true)]
    low_end_max: f64,

    /// Highest medium-end price (UGX)
    #[arg(long, env = "MEDIUM_END_MAX", default_value_t = 400_000_000.0, global = true)]
    medium_end_max: f64,

    /// Retries for transient API failures
    #[arg(long, env = "REELMINE_MAX_RETRIES", default_value_t = 3, global = true)]
    max_retries: u32,

    /// Per-request HTTP timeout, in seconds
    #[arg(long, env = "REELMINE_REQUEST_TIMEOUT_SECS", default_value_t = 120, global = true)]
    request_timeout_secs: u64,

    #[arg(long, env = "OPENAI_BASE_URL", default_value = DEFAULT_BASE_URL, global = true)]
    base_url: String,

    #[arg(long, env = "REELMINE_TRANSCRIBE_MODEL", default_value = DEFAULT_TRANSCRIBE_MODEL, global = true)]
    transcribe_model: String,

    #[arg(long, env = "REELMINE_CLASSIFY_MODEL", default_value = DEFAULT_CLASSIFY_MODEL, global = true)]
    classify_model: String,

    #[arg(long, env = "OPENAI_API_KEY", hide = true, hide_env_values = true, global = true)]
    api_key: Option<String>,
}

impl Settings {
    fn into_config(self) -> PipelineConfig {
        let mut layout = Layout::new(self.data_dir, self.output_dir);
        layout.use_subset = self.subset;

        let mut config = PipelineConfig::new(layout);
        config.provider = ProviderConfig {
            base_url: self.base_url,
            transcribe_model: self.transcribe_model,
            classify_model: self.classify_model,
            api_key: self.api_key,
        };
        config.thresholds = PriceThresholds {
            low_end_max: self.low_end_max,
            medium_end_max: self.medium_end_max,
        };
        if let Some(workers) = self.workers {
            config.media_workers = workers;
            config.api_workers = workers;
        }
        config.rate_limit_delay = Duration::from_millis(self.rate_limit_delay_ms);
        config.max_audio_duration = Duration::from_secs(self.max_audio_duration);
        config.retry = RetryPolicy {
            max_retries: self.max_retries,
            ..RetryPolicy::default()
        };
        config.request_timeout = Duration::from_secs(self.request_timeout_secs);
        config
    }
}

#[derive(Subcommand)]
enum Command {
    /// Parse the platform exports into the item table
    Ingest,
    /// Download videos and extract audio
    Extract,
    /// Transcribe extracted audio
    Transcribe,
    /// Classify promoted products (batch job by default)
    Classify {
        /// Classify with one request per item instead of a batch job
        #[arg(long)]
        sync: bool,

        /// Forget the current batch job record
        #[arg(long, conflicts_with = "sync")]
        discard_job: bool,
    },
    /// Join everything into the final CSV
    Merge,
    /// Show per-stage progress and remaining cost
    Status,
    /// Select the most viewed items that fit a budget
    Subset {
        /// Budget in USD
        #[arg(long)]
        budget: f64,

        /// Account to include first
        #[arg(long)]
        account: Option<String>,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("reelmine=info,reelmine_core=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn openai_client(config: &PipelineConfig) -> Result<Arc<OpenAiClient>, PipelineError> {
    OpenAiClient::new(
        config.provider.clone(),
        config.thresholds,
        config.retry,
        config.request_timeout,
    )
    .map(Arc::new)
}

async fn open_store(config: &PipelineConfig) -> Result<ResumeStore> {
    let root = config.layout.store_dir();
    ResumeStore::open(&root)
        .await
        .with_context(|| format!("opening resume store at {}", root.display()))
}

async fn run(command: Command, config: PipelineConfig) -> Result<()> {
    let started = Instant::now();

    match command {
        Command::Ingest => {
            output::header("Ingest");
            let spinner = create_spinner("Parsing exports...");
            let summary = ingest::run_ingest(&config).await?;
            spinner.finish_and_clear();
            output::ingest(&summary, &config.layout.items_path(), started.elapsed());
        }
        Command::Extract => {
            output::header("Download + extract");
            extract::check_media_tools().await?;
            let store = open_store(&config).await?;
            let adapters = extract::MediaAdapters {
                downloader: Arc::new(YtDlp::new(config.download_timeout)),
                extractor: Arc::new(Ffmpeg::new(config.extract_timeout)),
            };
            let summary =
                extract::run_extract(&config, &store, adapters, &BarProgress::new()).await?;
            output::extract(&summary, started.elapsed());
        }
        Command::Transcribe => {
            output::header("Transcribe");
            let client = openai_client(&config)?;
            let store = open_store(&config).await?;
            let summary =
                transcribe::run_transcribe(&config, &store, client, &BarProgress::new()).await?;
            output::transcribe(&summary, started.elapsed());
        }
        Command::Classify {
            discard_job: true, ..
        } => {
            output::header("Classify");
            let discarded = classify::discard_batch_job(&config).await?;
            output::discarded(discarded.as_ref());
        }
        Command::Classify { sync: true, .. } => {
            output::header("Classify (sync)");
            let client = openai_client(&config)?;
            let store = open_store(&config).await?;
            let summary =
                classify::run_classify_sync(&config, &store, client, &BarProgress::new()).await?;
            output::phase("Classified", &summary, started.elapsed());
        }
        Command::Classify { .. } => {
            output::header("Classify (batch)");
            let client = openai_client(&config)?;
            let store = open_store(&config).await?;
            let spinner = create_spinner("Reconciling batch job...");
            let run = classify::run_classify_batch(&config, &store, client).await?;
            spinner.finish_and_clear();
            output::batch(&run, started.elapsed());
        }
        Command::Merge => {
            output::header("Merge");
            let store = open_store(&config).await?;
            let spinner = create_spinner("Merging stage results...");
            let summary = merge::run_merge(&config, &store).await?;
            spinner.finish_and_clear();
            output::merge(&summary, started.elapsed());
        }
        Command::Status => {
            output::header("Status");
            let store = open_store(&config).await?;
            let report = status::run_status(&config, &store).await?;
            output::status(&report);
        }
        Command::Subset { budget, account } => {
            output::header("Subset");
            let summary = subset::run_subset(&config, budget, account.as_deref()).await?;
            output::subset(&summary, account.as_deref(), &config.layout.subset_path());
        }
    }

    println!(
        "{} {}\n",
        style("Total time:").dim(),
        style(format_duration(started.elapsed())).cyan().bold()
    );
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();
    let config = cli.settings.into_config();

    if let Err(e) = config.validate() {
        eprintln!("{} {}", style("Error:").red().bold(), e);
        return ExitCode::FAILURE;
    }
    debug!(
        data_dir = %config.layout.data_dir.display(),
        output_dir = %config.layout.output_dir.display(),
        subset = config.layout.use_subset,
        "configuration loaded"
    );

    match run(cli.command, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {:#}", style("Error:").red().bold(), e);
            ExitCode::FAILURE
        }
    }
}
