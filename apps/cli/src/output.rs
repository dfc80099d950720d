use std::{path::Path, time::Duration};

use console::{StyledObject, style};
use reelmine_core::{
    BatchJob, PhaseSummary, ReconcileOutcome, StatusReport, format_count, format_dataset_report,
    format_duration, format_minutes, format_usd,
    phases::{
        classify::BatchRun, extract::ExtractSummary, ingest::IngestSummary, merge::MergeSummary,
        subset::SubsetSummary, transcribe::TranscribeSummary,
    },
};

fn check() -> StyledObject<&'static str> {
    style("✓").green().bold()
}

fn cross() -> StyledObject<&'static str> {
    style("✗").red().bold()
}

fn rule() {
    println!("{}", style("─".repeat(60)).dim());
}

fn took(elapsed: Duration) -> StyledObject<String> {
    style(format!("[{}]", format_duration(elapsed))).dim()
}

pub fn header(phase: &str) {
    println!(
        "\n{}  {}\n",
        style("reelmine").cyan().bold(),
        style(phase).dim()
    );
    rule();
}

fn failures(summary: &PhaseSummary) {
    for error in &summary.sample_errors {
        println!("  {} {}", cross(), style(error).dim());
    }
    if summary.failed > summary.sample_errors.len() {
        println!(
            "  {}",
            style(format!(
                "... and {} more",
                summary.failed - summary.sample_errors.len()
            ))
            .dim()
        );
    }
}

pub fn phase(label: &str, summary: &PhaseSummary, elapsed: Duration) {
    println!(
        "{} {}: {} ok, {} failed, {} already done {}",
        check(),
        label,
        style(summary.succeeded).green(),
        style(summary.failed).red(),
        summary.skipped,
        took(elapsed)
    );
    if summary.estimated_cost > 0.0 {
        println!(
            "  {} {}",
            style("Estimated cost:").dim(),
            style(format_usd(summary.estimated_cost)).yellow()
        );
    }
    failures(summary);
}

pub fn ingest(summary: &IngestSummary, items_path: &Path, elapsed: Duration) {
    println!(
        "{} Ingested {} items (Instagram {}, TikTok {}) {}",
        check(),
        style(summary.total).cyan().bold(),
        summary.instagram,
        summary.tiktok,
        took(elapsed)
    );
    println!(
        "  {} {} total views",
        style("Views:").dim(),
        format_count(summary.total_views)
    );
    if summary.malformed + summary.filtered + summary.duplicates > 0 {
        println!(
            "  {} {} malformed, {} non-video, {} duplicates",
            style("Dropped:").dim(),
            summary.malformed,
            summary.filtered,
            summary.duplicates
        );
    }
    println!(
        "  {} {}",
        style("Saved:").dim(),
        style(items_path.display()).cyan()
    );
}

pub fn extract(summary: &ExtractSummary, elapsed: Duration) {
    phase("Audio extracted", &summary.phase, elapsed);
    println!(
        "  {} {} of audio ready, transcription would cost about {}",
        style("Audio:").dim(),
        format_minutes(summary.total_audio_secs),
        style(format_usd(reelmine_core::provider::transcription_cost(
            summary.total_audio_secs
        )))
        .yellow()
    );
    println!(
        "  {} {}",
        style("Saved:").dim(),
        style(summary.table_path.display()).cyan()
    );
}

pub fn transcribe(summary: &TranscribeSummary, elapsed: Duration) {
    phase("Transcribed", &summary.phase, elapsed);
    println!(
        "  {} {} transcribed this run",
        style("Audio:").dim(),
        format_minutes(summary.transcribed_secs)
    );
    if summary.blocked > 0 {
        println!(
            "  {} {} items have no audio yet (run `reelmine extract`)",
            style("Waiting:").dim(),
            summary.blocked
        );
    }
}

pub fn batch(run: &BatchRun, elapsed: Duration) {
    match &run.outcome {
        ReconcileOutcome::Idle => {
            println!("{} Nothing left to classify {}", check(), took(elapsed));
        }
        ReconcileOutcome::Submitted { job_id, requests } => {
            println!(
                "{} Submitted batch {} with {} requests {}",
                check(),
                style(job_id).cyan(),
                requests,
                took(elapsed)
            );
            println!(
                "  {} {}",
                style("Estimated cost:").dim(),
                style(format_usd(run.estimated_cost)).yellow()
            );
            println!(
                "  {}",
                style("Re-run `reelmine classify` to check on it").dim()
            );
        }
        ReconcileOutcome::Adopted { job_id, status } => {
            println!(
                "{} Recovered interrupted submission as batch {} ({:?}) {}",
                check(),
                style(job_id).cyan(),
                status,
                took(elapsed)
            );
        }
        ReconcileOutcome::InProgress {
            job_id,
            provider_status,
            counts,
        } => {
            println!(
                "{} Batch {} is {}: {}/{} done, {} failed {}",
                style("…").yellow().bold(),
                style(job_id).cyan(),
                style(provider_status).yellow(),
                counts.completed,
                counts.total,
                counts.failed,
                took(elapsed)
            );
        }
        ReconcileOutcome::Failed { job_id, reason } => {
            println!(
                "{} Batch {} failed: {}",
                cross(),
                style(job_id).cyan(),
                reason
            );
        }
        ReconcileOutcome::Retrieved(summary) => {
            println!(
                "{} Retrieved: {} ok, {} failed {}",
                check(),
                style(summary.succeeded).green(),
                style(summary.failed).red(),
                took(elapsed)
            );
            if summary.orphans + summary.malformed > 0 {
                println!(
                    "  {} {} unknown ids, {} unreadable lines",
                    style("Ignored:").dim(),
                    summary.orphans,
                    summary.malformed
                );
            }
            println!("  {}", style("Next: `reelmine merge`").dim());
        }
        ReconcileOutcome::Stalled { reason } => {
            println!(
                "{} Provider unavailable, nothing changed: {}",
                style("!").yellow().bold(),
                reason
            );
        }
    }
}

pub fn discarded(job: Option<&BatchJob>) {
    match job {
        Some(job) => println!(
            "{} Discarded batch job {} ({:?})",
            check(),
            style(job.job_label()).cyan(),
            job.status
        ),
        None => println!("{} No batch job on record", check()),
    }
}

pub fn merge(summary: &MergeSummary, elapsed: Duration) {
    println!(
        "{} Final dataset: {} rows {}",
        check(),
        style(summary.report.total).cyan().bold(),
        took(elapsed)
    );
    let orphans = summary.orphan_transcripts + summary.orphan_classifications;
    if orphans > 0 {
        println!(
            "  {} {} stage results had no matching item",
            style("Ignored:").dim(),
            orphans
        );
    }
    println!(
        "  {} {}",
        style("Saved:").dim(),
        style(summary.output_path.display()).cyan()
    );
    rule();
    println!("{}", format_dataset_report(&summary.report));
}

pub fn status(report: &StatusReport) {
    let line = |label: &str, done: usize, failed: usize| {
        println!(
            "  {:<14} {:>6} / {:<6} {}",
            label,
            style(done).green(),
            report.items,
            if failed > 0 {
                style(format!("({failed} failed)")).red().to_string()
            } else {
                String::new()
            }
        );
    };

    println!("  {:<14} {:>6}", "Items", style(report.items).cyan().bold());
    line("Audio", report.audio_ready, 0);
    line("Transcribed", report.transcribed, report.transcribe_failed);
    line("Classified", report.classified, report.classify_failed);
    println!(
        "  {:<14} {}",
        "Batch job",
        report.batch_job.as_deref().unwrap_or("none")
    );
    println!(
        "  {:<14} {}",
        "Final CSV",
        if report.final_dataset {
            style("written").green()
        } else {
            style("not yet").dim()
        }
    );
    rule();
    println!(
        "  {} {} transcriptions, {} classifications, about {}",
        style("Remaining:").dim(),
        report.remaining_transcriptions(),
        report.remaining_classifications(),
        style(format_usd(report.remaining_cost())).yellow()
    );
}

pub fn subset(summary: &SubsetSummary, account: Option<&str>, path: &Path) {
    println!(
        "{} Selected {} of {} items, about {}",
        check(),
        style(summary.selected).cyan().bold(),
        summary.available,
        style(format_usd(summary.estimated_cost)).yellow()
    );
    if let Some(account) = account {
        println!(
            "  {} {} items from {}",
            style("Focus:").dim(),
            summary.focused,
            account
        );
    }
    println!(
        "  {} {}",
        style("Views:").dim(),
        format_count(summary.total_views)
    );
    for (name, count, views) in &summary.accounts {
        println!("  • {}: {} videos ({} views)", name, count, format_count(*views));
    }
    println!("  {} {}", style("Saved:").dim(), style(path.display()).cyan());
    println!(
        "  {}",
        style("Pass --subset to the other commands to work on it").dim()
    );
}
