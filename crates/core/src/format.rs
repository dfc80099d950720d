use std::time::Duration;

use crate::report::{DatasetReport, Distribution};

pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs_f64();
    if secs < 60.0 {
        format!("{:.1}s", secs)
    } else {
        let whole = secs.round() as u64;
        format!("{}m {}s", whole / 60, whole % 60)
    }
}

/// Audio length in minutes, e.g. `12.4 min`.
pub fn format_minutes(seconds: f64) -> String {
    format!("{:.1} min", seconds / 60.0)
}

pub fn format_usd(amount: f64) -> String {
    format!("${:.2}", amount)
}

/// `1234567` → `1,234,567`
pub fn format_count(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

fn push_distribution(output: &mut String, title: &str, dist: &Distribution, total: usize) {
    if dist.is_empty() {
        return;
    }
    output.push_str(&format!("## {}\n\n", title));
    for (label, count) in dist.entries() {
        let share = if total == 0 {
            0.0
        } else {
            *count as f64 * 100.0 / total as f64
        };
        output.push_str(&format!("• {}: {} ({:.1}%)\n", label, count, share));
    }
    output.push('\n');
}

pub fn format_dataset_report(report: &DatasetReport) -> String {
    let mut output = String::new();
    output.push_str("# Final dataset\n\n");
    output.push_str(&format!(
        "**Rows:** {} | **Instagram:** {} | **TikTok:** {}\n\n",
        report.total, report.instagram, report.tiktok
    ));
    output.push_str(&format!(
        "**With transcripts:** {} | **With classifications:** {}\n\n",
        report.with_transcript, report.with_classification
    ));
    output.push_str(&format!(
        "**Views:** total {} | average {} | max {}\n\n",
        format_count(report.total_views),
        format_count(report.average_views),
        format_count(report.max_views)
    ));

    push_distribution(
        &mut output,
        "Product categories",
        &report.product_categories,
        report.with_classification,
    );
    push_distribution(
        &mut output,
        "Spending categories",
        &report.spending_categories,
        report.with_classification,
    );
    push_distribution(
        &mut output,
        "Languages",
        &report.languages,
        report.with_transcript,
    );

    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_get_thousands_separators() {
        assert_eq!(format_count(0), "0");
        assert_eq!(format_count(999), "999");
        assert_eq!(format_count(1000), "1,000");
        assert_eq!(format_count(1_234_567), "1,234,567");
    }

    #[test]
    fn durations_switch_to_minutes() {
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.5s");
        assert_eq!(format_duration(Duration::from_secs(125)), "2m 5s");
    }

    #[test]
    fn rounded_seconds_carry_into_minutes() {
        assert_eq!(format_duration(Duration::from_millis(119_600)), "2m 0s");
        assert_eq!(format_duration(Duration::from_millis(60_400)), "1m 0s");
    }
}
