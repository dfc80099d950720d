use std::collections::HashMap;

use tracing::info;

use crate::{
    config::{PipelineConfig, require_artifact},
    error::{PipelineError, Result},
    fsutil,
    types::Item,
};

/// Whole-pipeline cost assumed per video: about $0.015 of transcription plus
/// $0.004 of classification.
pub const COST_PER_VIDEO: f64 = 0.019;

#[derive(Debug, Clone, PartialEq)]
pub struct SubsetSummary {
    pub selected: usize,
    pub available: usize,
    /// Items of the focus account that made it in.
    pub focused: usize,
    pub total_views: u64,
    pub estimated_cost: f64,
    /// Top accounts in the subset by item count.
    pub accounts: Vec<(String, usize, u64)>,
}

/// Pick the most viewed items that fit `budget_usd`, preferring `account`
/// when given, and write them to `items_subset.json`.
pub async fn run_subset(
    config: &PipelineConfig,
    budget_usd: f64,
    account: Option<&str>,
) -> Result<SubsetSummary> {
    if !budget_usd.is_finite() || budget_usd <= 0.0 {
        return Err(PipelineError::InvalidConfig(format!(
            "budget must be a positive amount, got {budget_usd}"
        )));
    }
    let items_path = config.layout.items_path();
    require_artifact(&items_path, "ingest")?;
    let items: Vec<Item> = fsutil::read_json(&items_path).await?;
    let available = items.len();

    let max_items = (budget_usd / COST_PER_VIDEO).floor() as usize;
    let selected = select(items, max_items, account);

    let focused = account.map_or(0, |a| {
        selected.iter().filter(|i| i.account_name == a).count()
    });
    fsutil::write_json_atomic(&config.layout.subset_path(), &selected).await?;
    info!(selected = selected.len(), available, budget_usd, "subset written");

    Ok(SubsetSummary {
        selected: selected.len(),
        available,
        focused,
        total_views: selected.iter().map(|i| i.view_count).sum(),
        estimated_cost: selected.len() as f64 * COST_PER_VIDEO,
        accounts: top_accounts(&selected, 10),
    })
}

/// Focus-account items first (most viewed first), then fill the remaining
/// slots with the most viewed of everything else.
fn select(items: Vec<Item>, max_items: usize, account: Option<&str>) -> Vec<Item> {
    let (mut focus, mut rest): (Vec<Item>, Vec<Item>) = match account {
        Some(a) => items.into_iter().partition(|i| i.account_name == a),
        None => (Vec::new(), items),
    };
    focus.sort_by(|a, b| b.view_count.cmp(&a.view_count));
    rest.sort_by(|a, b| b.view_count.cmp(&a.view_count));

    focus.truncate(max_items);
    rest.truncate(max_items - focus.len());

    let mut selected = focus;
    selected.extend(rest);
    selected.sort_by(|a, b| b.view_count.cmp(&a.view_count));
    selected
}

fn top_accounts(items: &[Item], limit: usize) -> Vec<(String, usize, u64)> {
    let mut by_account: HashMap<&str, (usize, u64)> = HashMap::new();
    for item in items {
        let entry = by_account.entry(item.account_name.as_str()).or_default();
        entry.0 += 1;
        entry.1 += item.view_count;
    }
    let mut accounts: Vec<(String, usize, u64)> = by_account
        .into_iter()
        .map(|(name, (count, views))| (name.to_string(), count, views))
        .collect();
    accounts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| b.2.cmp(&a.2)));
    accounts.truncate(limit);
    accounts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phases::testing;

    fn owned(url: &str, views: u64, account: &str) -> Item {
        let mut item = testing::item(url, views);
        item.account_name = account.to_string();
        item
    }

    #[test]
    fn budget_takes_the_most_viewed() {
        let items = vec![
            owned("a", 10, "x"),
            owned("b", 500, "y"),
            owned("c", 50, "x"),
        ];

        let picked = select(items, 2, None);

        let urls: Vec<_> = picked.iter().map(|i| i.source_url.as_str()).collect();
        assert_eq!(urls, ["b", "c"]);
    }

    #[test]
    fn focus_account_is_preferred_then_filled() {
        let items = vec![
            owned("a", 10, "lemax__autos"),
            owned("b", 500, "other"),
            owned("c", 50, "other"),
            owned("d", 5, "lemax__autos"),
        ];

        let picked = select(items, 3, Some("lemax__autos"));

        let urls: Vec<_> = picked.iter().map(|i| i.source_url.as_str()).collect();
        assert_eq!(urls, ["b", "a", "d"]);
    }

    #[tokio::test]
    async fn subset_is_written_and_priced() {
        let items: Vec<Item> = (0..300).map(|i| testing::item(&format!("u{i}"), i)).collect();
        let (_dir, config, _store) = testing::workspace(&items).await;

        let summary = run_subset(&config, 1.0, None).await.unwrap();

        assert_eq!(summary.selected, 52);
        assert_eq!(summary.available, 300);
        let written: Vec<Item> = fsutil::read_json(&config.layout.subset_path()).await.unwrap();
        assert_eq!(written.len(), 52);
        assert_eq!(written[0].view_count, 299);
        assert!(run_subset(&config, 0.0, None).await.is_err());
    }
}
