use std::path::Path;

use tokio::fs;
use tracing::{info, warn};

use crate::{
    config::PipelineConfig,
    error::{PipelineError, Result},
    exports::{ParsedExport, parse_export},
    fsutil,
    merge::dedupe_items,
    types::Platform,
};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct IngestSummary {
    pub instagram: usize,
    pub tiktok: usize,
    pub malformed: usize,
    /// Records dropped on purpose, such as Instagram images.
    pub filtered: usize,
    pub duplicates: usize,
    pub total: usize,
    pub total_views: u64,
}

async fn read_export(platform: Platform, path: &Path) -> Result<Option<ParsedExport>> {
    let raw = match fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(%platform, path = %path.display(), "export file not found, no items from this platform");
            return Ok(None);
        }
        Err(e) => return Err(e.into()),
    };
    let parsed = parse_export(platform, &raw)?;
    info!(
        %platform,
        items = parsed.items.len(),
        malformed = parsed.malformed,
        filtered = parsed.filtered,
        "export parsed"
    );
    Ok(Some(parsed))
}

/// Parse both platform exports into `items.json`.
pub async fn run_ingest(config: &PipelineConfig) -> Result<IngestSummary> {
    let layout = &config.layout;
    let (instagram_path, tiktok_path) = (layout.instagram_export(), layout.tiktok_export());

    let instagram = read_export(Platform::Instagram, &instagram_path).await?;
    let tiktok = read_export(Platform::TikTok, &tiktok_path).await?;
    if instagram.is_none() && tiktok.is_none() {
        return Err(PipelineError::MissingInput {
            instagram: instagram_path,
            tiktok: tiktok_path,
        });
    }

    let mut summary = IngestSummary::default();
    let mut items = Vec::new();
    for parsed in [instagram, tiktok].into_iter().flatten() {
        summary.malformed += parsed.malformed;
        summary.filtered += parsed.filtered;
        items.extend(parsed.items);
    }

    let (items, duplicates) = dedupe_items(items);
    summary.duplicates = duplicates;
    summary.total = items.len();
    summary.instagram = items
        .iter()
        .filter(|i| i.platform == Platform::Instagram)
        .count();
    summary.tiktok = summary.total - summary.instagram;
    summary.total_views = items.iter().map(|i| i.view_count).sum();

    fsutil::write_json_atomic(&layout.items_path(), &items).await?;
    info!(items = summary.total, duplicates, "item table written");

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::{phases::testing, types::Item};

    async fn write(path: &Path, body: &str) {
        fs::create_dir_all(path.parent().unwrap()).await.unwrap();
        fs::write(path, body).await.unwrap();
    }

    #[tokio::test]
    async fn both_exports_missing_is_a_setup_error() {
        let dir = TempDir::new().unwrap();
        let config = testing::config(dir.path());

        let err = run_ingest(&config).await.unwrap_err();

        assert!(matches!(err, PipelineError::MissingInput { .. }));
        assert!(!config.layout.items_path().exists());
    }

    #[tokio::test]
    async fn one_missing_export_still_ingests_the_other() {
        let dir = TempDir::new().unwrap();
        let config = testing::config(dir.path());
        write(
            &config.layout.tiktok_export(),
            r#"[
                {"text": "Lexus LX600 650m", "webVideoUrl": "https://www.tiktok.com/@lemax/video/1", "playCount": 900, "authorMeta.name": "lemax"},
                {"text": "same video again", "webVideoUrl": "https://www.tiktok.com/@lemax/video/1/", "playCount": 1200},
                {"text": "no url"},
                "garbage",
                {"text": "earbuds", "webVideoUrl": "https://www.tiktok.com/@gadgets/video/2", "playCount": "lots"}
            ]"#,
        )
        .await;

        let summary = run_ingest(&config).await.unwrap();

        assert_eq!(summary.tiktok, 2);
        assert_eq!(summary.instagram, 0);
        assert_eq!(summary.malformed, 2);
        assert_eq!(summary.duplicates, 1);

        let items: Vec<Item> = fsutil::read_json(&config.layout.items_path())
            .await
            .unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].view_count, 1200);
        assert_eq!(items[1].view_count, 0);
    }
}
