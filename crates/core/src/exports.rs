//! Platform export parsing.
//!
//! Exports are JSON arrays of scraper records. Field sets differ per platform
//! and per scraper version, so records are read field by field: a missing or
//! wrong-typed optional field takes its default, and only a record that is not
//! an object or has no usable URL is dropped.

use serde_json::{Map, Value};
use tracing::warn;

use crate::{
    identity::resolve,
    types::{Item, Platform},
};

const UNKNOWN_ACCOUNT: &str = "Unknown";

#[derive(Debug, Default)]
pub struct ParsedExport {
    pub items: Vec<Item>,
    /// Records dropped because they were malformed or had no URL.
    pub malformed: usize,
    /// Records dropped on purpose (e.g. Instagram images).
    pub filtered: usize,
}

/// Parse the raw text of one export file.
pub fn parse_export(platform: Platform, raw: &str) -> Result<ParsedExport, serde_json::Error> {
    let records: Vec<Value> = serde_json::from_str(raw)?;
    let mut parsed = ParsedExport::default();

    for (index, record) in records.iter().enumerate() {
        let Some(obj) = record.as_object() else {
            warn!(%platform, index, "skipping export record that is not an object");
            parsed.malformed += 1;
            continue;
        };

        let item = match platform {
            Platform::Instagram => {
                if str_field(obj, "type") != "Video" {
                    parsed.filtered += 1;
                    continue;
                }
                instagram_item(obj)
            }
            Platform::TikTok => tiktok_item(obj),
        };

        match item {
            Some(item) => parsed.items.push(item),
            None => {
                warn!(%platform, index, "skipping export record without a source URL");
                parsed.malformed += 1;
            }
        }
    }

    Ok(parsed)
}

fn instagram_item(obj: &Map<String, Value>) -> Option<Item> {
    let source_url = str_field(obj, "url");
    let item_id = resolve(&source_url)?;

    let account_name = account_from_input_url(&str_field(obj, "inputUrl"))
        .or_else(|| non_empty(str_field(obj, "ownerUsername")))
        .unwrap_or_else(|| UNKNOWN_ACCOUNT.to_string());

    Some(Item {
        item_id,
        source_url,
        platform: Platform::Instagram,
        caption: str_field(obj, "caption"),
        account_name,
        view_count: count_field(obj, "videoViewCount"),
        likes_count: count_field(obj, "likesCount"),
        comments_count: count_field(obj, "commentsCount"),
        share_count: 0,
        video_duration: float_field(obj, "videoDuration"),
        music_name: String::new(),
        media_url: str_field(obj, "videoUrl"),
        timestamp: str_field(obj, "timestamp"),
    })
}

fn tiktok_item(obj: &Map<String, Value>) -> Option<Item> {
    let source_url = str_field(obj, "webVideoUrl");
    let item_id = resolve(&source_url)?;

    Some(Item {
        item_id,
        media_url: source_url.clone(),
        source_url,
        platform: Platform::TikTok,
        caption: str_field(obj, "text"),
        account_name: non_empty(str_field(obj, "authorMeta.name"))
            .unwrap_or_else(|| UNKNOWN_ACCOUNT.to_string()),
        view_count: count_field(obj, "playCount"),
        likes_count: count_field(obj, "diggCount"),
        comments_count: count_field(obj, "commentCount"),
        share_count: count_field(obj, "shareCount"),
        video_duration: float_field(obj, "videoMeta.duration"),
        music_name: str_field(obj, "musicMeta.musicName"),
        timestamp: str_field(obj, "createTimeISO"),
    })
}

/// `https://www.instagram.com/<account>/?hl=en` → `<account>`
fn account_from_input_url(input_url: &str) -> Option<String> {
    let segment = input_url.split('/').nth(3)?;
    let account = segment.split('?').next().unwrap_or_default();
    non_empty(account.to_string())
}

fn non_empty(s: String) -> Option<String> {
    (!s.trim().is_empty()).then_some(s)
}

/// Look up `key` either as a flat (possibly dotted) key or as a nested path.
fn lookup<'a>(obj: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    if let Some(value) = obj.get(key) {
        return Some(value);
    }
    let mut parts = key.split('.');
    let mut current = obj.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

fn str_field(obj: &Map<String, Value>, key: &str) -> String {
    match lookup(obj, key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

fn count_field(obj: &Map<String, Value>, key: &str) -> u64 {
    match lookup(obj, key) {
        Some(Value::Number(n)) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
            .unwrap_or(0),
        Some(Value::String(s)) => s.trim().replace(',', "").parse().unwrap_or(0),
        _ => 0,
    }
}

fn float_field(obj: &Map<String, Value>, key: &str) -> f64 {
    match lookup(obj, key) {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    }
}
