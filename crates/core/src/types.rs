use std::{fmt, path::PathBuf};

use serde::{Deserialize, Deserializer, Serialize};

use crate::identity::ItemId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Platform {
    Instagram,
    TikTok,
}

impl Platform {
    pub fn name(&self) -> &'static str {
        match self {
            Platform::Instagram => "Instagram",
            Platform::TikTok => "TikTok",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One ingested source video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub item_id: ItemId,
    pub source_url: String,
    pub platform: Platform,
    pub caption: String,
    pub account_name: String,
    pub view_count: u64,
    pub likes_count: u64,
    pub comments_count: u64,
    #[serde(default)]
    pub share_count: u64,
    #[serde(default)]
    pub video_duration: f64,
    #[serde(default)]
    pub music_name: String,
    #[serde(default)]
    pub media_url: String,
    #[serde(default)]
    pub timestamp: String,
}

/// Extracted audio for one item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioArtifact {
    pub path: PathBuf,
    pub duration_secs: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptRecord {
    pub text: String,
    pub language: String,
    pub duration_secs: f64,
}

/// Product classification returned by the language model. Model output is
/// loose, so `null` reads as empty and prices may arrive as text.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Classification {
    #[serde(deserialize_with = "null_as_default")]
    pub product_name: String,
    #[serde(deserialize_with = "null_as_default")]
    pub product_category: String,
    #[serde(deserialize_with = "lenient_price")]
    pub price_ugx: Option<f64>,
    #[serde(deserialize_with = "null_as_default")]
    pub intended_age_category: String,
    #[serde(deserialize_with = "null_as_default")]
    pub intended_spending_category: String,
    #[serde(deserialize_with = "null_as_default")]
    pub product_type: String,
    #[serde(deserialize_with = "null_as_default")]
    pub brand: String,
    #[serde(deserialize_with = "null_as_default")]
    pub key_features: Vec<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub marketing_angle: String,
    #[serde(deserialize_with = "null_as_default")]
    pub niche: String,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn lenient_price<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<serde_json::Value>::deserialize(deserializer)? {
        Some(serde_json::Value::Number(n)) => n.as_f64(),
        Some(serde_json::Value::String(s)) => parse_price_text(&s),
        _ => None,
    })
}

/// `"650m"`, `"UGX 650,000,000"`, `"1.2M"`, `"500k"` → amount in UGX.
pub fn parse_price_text(raw: &str) -> Option<f64> {
    let lowered = raw.trim().to_ascii_lowercase();
    let cleaned = lowered.trim_start_matches("ugx").trim().replace([',', ' ', '_'], "");
    let (number, multiplier) = if let Some(n) = cleaned.strip_suffix('m') {
        (n, 1_000_000.0)
    } else if let Some(n) = cleaned.strip_suffix('k') {
        (n, 1_000.0)
    } else {
        (cleaned.as_str(), 1.0)
    };
    number
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .map(|v| v * multiplier)
}

/// Row of `extraction_results.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionRow {
    pub item_id: ItemId,
    pub source_url: String,
    pub platform: Platform,
    pub video_downloaded: bool,
    pub audio_extracted: bool,
    pub audio_duration: f64,
    pub audio_path: String,
    pub cached: bool,
    pub error: Option<String>,
}

/// Completion state of one stage as shown in the final dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Ok,
    Failed,
    Missing,
}

/// One row of the final dataset. String fields use `""` when the stage never
/// produced a payload, so the column set is always the same.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalRecord {
    pub item_id: ItemId,
    pub caption: String,
    pub account_name: String,
    pub view_count: u64,
    pub source_url: String,
    pub product_category: String,
    pub product_name: String,
    pub transcript: String,
    pub platform: Platform,
    pub intended_age_category: String,
    pub intended_spending_category: String,
    pub likes_count: u64,
    pub comments_count: u64,
    pub share_count: u64,
    pub detected_language: String,
    pub audio_duration: String,
    pub price_ugx: String,
    pub brand: String,
    pub product_type: String,
    pub niche: String,
    pub timestamp: String,
    pub transcript_status: StageStatus,
    pub classification_status: StageStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_tolerates_nulls_and_text_prices() {
        let c: Classification = serde_json::from_str(
            r#"{"product_name": null, "price_ugx": "UGX 650m", "key_features": null, "brand": "Toyota"}"#,
        )
        .unwrap();

        assert_eq!(c.product_name, "");
        assert_eq!(c.price_ugx, Some(650_000_000.0));
        assert!(c.key_features.is_empty());
        assert_eq!(c.brand, "Toyota");
    }

    #[test]
    fn price_text_variants() {
        assert_eq!(parse_price_text("1.2M"), Some(1_200_000.0));
        assert_eq!(parse_price_text("500k"), Some(500_000.0));
        assert_eq!(parse_price_text("650,000,000"), Some(650_000_000.0));
        assert_eq!(parse_price_text("call for price"), None);
    }
}
