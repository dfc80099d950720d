//! Classification prompt and response handling shared by the synchronous and
//! the batch path.

use serde_json::{Value, json};

use crate::{
    adapters::ClassificationRequest, config::PriceThresholds, error::AdapterError,
    types::Classification,
};

pub const CHAT_COMPLETIONS_PATH: &str = "/v1/chat/completions";

static SYSTEM_PROMPT: &str = "You are an expert product analyst specializing in social media \
marketing and e-commerce. Analyze products from various niches including automotive, \
electronics, gadgets, lighting, and consumer goods. Always respond with valid JSON.";

const MAX_TRANSCRIPT_CHARS: usize = 12_000;

fn user_prompt(request: &ClassificationRequest, thresholds: &PriceThresholds) -> String {
    let caption = if request.caption.trim().is_empty() {
        "N/A"
    } else {
        request.caption.as_str()
    };
    let transcript = if request.transcript.trim().is_empty() {
        "N/A".to_string()
    } else {
        request.transcript.chars().take(MAX_TRANSCRIPT_CHARS).collect()
    };
    let low = format_ugx(thresholds.low_end_max);
    let medium = format_ugx(thresholds.medium_end_max);

    format!(
        r#"Analyze the following social media post and identify the product being promoted.

POST DETAILS:
Platform: {platform}
Caption: {caption}
Transcript: {transcript}

Provide your analysis in this exact JSON format:
{{
    "product_name": "Specific product name with model/details (e.g., 'Lexus LX600 Petrol 2023', 'LED Sign Board 60x40')",
    "product_category": "low-end|medium-end|high-end",
    "price_ugx": estimated_price_in_ugx_or_null,
    "intended_age_category": "18-25|25-35|35-45|45-55|55+",
    "intended_spending_category": "budget|mid-range|premium|luxury|ultra-luxury",
    "product_type": "vehicle|electronics|gadget|led_sign|lighting|toy|smart_device|accessory|home_product|other",
    "brand": "brand name",
    "key_features": ["feature1", "feature2"],
    "marketing_angle": "brief description of how the product is marketed",
    "niche": "automotive|electronics|lighting|gadgets|home_goods|other"
}}

PRICING GUIDELINES (UGX):
- For VEHICLES: low-end (0-{low}), medium-end ({low}-{medium}), high-end ({medium}+)
- For ELECTRONICS/GADGETS: low-end (0-500K), medium-end (500K-5M), high-end (5M+)
- For LED SIGNS/LIGHTING: low-end (0-1M), medium-end (1M-10M), high-end (10M+)

Be specific with product names. Extract the price from the caption if mentioned (look for "Ugx", "UGX", numbers followed by "m" or "M")."#,
        platform = request.platform,
    )
}

fn format_ugx(amount: f64) -> String {
    if amount >= 1_000_000.0 {
        format!("{}M", (amount / 1_000_000.0).round())
    } else if amount >= 1_000.0 {
        format!("{}K", (amount / 1_000.0).round())
    } else {
        format!("{amount}")
    }
}

/// Chat-completions request body for one item.
pub fn chat_body(model: &str, request: &ClassificationRequest, thresholds: &PriceThresholds) -> Value {
    json!({
        "model": model,
        "messages": [
            { "role": "system", "content": SYSTEM_PROMPT },
            { "role": "user", "content": user_prompt(request, thresholds) },
        ],
        "response_format": { "type": "json_object" },
        "temperature": 0.3,
    })
}

/// One line of a batch input file.
pub fn batch_request_line(
    custom_id: &str,
    model: &str,
    request: &ClassificationRequest,
    thresholds: &PriceThresholds,
) -> Value {
    json!({
        "custom_id": custom_id,
        "method": "POST",
        "url": CHAT_COMPLETIONS_PATH,
        "body": chat_body(model, request, thresholds),
    })
}

/// Pull the classification out of a chat-completions response body.
pub fn parse_chat_completion(
    body: &Value,
    thresholds: &PriceThresholds,
) -> Result<Classification, AdapterError> {
    let content = body["choices"][0]["message"]["content"]
        .as_str()
        .ok_or_else(|| AdapterError::InvalidResponse("response has no message content".into()))?;

    let mut classification: Classification = serde_json::from_str(strip_code_fence(content))?;
    normalize(&mut classification, thresholds);
    Ok(classification)
}

/// Models occasionally wrap JSON in a markdown fence despite `json_object`.
fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .map(str::trim)
        .unwrap_or(trimmed)
}

/// The configured cut points are vehicle prices, so a known price only decides
/// the category of a vehicle. Every other label is the model's, mapped onto
/// the canonical spelling when recognisable.
pub fn normalize(classification: &mut Classification, thresholds: &PriceThresholds) {
    classification.price_ugx = classification
        .price_ugx
        .filter(|p| p.is_finite() && *p > 0.0);

    if let Some(price) = classification.price_ugx.filter(|_| is_vehicle(classification)) {
        classification.product_category = thresholds.categorize(price).to_string();
        return;
    }

    let label = classification.product_category.trim().to_ascii_lowercase();
    let canonical = match label.replace(['_', ' '], "-").as_str() {
        "low-end" | "low" => Some("low-end"),
        "medium-end" | "medium" | "mid-end" | "mid" => Some("medium-end"),
        "high-end" | "high" => Some("high-end"),
        _ => None,
    };
    if let Some(canonical) = canonical {
        classification.product_category = canonical.to_string();
    }
}

fn is_vehicle(classification: &Classification) -> bool {
    classification.product_type.trim().eq_ignore_ascii_case("vehicle")
        || classification.niche.trim().eq_ignore_ascii_case("automotive")
}
