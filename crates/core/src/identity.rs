use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Hex characters kept from the URL digest.
pub const ITEM_ID_LEN: usize = 16;

const CUSTOM_ID_PREFIX: &str = "classify-";

/// Content-addressed identifier of one source video. Every artifact, resume
/// record and batch sub-request is keyed by it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(String);

impl ItemId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Batch sub-request identifier for this item
    pub fn custom_id(&self) -> String {
        format!("{CUSTOM_ID_PREFIX}{}", self.0)
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derive the item id for a source URL. Returns `None` for blank input.
pub fn resolve(source_url: &str) -> Option<ItemId> {
    let normalized = normalize_url(source_url)?;
    let digest = Sha256::digest(normalized.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    Some(ItemId(hex[..ITEM_ID_LEN].to_string()))
}

/// Reverse of [`ItemId::custom_id`]. Anything not shaped like one of our ids
/// yields `None`.
pub fn parse_custom_id(custom_id: &str) -> Option<ItemId> {
    let raw = custom_id.strip_prefix(CUSTOM_ID_PREFIX)?;
    let well_formed =
        raw.len() == ITEM_ID_LEN && raw.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
    well_formed.then(|| ItemId(raw.to_string()))
}

/// Trim, drop the fragment, lowercase scheme and host, strip trailing slashes.
fn normalize_url(url: &str) -> Option<String> {
    let url = url.trim();
    let url = url.split('#').next().unwrap_or(url);
    if url.is_empty() {
        return None;
    }

    let (scheme, rest) = match url.split_once("://") {
        Some((scheme, rest)) => (Some(scheme.to_ascii_lowercase()), rest),
        None => (None, url),
    };

    let (authority, tail) = match rest.find(['/', '?']) {
        Some(idx) => rest.split_at(idx),
        None => (rest, ""),
    };
    let (path, query) = match tail.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (tail, None),
    };

    let mut normalized = String::with_capacity(url.len());
    if let Some(scheme) = scheme {
        normalized.push_str(&scheme);
        normalized.push_str("://");
    }
    normalized.push_str(&authority.to_ascii_lowercase());
    normalized.push_str(path.trim_end_matches('/'));
    if let Some(query) = query.filter(|q| !q.is_empty()) {
        normalized.push('?');
        normalized.push_str(query);
    }

    Some(normalized)
}
