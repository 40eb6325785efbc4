use sha2::{Digest, Sha256};

use crate::worker::job::DetailPageData;

/// Generate a content hash for duplicate detection.
///
/// Uses SHA256 of normalized text. Normalization rules:
/// - Convert to lowercase
/// - Remove all non-alphanumeric characters (except whitespace)
/// - Collapse runs of whitespace into single spaces
/// - Trim leading/trailing whitespace
///
/// Reformatted re-posts of the same announcement hash identically, while any
/// change in wording produces a new hash.
pub fn generate_content_hash(text: &str) -> String {
    let normalized = text
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");

    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Hash of the announcement as scraped from its detail page: title, ministry,
/// agency, description and attachment filenames. Computed before any
/// attachment is downloaded so duplicates are caught early.
pub fn detail_content_hash(detail: &DetailPageData) -> String {
    let mut parts: Vec<&str> = vec![detail.title.as_str()];
    parts.push(detail.ministry.as_deref().unwrap_or(""));
    parts.push(detail.agency.as_deref().unwrap_or(""));
    parts.push(detail.description.as_str());
    parts.extend(detail.attachments.iter().map(|a| a.filename.as_str()));

    generate_content_hash(&parts.join("\n"))
}

/// First `len` hex characters of the SHA256 of `input`. Used for
/// deterministic record ids.
pub fn short_digest(input: &str, len: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let hex = format!("{:x}", hasher.finalize());
    hex.chars().take(len).collect()
}
