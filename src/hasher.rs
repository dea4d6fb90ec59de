/// Content hashing for asset definitions and whole documents.
use sha2::{Digest as _, Sha256};

use crate::types::ContentHash;

/// Compute the content hash used to key generation requests.
///
/// Normalization: split into lines (so `\r\n` and `\n` agree), strip trailing
/// whitespace from each line, drop leading and trailing blank lines, join with
/// `\n`, then SHA-256 hash the result. Indentation is kept because it is
/// meaningful to the generation service.
pub fn hash_content(content: &str) -> ContentHash {
    let normalized = normalize_content_lines(content);
    let hash = Sha256::digest(normalized.as_bytes());

    return ContentHash(format!("{hash:x}"));
}

/// Trim trailing whitespace per line and surrounding blank lines.
fn normalize_content_lines(content: &str) -> String {
    let lines: Vec<&str> = content.lines().map(str::trim_end).collect();
    let first = lines.iter().position(|line| return !line.is_empty());
    let last = lines.iter().rposition(|line| return !line.is_empty());

    return match (first, last) {
        (Some(start), Some(end)) => lines
            .get(start..=end)
            .map(|kept| return kept.join("\n"))
            .unwrap_or_default(),
        _ => String::new(),
    };
}
