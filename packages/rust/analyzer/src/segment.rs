//! Query segmentation: splits multi-part queries into ordered sub-queries.

use std::sync::LazyLock;

use regex::Regex;

/// Delimiters that separate independent parts of a query.
static DELIMITERS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\s+(?:vs\.?|versus|compared\s+(?:to|with))\s+|\s*;\s*|\s+and\s+also\s+|\s+as\s+well\s+as\s+|\s+and\s+|\s+or\s+",
    )
    .expect("delimiter regex is valid")
});

/// Leading verbs that introduce a comparison and are not part of any
/// sub-query.
static COMPARISON_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:compare|contrast|difference\s+between)\s+")
        .expect("prefix regex is valid")
});

/// Split a trimmed, non-empty query into at most `max_segments` ordered
/// sub-queries. Excess segments are merged into the final one rather than
/// dropped; a query with no recognized delimiter yields itself as the only
/// segment.
pub fn segment_query(query: &str, max_segments: usize) -> Vec<String> {
    let stripped = COMPARISON_PREFIX.replace(query, "");

    let mut parts: Vec<String> = DELIMITERS
        .split(&stripped)
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect();

    if parts.is_empty() {
        return vec![query.to_string()];
    }

    if parts.len() > max_segments {
        let tail = parts.split_off(max_segments - 1).join(" ");
        parts.push(tail);
    }

    parts
}
