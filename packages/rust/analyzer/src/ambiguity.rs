//! Ambiguity detection against a fixed lexicon plus structural heuristics.
//!
//! Multiple independent ambiguity kinds may co-occur in one query; every
//! instance is reported with surrounding context.

use knowstream_shared::{Ambiguity, AmbiguityKind};

/// Terms with more than one plausible technical sense (language vs. common
/// noun, framework vs. season, and so on).
const TECHNICAL_LEXICON: &[&str] = &[
    "python", "java", "ruby", "go", "rust", "swift", "shell", "spring", "react", "flask", "rails",
    "docker", "kafka",
];

/// General homonyms that commonly blur query intent.
const LINGUISTIC_LEXICON: &[&str] = &[
    "run", "light", "bank", "table", "branch", "current", "object", "state", "address", "key",
    "port", "field",
];

/// Pronouns with no in-query referent make a query structurally ambiguous.
const DANGLING_PRONOUNS: &[&str] = &["it", "this", "that", "they", "them"];

/// Number of context words captured on each side of an ambiguous term.
const CONTEXT_WINDOW: usize = 3;

/// Detect every ambiguity instance in a trimmed, non-empty query.
pub fn detect_ambiguities(query: &str) -> Vec<Ambiguity> {
    let words: Vec<&str> = query.split_whitespace().collect();
    let mut found = Vec::new();

    for (i, raw) in words.iter().enumerate() {
        let word = raw
            .trim_matches(|c: char| !c.is_alphanumeric())
            .to_lowercase();
        if word.is_empty() {
            continue;
        }

        let kind = if TECHNICAL_LEXICON.contains(&word.as_str()) {
            Some(AmbiguityKind::Technical)
        } else if LINGUISTIC_LEXICON.contains(&word.as_str()) {
            Some(AmbiguityKind::Linguistic)
        } else if i == 0 && DANGLING_PRONOUNS.contains(&word.as_str()) {
            // A leading pronoun has nothing in the query to refer to.
            Some(AmbiguityKind::Structural)
        } else {
            None
        };

        if let Some(kind) = kind {
            found.push(Ambiguity {
                term: word,
                kind,
                context: context_around(&words, i),
            });
        }
    }

    found
}

/// A short slice of the query around word `i`.
fn context_around(words: &[&str], i: usize) -> String {
    let start = i.saturating_sub(CONTEXT_WINDOW);
    let end = (i + CONTEXT_WINDOW + 1).min(words.len());
    words[start..end].join(" ")
}
