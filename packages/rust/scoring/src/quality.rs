//! Quality, diversity, and depth scoring.
//!
//! The scorer is stateful: diversity compares each candidate's keyword set
//! against a sliding window of recently scored candidates, so near-duplicate
//! content arriving later in the stream scores low.

use std::collections::{HashSet, VecDeque};

use tracing::{debug, warn};

use knowstream_shared::{QualityConfig, ScoredCandidate, ValidatedCandidate};

/// Neutral score used when content cannot be scored meaningfully.
const FALLBACK_SCORE: f64 = 0.5;

/// Scores candidates for quality, diversity against the recent window, and
/// topical depth. Malformed content degrades to neutral fallback scores
/// instead of failing the stream.
///
/// Quality and depth floors reject a candidate the same way validation
/// thresholds do. The diversity floor does not: diversity depends on
/// arrival order, which is nondeterministic across runs, so a breach is
/// only logged.
pub struct QualityScorer {
    config: QualityConfig,
    window: VecDeque<HashSet<String>>,
}

impl QualityScorer {
    pub fn new(config: QualityConfig) -> Self {
        let capacity = config.diversity_window.max(1);
        Self {
            config,
            window: VecDeque::with_capacity(capacity),
        }
    }

    /// Score one validated candidate. All scores land in [0, 1].
    pub fn score(&mut self, validated: ValidatedCandidate) -> ScoredCandidate {
        let content = &validated.candidate.content;
        let keywords = keyword_set(content);

        if !scorable(content, &keywords) {
            warn!(
                id = %validated.candidate.id,
                "content not scorable, using fallback scores"
            );
            self.push_window(keywords);
            return ScoredCandidate {
                validated,
                quality: FALLBACK_SCORE,
                diversity: FALLBACK_SCORE,
                depth: FALLBACK_SCORE,
                fallback_used: true,
            };
        }

        let quality = quality_score(content);
        let diversity = self.diversity_score(&keywords);
        let depth = depth_score(content, &keywords);
        self.push_window(keywords);

        let mut scored = ScoredCandidate {
            validated,
            quality,
            diversity,
            depth,
            fallback_used: false,
        };

        if quality < self.config.min_quality {
            scored.validated.rejected = true;
            scored.validated.rejection_reasons.push(format!(
                "quality {quality:.2} < {:.2}",
                self.config.min_quality
            ));
        }
        if depth < self.config.min_depth {
            scored.validated.rejected = true;
            scored.validated.rejection_reasons.push(format!(
                "depth {depth:.2} < {:.2}",
                self.config.min_depth
            ));
        }
        if diversity < self.config.min_diversity {
            debug!(
                id = %scored.validated.candidate.id,
                diversity,
                "candidate below diversity floor"
            );
        }

        scored
    }

    /// 1.0 minus the highest Jaccard similarity against the recent window.
    /// The first candidate has nothing to overlap with and scores 1.0.
    fn diversity_score(&self, keywords: &HashSet<String>) -> f64 {
        let max_similarity = self
            .window
            .iter()
            .map(|prior| jaccard(keywords, prior))
            .fold(0.0_f64, f64::max);
        (1.0 - max_similarity).clamp(0.0, 1.0)
    }

    fn push_window(&mut self, keywords: HashSet<String>) {
        if self.window.len() >= self.config.diversity_window.max(1) {
            self.window.pop_front();
        }
        self.window.push_back(keywords);
    }
}

/// A candidate is scorable when it carries some alphanumeric substance and
/// produced at least one keyword.
fn scorable(content: &str, keywords: &HashSet<String>) -> bool {
    !keywords.is_empty() && content.chars().any(|c| c.is_alphanumeric())
}

/// Lowercased words of 4+ characters, stripped of punctuation.
pub fn keyword_set(content: &str) -> HashSet<String> {
    content
        .split_whitespace()
        .map(|w| {
            w.trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase()
        })
        .filter(|w| w.len() >= 4)
        .collect()
}

pub fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count() as f64;
    let union = a.union(b).count() as f64;
    intersection / union
}

/// Writing quality from length, sentence structure, and vocabulary spread.
fn quality_score(content: &str) -> f64 {
    let words: Vec<&str> = content.split_whitespace().collect();
    let word_count = words.len();
    if word_count == 0 {
        return 0.0;
    }

    let length_part = (word_count as f64 / 80.0).min(1.0) * 0.4;

    let sentences = content
        .split(['.', '!', '?'])
        .filter(|s| s.split_whitespace().count() >= 3)
        .count();
    let sentence_part = (sentences as f64 / 4.0).min(1.0) * 0.3;

    let unique: HashSet<&str> = words.iter().copied().collect();
    let vocab_part = (unique.len() as f64 / word_count as f64) * 0.3;

    (length_part + sentence_part + vocab_part).clamp(0.0, 1.0)
}

/// Topical depth: sustained treatment of a subject rather than a teaser.
fn depth_score(content: &str, keywords: &HashSet<String>) -> f64 {
    let word_count = content.split_whitespace().count();
    if word_count == 0 {
        return 0.0;
    }

    let keyword_part = (keywords.len() as f64 / 30.0).min(1.0) * 0.5;
    let length_part = (word_count as f64 / 150.0).min(1.0) * 0.3;

    // Explanatory connectives signal reasoning rather than listing.
    let connectives = ["because", "therefore", "however", "example", "whereas"];
    let connective_hits = connectives
        .iter()
        .filter(|c| content.to_lowercase().contains(*c))
        .count();
    let connective_part = (connective_hits as f64 / 3.0).min(1.0) * 0.2;

    (keyword_part + length_part + connective_part).clamp(0.0, 1.0)
}
