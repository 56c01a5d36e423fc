//! Complexity scoring: a monotonic function of token count, nesting
//! punctuation, and multi-part conjunctions.

use knowstream_shared::ComplexityLevel;

/// Complexity score plus the level it maps to.
#[derive(Debug, Clone, Copy)]
pub struct Complexity {
    pub level: ComplexityLevel,
    /// Raw score in [0, 1] driving the level.
    pub score: f64,
}

/// Tokens at which the token-count contribution saturates.
const TOKEN_SATURATION: f64 = 40.0;

/// Level boundaries on the raw score.
const INTERMEDIATE_FLOOR: f64 = 0.33;
const COMPLEX_FLOOR: f64 = 0.66;

/// Conjunctions that mark a multi-part query.
const CONJUNCTIONS: &[&str] = &[
    " vs ", " versus ", " and ", " or ", " as well as ", " along with ", " compared to ",
    " compared with ",
];

/// Leading verbs that signal an explicit comparison/multi-part request.
const COMPARISON_VERBS: &[&str] = &["compare", "contrast", "difference between", "pros and cons"];

/// Score a trimmed, non-empty query. Monotonic: adding tokens, nesting
/// punctuation, or conjunctions never lowers the score.
pub fn score_complexity(query: &str) -> Complexity {
    let lowered = query.to_lowercase();

    let tokens = lowered.split_whitespace().count();
    let token_part = (tokens as f64 / TOKEN_SATURATION).min(1.0) * 0.35;

    let nesting = lowered
        .chars()
        .filter(|c| matches!(c, '(' | ')' | '[' | ']' | '{' | '}' | '"' | ';' | ':'))
        .count();
    let nesting_part = (nesting as f64 / 8.0).min(1.0) * 0.15;

    let conjunctions = CONJUNCTIONS
        .iter()
        .map(|c| lowered.matches(c).count())
        .sum::<usize>();
    let conjunction_part = (conjunctions as f64 * 0.25).min(0.5);

    let comparison_part = if COMPARISON_VERBS.iter().any(|v| lowered.contains(v)) {
        0.35
    } else {
        0.0
    };

    let score = (token_part + nesting_part + conjunction_part + comparison_part).clamp(0.0, 1.0);

    let level = if score >= COMPLEX_FLOOR {
        ComplexityLevel::Complex
    } else if score >= INTERMEDIATE_FLOOR {
        ComplexityLevel::Intermediate
    } else {
        ComplexityLevel::Simple
    };

    Complexity { level, score }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_plain_query_is_simple() {
        let c = score_complexity("tokio channels");
        assert_eq!(c.level, ComplexityLevel::Simple);
    }

    #[test]
    fn comparison_query_is_complex() {
        let c = score_complexity("compare python vs javascript");
        assert_eq!(c.level, ComplexityLevel::Complex);
        assert!(c.score >= COMPLEX_FLOOR);
    }

    #[test]
    fn score_monotonic_in_conjunctions() {
        let one = score_complexity("postgres vs mysql").score;
        let two = score_complexity("postgres vs mysql vs sqlite").score;
        assert!(two >= one);
    }

    #[test]
    fn score_monotonic_in_tokens() {
        let short = score_complexity("cache invalidation").score;
        let long = score_complexity(
            "cache invalidation strategies for distributed systems with write heavy workloads",
        )
        .score;
        assert!(long >= short);
    }

    #[test]
    fn nesting_punctuation_raises_score() {
        let plain = score_complexity("why does this fail").score;
        let nested = score_complexity("why does f(g(x)) fail; see {a: [1, 2]}").score;
        assert!(nested > plain);
    }

    #[test]
    fn score_clamped_to_unit_interval() {
        let c = score_complexity(
            "compare a vs b vs c vs d and e or f as well as g; (((()))) \"quoted\" {}[]:::",
        );
        assert!(c.score <= 1.0);
        assert_eq!(c.level, ComplexityLevel::Complex);
    }
}
