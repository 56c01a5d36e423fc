//! Query analysis: classification, complexity, ambiguity, segmentation.
//!
//! Pure computation over the input string plus configuration, no network
//! or disk I/O. The whole analysis runs well inside the pipeline's
//! first-status budget.

mod ambiguity;
mod classify;
mod complexity;
mod segment;

use tracing::debug;

use knowstream_shared::{AnalyzerConfig, KnowStreamError, QueryAnalysis, QueryType, Result};

pub use ambiguity::detect_ambiguities;
pub use classify::classify;
pub use complexity::score_complexity;
pub use segment::segment_query;

/// Analyzes raw queries into search-ready form.
#[derive(Debug, Clone)]
pub struct QueryAnalyzer {
    config: AnalyzerConfig,
}

impl QueryAnalyzer {
    /// Create an analyzer with the given configuration.
    pub fn new(config: AnalyzerConfig) -> Self {
        Self { config }
    }

    /// Analyze a raw query.
    ///
    /// Fails with `InvalidQuery` when the input is empty after whitespace
    /// trim; otherwise always produces a complete analysis with all scores
    /// in [0, 1].
    pub fn analyze(&self, query: &str) -> Result<QueryAnalysis> {
        let trimmed = query.trim();
        if trimmed.is_empty() {
            return Err(KnowStreamError::invalid_query("empty after trim"));
        }

        let classification = classify(trimmed);
        let primary_type = if classification.confidence < self.config.confidence_threshold {
            QueryType::Ambiguous
        } else {
            classification.primary_type
        };

        let complexity = score_complexity(trimmed);
        let ambiguities = detect_ambiguities(trimmed);
        let segments = segment_query(trimmed, self.config.max_segments);

        debug!(
            ?primary_type,
            confidence = classification.confidence,
            complexity = complexity.score,
            segments = segments.len(),
            ambiguities = ambiguities.len(),
            "query analyzed"
        );

        Ok(QueryAnalysis {
            primary_type,
            confidence: classification.confidence,
            complexity_level: complexity.level,
            complexity_score: complexity.score,
            ambiguous: !ambiguities.is_empty(),
            ambiguities,
            segments,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use knowstream_shared::ComplexityLevel;

    fn analyzer() -> QueryAnalyzer {
        QueryAnalyzer::new(AnalyzerConfig::default())
    }

    #[test]
    fn empty_query_fails() {
        let err = analyzer().analyze("   ").unwrap_err();
        assert!(matches!(err, KnowStreamError::InvalidQuery { .. }));
    }

    #[test]
    fn comparison_query_segments_and_is_complex() {
        let analysis = analyzer()
            .analyze("compare python vs javascript")
            .expect("analyze");
        assert_eq!(analysis.segments, vec!["python", "javascript"]);
        assert_eq!(analysis.complexity_level, ComplexityLevel::Complex);
    }

    #[test]
    fn scores_stay_in_unit_interval() {
        let queries = [
            "rust",
            "how do I configure a reverse proxy for websockets and keep TLS termination?",
            "fn main() { println!(\"hi\") } why does this not compile",
            "compare postgres vs mysql vs sqlite vs duckdb and also redis",
            "???!!! ((()))",
        ];
        for query in queries {
            let analysis = analyzer().analyze(query).expect("analyze");
            assert!((0.0..=1.0).contains(&analysis.confidence), "{query}");
            assert!((0.0..=1.0).contains(&analysis.complexity_score), "{query}");
            assert!(!analysis.segments.is_empty(), "{query}");
        }
    }

    #[test]
    fn low_confidence_becomes_ambiguous_type() {
        let strict = QueryAnalyzer::new(AnalyzerConfig {
            confidence_threshold: 0.99,
            ..AnalyzerConfig::default()
        });
        let analysis = strict.analyze("something vague entirely").expect("analyze");
        assert_eq!(analysis.primary_type, QueryType::Ambiguous);
    }

    #[test]
    fn single_topic_query_yields_one_segment() {
        let analysis = analyzer().analyze("tokio channel backpressure").expect("analyze");
        assert_eq!(analysis.segments.len(), 1);
        assert_eq!(analysis.segments[0], "tokio channel backpressure");
    }
}
