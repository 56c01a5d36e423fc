//! Composite enrichment: folds the validation and quality scores into a
//! single composite metric and attaches the origin-based source weight.

use knowstream_shared::{
    EnrichedCandidate, EnrichmentWeights, KnowStreamError, Result, ScoredCandidate, SourceOrigin,
};

const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

/// Pure, stateless enrichment stage. Construction fails fast on a weight
/// table that does not sum to 1.0.
#[derive(Debug)]
pub struct ContentEnricher {
    weights: EnrichmentWeights,
}

impl ContentEnricher {
    pub fn new(weights: EnrichmentWeights) -> Result<Self> {
        let sum = weights.trust_weight
            + weights.reliability_weight
            + weights.quality_weight
            + weights.depth_weight;
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(KnowStreamError::config(format!(
                "enrichment weights must sum to 1.0, got {sum}"
            )));
        }
        Ok(Self { weights })
    }

    /// Compute the composite metric and source weight. Enriching the same
    /// candidate twice yields the same result.
    pub fn enrich(&self, scored: ScoredCandidate) -> EnrichedCandidate {
        let composite = (scored.validated.trust * self.weights.trust_weight
            + scored.validated.reliability * self.weights.reliability_weight
            + scored.quality * self.weights.quality_weight
            + scored.depth * self.weights.depth_weight)
            .clamp(0.0, 1.0);

        let source_weight = match scored.candidate().origin {
            SourceOrigin::SearchResult { .. } => self.weights.search_source_weight,
            SourceOrigin::ExpertResponse { .. } => self.weights.expert_source_weight,
        };

        EnrichedCandidate {
            scored,
            source_weight,
            composite,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use knowstream_shared::{Candidate, ValidatedCandidate};
    use uuid::Uuid;

    fn scored(origin: SourceOrigin, trust: f64, quality: f64) -> ScoredCandidate {
        ScoredCandidate {
            validated: ValidatedCandidate {
                candidate: Candidate {
                    id: Uuid::now_v7().to_string(),
                    origin,
                    content: "content".into(),
                    seq: 0,
                    retrieved_at: Utc::now(),
                },
                trust,
                reliability: 0.8,
                authority: 0.8,
                freshness: 0.8,
                citation_count: 2,
                rejected: false,
                rejection_reasons: Vec::new(),
            },
            quality,
            diversity: 0.9,
            depth: 0.7,
            fallback_used: false,
        }
    }

    fn search_origin() -> SourceOrigin {
        SourceOrigin::SearchResult {
            title: "t".into(),
            url: "https://a.example/".into(),
            description: "d".into(),
            published_at: None,
        }
    }

    #[test]
    fn rejects_weights_that_do_not_sum_to_one() {
        let bad = EnrichmentWeights {
            trust_weight: 0.5,
            reliability_weight: 0.5,
            quality_weight: 0.5,
            depth_weight: 0.5,
            ..EnrichmentWeights::default()
        };
        let err = ContentEnricher::new(bad).unwrap_err();
        assert_eq!(err.kind(), "config");
    }

    #[test]
    fn composite_is_the_weighted_mean() {
        let enricher = ContentEnricher::new(EnrichmentWeights::default()).unwrap();
        let enriched = enricher.enrich(scored(search_origin(), 0.9, 0.8));
        // 0.9*0.3 + 0.8*0.2 + 0.8*0.3 + 0.7*0.2 = 0.81
        assert!((enriched.composite - 0.81).abs() < 1e-9);
        assert_eq!(enriched.source_weight, 0.9);
    }

    #[test]
    fn expert_origin_uses_expert_weight() {
        let enricher = ContentEnricher::new(EnrichmentWeights::default()).unwrap();
        let enriched = enricher.enrich(scored(
            SourceOrigin::ExpertResponse {
                model: "expert-large".into(),
                about_url: None,
            },
            0.85,
            0.8,
        ));
        assert_eq!(enriched.source_weight, 0.75);
        assert!((enriched.confidence() - enriched.composite * 0.75).abs() < 1e-9);
    }

    #[test]
    fn enrichment_is_idempotent() {
        let enricher = ContentEnricher::new(EnrichmentWeights::default()).unwrap();
        let a = enricher.enrich(scored(search_origin(), 0.9, 0.8));
        let b = enricher.enrich(scored(search_origin(), 0.9, 0.8));
        assert_eq!(a.composite, b.composite);
        assert_eq!(a.source_weight, b.source_weight);
    }

    #[test]
    fn composite_stays_in_unit_interval() {
        let enricher = ContentEnricher::new(EnrichmentWeights::default()).unwrap();
        for (trust, quality) in [(0.0, 0.0), (1.0, 1.0), (0.5, 0.5)] {
            let e = enricher.enrich(scored(search_origin(), trust, quality));
            assert!((0.0..=1.0).contains(&e.composite));
        }
    }
}
