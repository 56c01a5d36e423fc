//! Per-candidate scoring stages: validation (trust/reliability/authority/
//! freshness), quality scoring (quality/diversity/depth with fallback), and
//! enrichment (source weights and the composite quality metric).

pub mod enricher;
pub mod quality;
pub mod validator;

pub use enricher::ContentEnricher;
pub use quality::QualityScorer;
pub use validator::SourceValidator;
