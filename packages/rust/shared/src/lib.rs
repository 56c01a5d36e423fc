//! Shared types, error model, events, and configuration for KnowStream.
//!
//! This crate is the foundation depended on by all other KnowStream crates.
//! It provides:
//! - [`KnowStreamError`], the unified error type
//! - Domain types ([`Candidate`] and its annotated wrappers, [`QueryAnalysis`],
//!   [`SynthesisResult`], [`RequestId`])
//! - The typed [`Event`] stream and its producer/consumer handles
//! - Per-request [`ResourceBudget`] accounting
//! - Configuration ([`AppConfig`], config loading and validation)

pub mod config;
pub mod error;
pub mod event;
pub mod resource;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AnalyzerConfig, AppConfig, DefaultsConfig, EnrichmentWeights, FeatureFlags, LimitsConfig,
    ProvidersConfig, QualityConfig, ValidationConfig, config_dir, config_file_path, init_config,
    load_config, load_config_from, validate_api_key, validate_config,
};
pub use error::{KnowStreamError, Result};
pub use event::{Event, EventSender, EventStream, SearchResultInfo, SelectedSource, event_channel};
pub use resource::ResourceBudget;
pub use types::{
    Ambiguity, AmbiguityKind, Candidate, ComplexityLevel, EnrichedCandidate, QueryAnalysis,
    QueryType, RequestId, ScoredCandidate, SourceOrigin, SynthesisMode, SynthesisResult,
    ValidatedCandidate,
};
