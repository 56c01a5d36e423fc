//! Source fan-out for KnowStream: provider contracts, the token-bucket
//! rate limiter, and the concurrent orchestrator that turns query segments
//! into a stream of candidates.

pub mod limiter;
pub mod orchestrator;
pub mod provider;

pub use limiter::RateLimiter;
pub use orchestrator::{SourceOrchestrator, SourceStats};
pub use provider::{
    ExpertProvider, HttpExpertProvider, HttpSearchProvider, RawSearchItem, SearchProvider,
};
