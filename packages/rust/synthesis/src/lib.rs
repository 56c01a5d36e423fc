//! Knowledge synthesis: merges enriched candidates into one coherent,
//! conflict-resolved answer with per-claim source attribution.

pub mod mode;
pub mod synthesizer;

pub use mode::ModePolicy;
pub use synthesizer::{KnowledgeSynthesizer, interim_patterns};
