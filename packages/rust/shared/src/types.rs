//! Core domain types for the KnowStream aggregation pipeline.
//!
//! Candidates are annotated in place as they move through the stages:
//! [`Candidate`] → [`ValidatedCandidate`] → [`ScoredCandidate`] →
//! [`EnrichedCandidate`]. Each wrapper takes ownership of the previous one
//! so the pipeline never duplicates candidate content.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// RequestId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper for per-request identifiers (time-sortable).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub Uuid);

impl RequestId {
    /// Generate a new time-sortable request identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RequestId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// Query analysis
// ---------------------------------------------------------------------------

/// Primary query type from the fixed classification scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryType {
    Technical,
    Conversational,
    Code,
    Mixed,
    /// Classification confidence fell below the configured threshold.
    Ambiguous,
}

/// Complexity level derived from the raw complexity score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplexityLevel {
    Simple,
    Intermediate,
    Complex,
}

/// Category of a detected ambiguity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AmbiguityKind {
    Linguistic,
    Structural,
    Technical,
}

/// One detected ambiguous term with its surrounding context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ambiguity {
    /// The ambiguous lexical item.
    pub term: String,
    /// Which kind of ambiguity was detected.
    pub kind: AmbiguityKind,
    /// A short slice of the query around the term.
    pub context: String,
}

/// Immutable result of query analysis; produced once, read-only downstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryAnalysis {
    /// Primary detected type.
    pub primary_type: QueryType,
    /// Confidence of the type classification, in [0, 1].
    pub confidence: f64,
    /// Complexity level derived from `complexity_score`.
    pub complexity_level: ComplexityLevel,
    /// Raw complexity score, in [0, 1].
    pub complexity_score: f64,
    /// Whether any ambiguity was detected.
    pub ambiguous: bool,
    /// Every detected ambiguity instance.
    pub ambiguities: Vec<Ambiguity>,
    /// Ordered search-ready sub-queries.
    pub segments: Vec<String>,
}

// ---------------------------------------------------------------------------
// Candidates
// ---------------------------------------------------------------------------

/// Where a candidate came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "origin", rename_all = "snake_case")]
pub enum SourceOrigin {
    /// One item from the search provider.
    SearchResult {
        title: String,
        url: String,
        description: String,
        /// Publish/update timestamp, when the provider reports one.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        published_at: Option<DateTime<Utc>>,
    },
    /// A response from an LLM expert follow-up.
    ExpertResponse {
        /// Model that produced the response.
        model: String,
        /// URL of the search result the follow-up expanded, if any.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        about_url: Option<String>,
    },
}

impl SourceOrigin {
    /// The URL this candidate is attributable to, if it has one.
    pub fn url(&self) -> Option<&str> {
        match self {
            Self::SearchResult { url, .. } => Some(url),
            Self::ExpertResponse { about_url, .. } => about_url.as_deref(),
        }
    }

    /// Human-readable source label used in synthesis attribution.
    pub fn label(&self) -> String {
        match self {
            Self::SearchResult { url, .. } => url.clone(),
            Self::ExpertResponse { model, about_url } => match about_url {
                Some(url) => format!("{model} ({url})"),
                None => model.clone(),
            },
        }
    }
}

/// One unit of retrieved information, owned by the pipeline until emitted
/// or discarded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    /// Unique candidate identifier (UUID v7).
    pub id: String,
    /// Source origin (search result or expert response).
    pub origin: SourceOrigin,
    /// Raw retrieved content.
    pub content: String,
    /// Arrival sequence number within the request.
    pub seq: u64,
    /// When the pipeline received this candidate.
    pub retrieved_at: DateTime<Utc>,
}

impl Candidate {
    /// Approximate buffered size of this candidate, charged against the
    /// per-request [`crate::resource::ResourceBudget`].
    pub fn estimated_bytes(&self) -> usize {
        // Content dominates; struct overhead is a flat charge.
        self.content.len() + self.origin.label().len() + 128
    }
}

/// A candidate annotated with validation scores. All scores are in [0, 1].
///
/// Below-threshold candidates are tagged `rejected` but still flow
/// downstream so synthesis can account for them and callers can audit
/// rejection reasons; they are never silently dropped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatedCandidate {
    /// The underlying candidate, owned.
    pub candidate: Candidate,
    /// Trust score from domain patterns and citations.
    pub trust: f64,
    /// Reliability score from content heuristics.
    pub reliability: f64,
    /// Authority score from source metadata.
    pub authority: f64,
    /// Freshness score from timestamp age.
    pub freshness: f64,
    /// Citations detected in the content.
    pub citation_count: u32,
    /// Whether the candidate failed a minimum threshold.
    pub rejected: bool,
    /// Which thresholds the candidate failed, for auditing.
    pub rejection_reasons: Vec<String>,
}

/// A validated candidate annotated with quality scores.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredCandidate {
    /// The underlying validated candidate, owned.
    pub validated: ValidatedCandidate,
    /// Content-quality score in [0, 1].
    pub quality: f64,
    /// Diversity relative to the request's prior scored candidates.
    pub diversity: f64,
    /// Structural/informational density score in [0, 1].
    pub depth: f64,
    /// Set when the deterministic fallback score was substituted after a
    /// scoring failure.
    pub fallback_used: bool,
}

impl ScoredCandidate {
    /// Shortcut to the innermost candidate.
    pub fn candidate(&self) -> &Candidate {
        &self.validated.candidate
    }
}

/// A scored candidate annotated with synthesis metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichedCandidate {
    /// The underlying scored candidate, owned.
    pub scored: ScoredCandidate,
    /// Configured weight of this candidate's source kind.
    pub source_weight: f64,
    /// Weighted combination of the upstream scores.
    pub composite: f64,
}

impl EnrichedCandidate {
    /// Shortcut to the innermost candidate.
    pub fn candidate(&self) -> &Candidate {
        self.scored.candidate()
    }

    /// Composite confidence used for conflict resolution:
    /// validated scores × quality × source weight, folded into `composite`.
    pub fn confidence(&self) -> f64 {
        self.composite * self.source_weight
    }
}

// ---------------------------------------------------------------------------
// Synthesis
// ---------------------------------------------------------------------------

/// Synthesis modes; mode is data selecting a weighting/formatting policy,
/// not a subclass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SynthesisMode {
    Research,
    Analysis,
    Coding,
    Creative,
}

impl Default for SynthesisMode {
    fn default() -> Self {
        Self::Research
    }
}

impl std::str::FromStr for SynthesisMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "research" => Ok(Self::Research),
            "analysis" => Ok(Self::Analysis),
            "coding" => Ok(Self::Coding),
            "creative" => Ok(Self::Creative),
            other => Err(format!("unknown synthesis mode: {other}")),
        }
    }
}

impl std::fmt::Display for SynthesisMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Research => "research",
            Self::Analysis => "analysis",
            Self::Coding => "coding",
            Self::Creative => "creative",
        };
        write!(f, "{s}")
    }
}

/// Terminal entity of a request: the merged, conflict-resolved answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisResult {
    /// Merged content.
    pub content: String,
    /// Source labels of contributing candidates (subset of candidates that
    /// survived validation; never hallucinated).
    pub sources: Vec<String>,
    /// Weighted mean of contributing candidate confidences.
    pub confidence: f64,
    /// Coherence score of the merged content.
    pub coherence: f64,
    /// Consistency score across contributing candidates.
    pub consistency: f64,
    /// Mode the synthesis ran under.
    pub mode: SynthesisMode,
}
