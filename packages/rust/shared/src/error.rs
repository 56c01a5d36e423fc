//! Error types for KnowStream.
//!
//! Library crates use [`KnowStreamError`] via `thiserror`.
//! App crates (cli) wrap this with `color-eyre` for rich diagnostics.
//!
//! Per-candidate failures (`Timeout`, scoring fallbacks) never abort a
//! request; pipeline-level failures (`InvalidQuery`, `InsufficientSources`,
//! `UpstreamUnavailable`, `ResourceExhausted`) terminate the event stream
//! with a single terminal error event.

/// Top-level error type for all KnowStream operations.
#[derive(Debug, thiserror::Error)]
pub enum KnowStreamError {
    /// The query was empty or otherwise unusable. Fatal, pre-pipeline.
    #[error("invalid query: {reason}")]
    InvalidQuery { reason: String },

    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error talking to a search or expert provider.
    #[error("network error: {0}")]
    Network(String),

    /// A provider returned a malformed or unexpected response.
    #[error("provider error: {0}")]
    Provider(String),

    /// The rate limiter could not grant a token in time. Retried with
    /// backoff internally; only surfaced once retries are exhausted.
    #[error("rate limit exceeded")]
    RateLimitExceeded,

    /// A single outbound call exceeded its timeout. Degrades the affected
    /// candidate to a partial-result error, never aborts the stream.
    #[error("timeout: {what}")]
    Timeout { what: String },

    /// Fewer candidates survived validation/scoring than the request
    /// requires. Terminal.
    #[error("insufficient sources: {validated} validated, {required} required")]
    InsufficientSources { validated: usize, required: usize },

    /// No provider was reachable after retry exhaustion. `partial` records
    /// whether any candidates were delivered before the failure.
    #[error("upstream unavailable: {message} (partial={partial})")]
    UpstreamUnavailable { message: String, partial: bool },

    /// The per-request memory budget was breached mid-stream. Terminal.
    #[error("resource budget exhausted: {used_bytes} bytes used of {budget_bytes}")]
    ResourceExhausted {
        used_bytes: usize,
        budget_bytes: usize,
    },

    /// The consumer closed the event stream; in-flight work was abandoned.
    #[error("request cancelled")]
    Cancelled,
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, KnowStreamError>;

impl KnowStreamError {
    /// Create an invalid-query error from any displayable message.
    pub fn invalid_query(reason: impl Into<String>) -> Self {
        Self::InvalidQuery {
            reason: reason.into(),
        }
    }

    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a provider error from any displayable message.
    pub fn provider(msg: impl Into<String>) -> Self {
        Self::Provider(msg.into())
    }

    /// Stable machine-readable kind, used as the `kind` field of error
    /// events on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidQuery { .. } => "invalid_query",
            Self::Config { .. } => "config",
            Self::Network(_) => "network",
            Self::Provider(_) => "provider",
            Self::RateLimitExceeded => "rate_limit_exceeded",
            Self::Timeout { .. } => "timeout",
            Self::InsufficientSources { .. } => "insufficient_sources",
            Self::UpstreamUnavailable { .. } => "upstream_unavailable",
            Self::ResourceExhausted { .. } => "resource_exhausted",
            Self::Cancelled => "cancelled",
        }
    }

    /// Whether this error terminates the request (as opposed to degrading
    /// a single candidate).
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::InvalidQuery { .. }
            | Self::Config { .. }
            | Self::InsufficientSources { .. }
            | Self::UpstreamUnavailable { .. }
            | Self::ResourceExhausted { .. }
            | Self::Cancelled => true,
            Self::Network(_)
            | Self::Provider(_)
            | Self::RateLimitExceeded
            | Self::Timeout { .. } => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = KnowStreamError::invalid_query("empty after trim");
        assert_eq!(err.to_string(), "invalid query: empty after trim");

        let err = KnowStreamError::InsufficientSources {
            validated: 0,
            required: 5,
        };
        assert!(err.to_string().contains("0 validated"));
    }

    #[test]
    fn fatal_classification() {
        assert!(KnowStreamError::invalid_query("x").is_fatal());
        assert!(
            KnowStreamError::UpstreamUnavailable {
                message: "dns".into(),
                partial: false,
            }
            .is_fatal()
        );
        assert!(
            !KnowStreamError::Timeout {
                what: "fetch".into()
            }
            .is_fatal()
        );
        assert!(!KnowStreamError::RateLimitExceeded.is_fatal());
    }

    #[test]
    fn kinds_are_stable() {
        assert_eq!(
            KnowStreamError::ResourceExhausted {
                used_bytes: 11,
                budget_bytes: 10,
            }
            .kind(),
            "resource_exhausted"
        );
        assert_eq!(
            KnowStreamError::Timeout { what: "x".into() }.kind(),
            "timeout"
        );
    }
}
