//! Query type classification over a fixed scheme:
//! technical, conversational, code, or mixed.

use knowstream_shared::QueryType;

/// Result of classification before the ambiguity threshold is applied.
#[derive(Debug, Clone, Copy)]
pub struct Classification {
    pub primary_type: QueryType,
    /// Confidence in [0, 1]: share of indicator hits belonging to the
    /// winning category, damped when total evidence is thin.
    pub confidence: f64,
}

/// Indicators of code-shaped queries: syntax fragments and error talk.
const CODE_MARKERS: &[&str] = &[
    "fn ", "def ", "class ", "::", "=>", "();", "{}", "[]", "`", "error:", "panic", "traceback",
    "stack trace", "compile", "segfault", "nullpointerexception", "unwrap", "import ", "#include",
];

/// Indicators of technical-domain queries.
const TECHNICAL_MARKERS: &[&str] = &[
    "algorithm", "architecture", "protocol", "performance", "latency", "throughput", "database",
    "configure", "deploy", "kubernetes", "docker", "encryption", "cache", "index", "concurrency",
    "async", "thread", "memory", "network", "api", "server", "compiler", "runtime", "benchmark",
];

/// Indicators of conversational phrasing.
const CONVERSATIONAL_MARKERS: &[&str] = &[
    "how do i", "how can i", "what is", "what are", "why does", "why is", "should i", "can you",
    "please", "help me", "best way", "is it worth", "explain",
];

fn count_hits(lowered: &str, markers: &[&str]) -> usize {
    markers.iter().filter(|m| lowered.contains(*m)).count()
}

/// Classify a trimmed, non-empty query.
pub fn classify(query: &str) -> Classification {
    let lowered = query.to_lowercase();

    let code = count_hits(&lowered, CODE_MARKERS);
    let technical = count_hits(&lowered, TECHNICAL_MARKERS);
    let conversational = count_hits(&lowered, CONVERSATIONAL_MARKERS);
    let total = code + technical + conversational;

    if total == 0 {
        // No evidence either way: treat as technical with low confidence so
        // the analyzer's threshold decides whether to call it ambiguous.
        return Classification {
            primary_type: QueryType::Technical,
            confidence: 0.34,
        };
    }

    let max = code.max(technical).max(conversational);
    let runners_up = [code, technical, conversational]
        .into_iter()
        .filter(|&n| n > 0 && n == max)
        .count();

    let primary_type = if runners_up > 1 {
        QueryType::Mixed
    } else if code == max {
        QueryType::Code
    } else if technical == max {
        QueryType::Technical
    } else {
        QueryType::Conversational
    };

    // Share of evidence for the winner, damped toward 0.5 when the total
    // hit count is small.
    let share = max as f64 / total as f64;
    let evidence_factor = (total as f64 / (total as f64 + 2.0)).min(1.0);
    let confidence = (share * (0.5 + 0.5 * evidence_factor)).clamp(0.0, 1.0);

    Classification {
        primary_type,
        confidence,
    }
}
