//! The synthesizer proper: sub-topic grouping, conflict resolution, and
//! the final merged document.
//!
//! Conflicts are resolved by composite confidence. Within a sub-topic the
//! highest-confidence candidate provides the section content; the rest are
//! kept as supporting attribution, never discarded from the source list.

use std::collections::HashSet;

use tracing::{debug, warn};

use knowstream_scoring::quality::{jaccard, keyword_set};
use knowstream_shared::{
    EnrichedCandidate, FeatureFlags, KnowStreamError, Result, SourceOrigin, SynthesisMode,
    SynthesisResult, ValidatedCandidate,
};

use crate::mode::ModePolicy;

/// Two candidates sharing at least this much keyword overlap are treated
/// as addressing the same sub-topic.
const SUBTOPIC_OVERLAP: f64 = 0.3;

/// Merges enriched candidates into a single [`SynthesisResult`].
pub struct KnowledgeSynthesizer {
    mode: SynthesisMode,
    policy: ModePolicy,
}

struct SubTopic {
    /// Keyword set of the first member; later members join by overlap
    /// against this key.
    key: HashSet<String>,
    members: Vec<usize>,
}

impl KnowledgeSynthesizer {
    /// The reserved strategy flags have no algorithm behind them yet; when
    /// one is set the synthesizer logs and uses confidence-weighted merging.
    pub fn new(mode: SynthesisMode, flags: &FeatureFlags) -> Self {
        if flags.any_advanced() {
            warn!(
                moe_routing = flags.moe_routing,
                task_vectors = flags.task_vectors,
                slerp_merging = flags.slerp_merging,
                "advanced synthesis flags set but unimplemented, using confidence-weighted merging"
            );
        }
        Self {
            mode,
            policy: ModePolicy::for_mode(mode),
        }
    }

    /// Merge the surviving candidates into one result.
    ///
    /// Rejected candidates are excluded from content and attribution. Fails
    /// with `InsufficientSources` when nothing survived validation.
    pub fn synthesize(
        &self,
        query: &str,
        candidates: &[EnrichedCandidate],
    ) -> Result<SynthesisResult> {
        let survivors: Vec<&EnrichedCandidate> = candidates
            .iter()
            .filter(|c| !c.scored.validated.rejected)
            .collect();

        if survivors.is_empty() {
            return Err(KnowStreamError::InsufficientSources {
                validated: 0,
                required: 1,
            });
        }

        let topics = group_subtopics(&survivors);
        debug!(
            survivors = survivors.len(),
            subtopics = topics.len(),
            mode = %self.mode,
            "synthesizing"
        );

        let mut content = format!("{}: {query}\n", self.policy.heading);
        let mut sources: Vec<String> = Vec::new();

        for (i, topic) in topics.iter().enumerate() {
            // Highest confidence wins the section; ties go to arrival order.
            let mut members: Vec<&EnrichedCandidate> =
                topic.members.iter().map(|&idx| survivors[idx]).collect();
            members.sort_by(|a, b| {
                b.confidence()
                    .partial_cmp(&a.confidence())
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(a.candidate().seq.cmp(&b.candidate().seq))
            });
            let winner = members[0];
            let supporting = &members[1..];

            content.push_str(&format!(
                "\n{} {}: {}\n{}\n",
                self.policy.section_label,
                i + 1,
                topic_label(&topic.key),
                truncate(&winner.candidate().content, self.policy.max_section_chars),
            ));

            if self.policy.cite_inline {
                content.push_str(&format!("Source: {}\n", winner.candidate().origin.label()));
                if !supporting.is_empty() {
                    let labels: Vec<String> = supporting
                        .iter()
                        .map(|c| c.candidate().origin.label())
                        .collect();
                    content.push_str(&format!("Supported by: {}\n", labels.join(", ")));
                }
            }

            for member in &members {
                let label = member.candidate().origin.label();
                if !sources.contains(&label) {
                    sources.push(label);
                }
            }
        }

        Ok(SynthesisResult {
            content,
            sources,
            confidence: aggregate_confidence(&survivors),
            coherence: coherence(survivors.len(), topics.len()),
            consistency: consistency(&survivors, &topics),
            mode: self.mode,
        })
    }
}

/// Greedy sub-topic grouping: each candidate joins the first topic whose
/// key it overlaps, otherwise it opens a new one.
fn group_subtopics(survivors: &[&EnrichedCandidate]) -> Vec<SubTopic> {
    let mut topics: Vec<SubTopic> = Vec::new();
    for (idx, candidate) in survivors.iter().enumerate() {
        let keywords = keyword_set(&candidate.candidate().content);
        match topics
            .iter_mut()
            .find(|t| jaccard(&keywords, &t.key) >= SUBTOPIC_OVERLAP)
        {
            Some(topic) => topic.members.push(idx),
            None => topics.push(SubTopic {
                key: keywords,
                members: vec![idx],
            }),
        }
    }
    topics
}

/// Short deterministic label for a sub-topic: its first few keywords in
/// sorted order.
fn topic_label(key: &HashSet<String>) -> String {
    let mut words: Vec<&str> = key.iter().map(String::as_str).collect();
    words.sort_unstable();
    words.truncate(3);
    if words.is_empty() {
        "general".to_string()
    } else {
        words.join(", ")
    }
}

/// Weighted mean of composite scores, weighted by source weight.
fn aggregate_confidence(survivors: &[&EnrichedCandidate]) -> f64 {
    let weight_sum: f64 = survivors.iter().map(|c| c.source_weight).sum();
    if weight_sum == 0.0 {
        return 0.0;
    }
    let weighted: f64 = survivors.iter().map(|c| c.composite * c.source_weight).sum();
    (weighted / weight_sum).clamp(0.0, 1.0)
}

/// Coherence decays with fragmentation: one sub-topic scores 1.0, every
/// candidate in its own sub-topic scores 0.5.
fn coherence(survivors: usize, topics: usize) -> f64 {
    if survivors <= 1 {
        return 1.0;
    }
    1.0 - 0.5 * (topics.saturating_sub(1) as f64 / (survivors - 1) as f64)
}

/// Mean intra-topic keyword agreement. Singleton topics count as fully
/// consistent.
fn consistency(survivors: &[&EnrichedCandidate], topics: &[SubTopic]) -> f64 {
    if topics.is_empty() {
        return 0.0;
    }
    let mut total = 0.0;
    for topic in topics {
        if topic.members.len() < 2 {
            total += 1.0;
            continue;
        }
        let sets: Vec<HashSet<String>> = topic
            .members
            .iter()
            .map(|&idx| keyword_set(&survivors[idx].candidate().content))
            .collect();
        let mut pair_sum = 0.0;
        let mut pairs = 0usize;
        for i in 0..sets.len() {
            for j in (i + 1)..sets.len() {
                pair_sum += jaccard(&sets[i], &sets[j]);
                pairs += 1;
            }
        }
        total += pair_sum / pairs as f64;
    }
    (total / topics.len() as f64).clamp(0.0, 1.0)
}

/// Patterns for interim analysis events, computed over the candidates
/// validated so far.
pub fn interim_patterns(validated: &[&ValidatedCandidate]) -> Vec<String> {
    let mut patterns = Vec::new();
    if validated.is_empty() {
        return patterns;
    }

    let passed = validated.iter().filter(|v| !v.rejected).count();
    patterns.push(format!(
        "{passed}/{} candidates passed validation",
        validated.len()
    ));

    let experts = validated
        .iter()
        .filter(|v| matches!(v.candidate.origin, SourceOrigin::ExpertResponse { .. }))
        .count();
    if experts > 0 {
        patterns.push(format!("{experts} expert follow-ups in the mix"));
    }

    let mean_trust =
        validated.iter().map(|v| v.trust).sum::<f64>() / validated.len() as f64;
    patterns.push(format!("mean trust {mean_trust:.2}"));

    let cited = validated.iter().filter(|v| v.citation_count > 0).count();
    if cited > 0 {
        patterns.push(format!("{cited} candidates carry citations"));
    }

    patterns
}

fn truncate(content: &str, max_chars: usize) -> String {
    if content.chars().count() <= max_chars {
        return content.to_string();
    }
    let cut: String = content.chars().take(max_chars).collect();
    format!("{}…", cut.trim_end())
}
