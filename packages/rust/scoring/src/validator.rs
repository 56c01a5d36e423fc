//! Streaming trust/reliability/authority/freshness validation.
//!
//! Validation is stateless per candidate: scoring candidate N+1 never
//! blocks on candidate N. Below-threshold candidates are tagged `rejected`
//! with their reasons and still flow downstream for confidence accounting,
//! never silently dropped.

use chrono::Utc;
use regex::Regex;
use tracing::debug;
use url::Url;

use knowstream_shared::{Candidate, SourceOrigin, ValidatedCandidate, ValidationConfig};

/// Trust bonus per detected citation, capped at [`CITATION_BONUS_CAP`].
const CITATION_BONUS: f64 = 0.02;
const CITATION_BONUS_CAP: f64 = 0.1;

/// Freshness for candidates whose source reports no timestamp.
const FRESHNESS_UNKNOWN: f64 = 0.75;

/// Freshness for expert responses, which are generated at request time.
const FRESHNESS_GENERATED: f64 = 0.9;

/// Days after which a dated source scores zero freshness.
const FRESHNESS_HORIZON_DAYS: f64 = 365.0;

/// Validates candidates against configurable heuristics.
pub struct SourceValidator {
    config: ValidationConfig,
    allow: Vec<Regex>,
    deny: Vec<Regex>,
    citation_pattern: Regex,
}

impl SourceValidator {
    /// Compile the configured domain patterns. Invalid patterns are skipped,
    /// matching how the crawler-style glob tables behave.
    pub fn new(config: ValidationConfig) -> Self {
        let allow = config
            .allow_domains
            .iter()
            .filter_map(|p| glob_to_regex(p))
            .collect();
        let deny = config
            .deny_domains
            .iter()
            .filter_map(|p| glob_to_regex(p))
            .collect();

        Self {
            config,
            allow,
            deny,
            // Bracketed reference markers like [1] or [12].
            citation_pattern: Regex::new(r"\[\d{1,3}\]").expect("citation regex is valid"),
        }
    }

    /// Score one candidate. All scores land in [0, 1].
    pub fn validate(&self, candidate: Candidate) -> ValidatedCandidate {
        let citation_count = self.count_citations(&candidate.content);
        let trust = self.trust_score(&candidate, citation_count);
        let reliability = self.reliability_score(&candidate.content, citation_count);
        let authority = self.authority_score(&candidate, citation_count);
        let freshness = self.freshness_score(&candidate);

        let mut rejection_reasons = Vec::new();
        if trust < self.config.min_trust {
            rejection_reasons.push(format!("trust {trust:.2} < {:.2}", self.config.min_trust));
        }
        if reliability < self.config.min_reliability {
            rejection_reasons.push(format!(
                "reliability {reliability:.2} < {:.2}",
                self.config.min_reliability
            ));
        }
        if authority < self.config.min_authority {
            rejection_reasons.push(format!(
                "authority {authority:.2} < {:.2}",
                self.config.min_authority
            ));
        }
        if freshness < self.config.min_freshness {
            rejection_reasons.push(format!(
                "freshness {freshness:.2} < {:.2}",
                self.config.min_freshness
            ));
        }
        if citation_count < self.config.min_citations {
            rejection_reasons.push(format!(
                "citations {citation_count} < {}",
                self.config.min_citations
            ));
        }

        let rejected = !rejection_reasons.is_empty();
        if rejected {
            debug!(id = %candidate.id, reasons = ?rejection_reasons, "candidate rejected");
        }

        ValidatedCandidate {
            candidate,
            trust,
            reliability,
            authority,
            freshness,
            citation_count,
            rejected,
            rejection_reasons,
        }
    }

    /// Citations: inline links plus bracketed reference markers.
    fn count_citations(&self, content: &str) -> u32 {
        let links = content.matches("http://").count() + content.matches("https://").count();
        let markers = self.citation_pattern.find_iter(content).count();
        (links + markers) as u32
    }

    fn trust_score(&self, candidate: &Candidate, citations: u32) -> f64 {
        let base = match &candidate.origin {
            SourceOrigin::SearchResult { url, .. } => {
                let host = Url::parse(url)
                    .ok()
                    .and_then(|u| u.host_str().map(str::to_string))
                    .unwrap_or_default();

                if self.deny.iter().any(|p| p.is_match(&host)) {
                    return 0.0;
                }
                if self.allow.iter().any(|p| p.is_match(&host)) {
                    0.95
                } else if url.starts_with("https://") {
                    0.85
                } else {
                    0.6
                }
            }
            SourceOrigin::ExpertResponse { .. } => 0.85,
        };

        let bonus = (f64::from(citations) * CITATION_BONUS).min(CITATION_BONUS_CAP);
        (base + bonus).clamp(0.0, 1.0)
    }

    /// Reliability from content heuristics: enough substance, sentence
    /// structure, and at least one supporting reference.
    fn reliability_score(&self, content: &str, citations: u32) -> f64 {
        let length_part = (content.len() as f64 / 400.0).min(1.0) * 0.5;
        let structure_part = if content.contains('.') { 0.3 } else { 0.0 };
        let citation_part = if citations > 0 { 0.2 } else { 0.0 };
        (length_part + structure_part + citation_part).clamp(0.0, 1.0)
    }

    fn authority_score(&self, candidate: &Candidate, citations: u32) -> f64 {
        let base = match &candidate.origin {
            SourceOrigin::SearchResult { url, .. } => {
                let host = Url::parse(url)
                    .ok()
                    .and_then(|u| u.host_str().map(str::to_string))
                    .unwrap_or_default();

                if self.allow.iter().any(|p| p.is_match(&host)) {
                    0.9
                } else if host.ends_with(".edu") || host.ends_with(".gov") || host.ends_with(".org")
                {
                    0.85
                } else {
                    0.65
                }
            }
            SourceOrigin::ExpertResponse { .. } => 0.8,
        };

        let bonus = (f64::from(citations) * CITATION_BONUS).min(CITATION_BONUS_CAP);
        (base + bonus).clamp(0.0, 1.0)
    }

    fn freshness_score(&self, candidate: &Candidate) -> f64 {
        match &candidate.origin {
            SourceOrigin::SearchResult { published_at, .. } => match published_at {
                Some(published) => {
                    let age_days = (Utc::now() - *published).num_days().max(0) as f64;
                    (1.0 - age_days / FRESHNESS_HORIZON_DAYS).clamp(0.0, 1.0)
                }
                None => FRESHNESS_UNKNOWN,
            },
            SourceOrigin::ExpertResponse { .. } => FRESHNESS_GENERATED,
        }
    }
}

/// Convert a glob-like domain pattern to an anchored regex.
fn glob_to_regex(pattern: &str) -> Option<Regex> {
    let escaped = regex::escape(pattern)
        .replace(r"\*\*", ".*")
        .replace(r"\*", "[^.]*")
        .replace(r"\?", ".");
    Regex::new(&format!("^{escaped}$")).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use uuid::Uuid;

    fn candidate(url: &str, content: &str) -> Candidate {
        Candidate {
            id: Uuid::now_v7().to_string(),
            origin: SourceOrigin::SearchResult {
                title: "t".into(),
                url: url.into(),
                description: content.into(),
                published_at: None,
            },
            content: content.into(),
            seq: 0,
            retrieved_at: Utc::now(),
        }
    }

    fn strong_content() -> String {
        format!(
            "A thorough, well-referenced treatment of the topic. {} \
             See https://refs.example/a and https://refs.example/b for details. \
             Additional context is covered in [1] and [2].",
            "Substantive discussion with complete sentences. ".repeat(6)
        )
    }

    #[test]
    fn strong_candidate_passes_default_thresholds() {
        let validator = SourceValidator::new(ValidationConfig {
            allow_domains: vec!["docs.example.com".into()],
            ..ValidationConfig::default()
        });
        let validated =
            validator.validate(candidate("https://docs.example.com/guide", &strong_content()));

        assert!(!validated.rejected, "reasons: {:?}", validated.rejection_reasons);
        assert!(validated.trust >= 0.8);
        assert!(validated.reliability >= 0.8);
        assert!(validated.citation_count >= 2);
    }

    #[test]
    fn scores_stay_in_unit_interval() {
        let validator = SourceValidator::new(ValidationConfig::default());
        let inputs = [
            candidate("https://a.example/x", ""),
            candidate("http://plain.example/", "short"),
            candidate("https://b.example/y", &strong_content().repeat(10)),
            candidate("not a url", "odd input [1][2][3][4][5][6][7][8][9]"),
        ];
        for input in inputs {
            let v = validator.validate(input);
            for score in [v.trust, v.reliability, v.authority, v.freshness] {
                assert!((0.0..=1.0).contains(&score));
            }
        }
    }

    #[test]
    fn denied_domain_scores_zero_trust() {
        let validator = SourceValidator::new(ValidationConfig {
            deny_domains: vec!["*.spam.example".into()],
            ..ValidationConfig::default()
        });
        let v = validator.validate(candidate("https://ads.spam.example/p", &strong_content()));
        assert_eq!(v.trust, 0.0);
        assert!(v.rejected);
        assert!(v.rejection_reasons.iter().any(|r| r.starts_with("trust")));
    }

    #[test]
    fn rejected_candidates_are_tagged_not_dropped() {
        let validator = SourceValidator::new(ValidationConfig::default());
        let v = validator.validate(candidate("http://thin.example/", "no refs here"));
        assert!(v.rejected);
        assert!(!v.rejection_reasons.is_empty());
        // The candidate itself is intact for downstream accounting.
        assert_eq!(v.candidate.content, "no refs here");
    }

    #[test]
    fn stale_sources_lose_freshness() {
        let validator = SourceValidator::new(ValidationConfig::default());
        let mut old = candidate("https://a.example/old", &strong_content());
        old.origin = SourceOrigin::SearchResult {
            title: "t".into(),
            url: "https://a.example/old".into(),
            description: "d".into(),
            published_at: Some(Utc::now() - Duration::days(400)),
        };
        let v = validator.validate(old);
        assert_eq!(v.freshness, 0.0);

        let recent = Candidate {
            origin: SourceOrigin::SearchResult {
                title: "t".into(),
                url: "https://a.example/new".into(),
                description: "d".into(),
                published_at: Some(Utc::now() - Duration::days(10)),
            },
            ..candidate("https://a.example/new", &strong_content())
        };
        let v = validator.validate(recent);
        assert!(v.freshness > 0.9);
    }

    #[test]
    fn expert_responses_score_without_url() {
        let validator = SourceValidator::new(ValidationConfig::default());
        let expert = Candidate {
            origin: SourceOrigin::ExpertResponse {
                model: "expert-large".into(),
                about_url: None,
            },
            ..candidate("unused", &strong_content())
        };
        let v = validator.validate(expert);
        assert!(v.trust >= 0.8);
        assert!(v.freshness >= FRESHNESS_GENERATED);
    }

    #[test]
    fn citation_counting() {
        let validator = SourceValidator::new(ValidationConfig::default());
        let v = validator.validate(candidate(
            "https://a.example/",
            "see https://x.example/ and [1] plus [2]",
        ));
        assert_eq!(v.citation_count, 3);
    }
}
