//! Synthesis modes as data.
//!
//! A mode selects a formatting and emphasis policy. There is one merge
//! algorithm; modes only change how sections are framed and how much of
//! each winning candidate is quoted.

use knowstream_shared::SynthesisMode;

/// Formatting/emphasis policy for one synthesis mode.
#[derive(Debug, Clone, Copy)]
pub struct ModePolicy {
    /// Lead-in for the synthesized document.
    pub heading: &'static str,
    /// Section lead for each resolved sub-topic.
    pub section_label: &'static str,
    /// Character cap on quoted winner content per section.
    pub max_section_chars: usize,
    /// Whether to list supporting sources inline under each section.
    pub cite_inline: bool,
}

impl ModePolicy {
    pub fn for_mode(mode: SynthesisMode) -> Self {
        match mode {
            SynthesisMode::Research => Self {
                heading: "Research synthesis",
                section_label: "Finding",
                max_section_chars: 1200,
                cite_inline: true,
            },
            SynthesisMode::Analysis => Self {
                heading: "Analysis",
                section_label: "Observation",
                max_section_chars: 900,
                cite_inline: true,
            },
            SynthesisMode::Coding => Self {
                heading: "Implementation notes",
                section_label: "Approach",
                max_section_chars: 1600,
                cite_inline: false,
            },
            SynthesisMode::Creative => Self {
                heading: "Synthesis",
                section_label: "Thread",
                max_section_chars: 700,
                cite_inline: false,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_mode_has_a_policy() {
        for mode in [
            SynthesisMode::Research,
            SynthesisMode::Analysis,
            SynthesisMode::Coding,
            SynthesisMode::Creative,
        ] {
            let policy = ModePolicy::for_mode(mode);
            assert!(!policy.heading.is_empty());
            assert!(policy.max_section_chars > 0);
        }
    }
}
