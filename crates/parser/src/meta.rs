//! Meta-text rejection: a small fixed list of patterns that indicate the
//! model is narrating about itself rather than speaking in character.

use std::sync::OnceLock;

use regex::Regex;

struct MetaPattern {
    label: &'static str,
    regex: &'static str,
}

const META_PATTERNS: &[MetaPattern] = &[
    MetaPattern { label: "example marker", regex: r"(?im)^\s*example\s*:" },
    MetaPattern { label: "ai self-reference", regex: r"(?i)\bas an ai\b" },
    MetaPattern { label: "language-model self-reference", regex: r"(?i)\bas a (large )?language model\b" },
    MetaPattern { label: "assistant self-reference", regex: r"(?i)\bas an assistant\b" },
    MetaPattern { label: "system marker", regex: r"(?im)^\s*system\s*:" },
    MetaPattern { label: "prompt leak", regex: r"(?i)\byour (instructions|system prompt)\b" },
];

// One or two capitalized words followed by a colon at line start. Requiring
// capitalization on every word keeps ordinary sentences with colons
// ("I told you: stay back.") from matching.
const SPEAKER_LABEL: &str = r"(?m)^[A-Z][A-Za-z0-9_'-]*( [A-Z][A-Za-z0-9_'-]*)?:";

fn compiled() -> &'static Vec<(&'static str, Regex)> {
    static COMPILED: OnceLock<Vec<(&'static str, Regex)>> = OnceLock::new();
    COMPILED.get_or_init(|| {
        META_PATTERNS
            .iter()
            .filter_map(|p| Regex::new(p.regex).ok().map(|r| (p.label, r)))
            .collect()
    })
}

fn speaker_regex() -> &'static Regex {
    static SPEAKER: OnceLock<Regex> = OnceLock::new();
    SPEAKER.get_or_init(|| Regex::new(SPEAKER_LABEL).unwrap_or_else(|_| Regex::new("$^").unwrap()))
}

/// Returns the label of the first matching meta pattern, if any.
pub fn detect_meta_text(text: &str, forbid_speaker_labels: bool) -> Option<&'static str> {
    for (label, regex) in compiled() {
        if regex.is_match(text) {
            return Some(*label);
        }
    }
    if forbid_speaker_labels && speaker_regex().is_match(text) {
        return Some("speaker label");
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_example_marker() {
        assert_eq!(detect_meta_text("Example: a greeting", false), Some("example marker"));
    }

    #[test]
    fn detects_ai_self_reference_case_insensitive() {
        assert!(detect_meta_text("Well, AS AN AI, I cannot say.", false).is_some());
    }

    #[test]
    fn speaker_labels_only_when_forbidden() {
        let text = "Guard: Halt, who goes there?";
        assert_eq!(detect_meta_text(text, false), None);
        assert_eq!(detect_meta_text(text, true), Some("speaker label"));
    }

    #[test]
    fn plain_dialogue_passes() {
        assert_eq!(detect_meta_text("Halt! Who goes there?", true), None);
    }

    #[test]
    fn mid_sentence_colon_is_not_a_speaker_label() {
        assert_eq!(detect_meta_text("I told you: stay back.", true), None);
    }
}
