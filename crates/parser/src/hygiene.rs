//! Dialogue hygiene for regex-mode output.
//!
//! Structured (schema) output skips this entirely; a grammar-constrained
//! reply is already shaped.

use std::sync::OnceLock;

use regex::Regex;

#[derive(Debug, Clone)]
pub struct HygieneOptions {
    /// Remove `*stage directions*`.
    pub strip_stage_directions: bool,
    /// Remove `[bracketed script directions]`.
    pub strip_bracketed: bool,
    /// Remove a leading `Name:` speaker prefix.
    pub strip_speaker_prefix: bool,
    /// Collapse the reply onto a single line.
    pub force_single_line: bool,
    /// If the stream ended mid-thought on a known dangling token, cut back to
    /// the last complete sentence.
    pub truncate_dangling: bool,
}

impl Default for HygieneOptions {
    fn default() -> Self {
        Self {
            strip_stage_directions: true,
            strip_bracketed: true,
            strip_speaker_prefix: true,
            force_single_line: false,
            truncate_dangling: true,
        }
    }
}

/// Words that signal the generator stopped mid-phrase.
const DANGLING_TOKENS: &[&str] = &[
    "the", "a", "an", "and", "or", "but", "with", "of", "to", "in", "is", "was", "my", "your",
];

fn stage_direction_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\*[^*]*\*").unwrap_or_else(|_| Regex::new("$^").unwrap()))
}

fn bracketed_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[[^\]]*\]").unwrap_or_else(|_| Regex::new("$^").unwrap()))
}

fn speaker_prefix_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[A-Z][A-Za-z0-9_'-]*( [A-Z][A-Za-z0-9_'-]*)?:\s*")
            .unwrap_or_else(|_| Regex::new("$^").unwrap())
    })
}

fn multi_space_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"  +").unwrap_or_else(|_| Regex::new("$^").unwrap()))
}

pub fn clean_dialogue(text: &str, options: &HygieneOptions) -> String {
    let mut cleaned = text.to_string();

    if options.strip_stage_directions {
        cleaned = stage_direction_regex().replace_all(&cleaned, "").into_owned();
    }
    if options.strip_bracketed {
        cleaned = bracketed_regex().replace_all(&cleaned, "").into_owned();
    }
    if options.strip_speaker_prefix {
        cleaned = speaker_prefix_regex().replace(cleaned.trim_start(), "").into_owned();
    }
    if options.force_single_line {
        cleaned = cleaned.replace('\n', " ");
    }
    if options.truncate_dangling {
        cleaned = truncate_to_last_sentence_if_dangling(&cleaned);
    }

    let cleaned = multi_space_regex().replace_all(&cleaned, " ").into_owned();
    cleaned.trim().to_string()
}

/// If the text ends on a dangling token (no closing punctuation), cut back to
/// the end of the last complete sentence. Leaves text alone when there is no
/// sentence boundary to fall back to.
fn truncate_to_last_sentence_if_dangling(text: &str) -> String {
    let trimmed = text.trim_end();
    if trimmed.ends_with(['.', '!', '?', '"', '\u{2019}', '\u{201d}']) {
        return text.to_string();
    }

    let last_word = trimmed
        .rsplit(|c: char| c.is_whitespace())
        .next()
        .unwrap_or("")
        .trim_matches(|c: char| !c.is_alphanumeric())
        .to_lowercase();
    if !DANGLING_TOKENS.contains(&last_word.as_str()) {
        return text.to_string();
    }

    match trimmed.rfind(['.', '!', '?']) {
        Some(idx) => trimmed[..=idx].to_string(),
        None => text.to_string(),
    }
}
