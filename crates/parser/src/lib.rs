//! Output parsing: raw generator text in, structured proposals out.

pub mod directives;
pub mod hygiene;
pub mod meta;
pub mod normalize;
pub mod structured;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use loreguard_memory::{Mutation, WorldIntent};

pub use directives::{ExtractedDirectives, extract_directives};
pub use hygiene::{HygieneOptions, clean_dialogue};
pub use meta::detect_meta_text;
pub use normalize::normalize;
pub use structured::{
    CURRENT_SCHEMA_VERSION, StructuredReply, parse_structured_reply, reply_json_schema,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseMode {
    Schema,
    Regex,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub arguments: BTreeMap<String, String>,
}

/// The structured result of parsing one raw generator response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedOutput {
    pub dialogue_text: String,
    pub proposed_mutations: Vec<Mutation>,
    pub proposed_intents: Vec<WorldIntent>,
    pub function_calls: Vec<FunctionCall>,
    pub parse_mode: ParseMode,
    pub parse_failures: Vec<String>,
}

impl ParsedOutput {
    pub fn has_failures(&self) -> bool {
        !self.parse_failures.is_empty()
    }
}

/// Parses raw text in schema mode (when the generator was invoked with an
/// output schema) or regex mode otherwise.
#[derive(Debug, Clone, Default)]
pub struct OutputParser {
    pub hygiene: HygieneOptions,
    pub forbid_speaker_labels: bool,
}

impl OutputParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse(&self, raw: &str, schema_mode: bool) -> ParsedOutput {
        if schema_mode {
            self.parse_schema(raw)
        } else {
            self.parse_regex(raw)
        }
    }

    /// Schema mode. Structural failure yields `parse_mode = Fallback`, empty
    /// dialogue, and one parse-failure entry. Hygiene rules are skipped: the
    /// grammar-constrained output is already shaped.
    pub fn parse_schema(&self, raw: &str) -> ParsedOutput {
        match parse_structured_reply(raw) {
            Ok(reply) => {
                let dialogue_text = normalize(&reply.dialogue);
                let mut parse_failures = Vec::new();
                if dialogue_text.trim().is_empty() {
                    parse_failures.push("empty dialogue".to_string());
                }
                if let Some(label) = detect_meta_text(&dialogue_text, self.forbid_speaker_labels) {
                    parse_failures.push(format!("meta text: {label}"));
                }
                ParsedOutput {
                    dialogue_text,
                    proposed_mutations: reply.mutations,
                    proposed_intents: reply.intents,
                    function_calls: reply.function_calls,
                    parse_mode: ParseMode::Schema,
                    parse_failures,
                }
            }
            Err(reason) => {
                tracing::debug!(reason = %reason, "structured reply parse failed");
                ParsedOutput {
                    dialogue_text: String::new(),
                    proposed_mutations: Vec::new(),
                    proposed_intents: Vec::new(),
                    function_calls: Vec::new(),
                    parse_mode: ParseMode::Fallback,
                    parse_failures: vec![format!("schema parse failure: {reason}")],
                }
            }
        }
    }

    /// Regex mode: extract directives from the raw text, then normalize and
    /// clean the remaining dialogue.
    pub fn parse_regex(&self, raw: &str) -> ParsedOutput {
        let extracted = extract_directives(raw);
        let normalized = normalize(&extracted.remaining);

        let mut parse_failures = extracted.failures;
        if let Some(label) = detect_meta_text(&normalized, self.forbid_speaker_labels) {
            parse_failures.push(format!("meta text: {label}"));
        }

        let dialogue_text = clean_dialogue(&normalized, &self.hygiene);
        if dialogue_text.is_empty() {
            parse_failures.push("empty dialogue".to_string());
        }

        ParsedOutput {
            dialogue_text,
            proposed_mutations: extracted.mutations,
            proposed_intents: extracted.intents,
            function_calls: extracted.function_calls,
            parse_mode: ParseMode::Regex,
            parse_failures,
        }
    }
}
