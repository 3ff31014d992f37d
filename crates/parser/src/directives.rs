//! Extraction of embedded mutation/intent directives from raw generator text.
//!
//! Directives are square-bracket blocks the prompt teaches the model to emit:
//!
//! ```text
//! [REMEMBER: the player paid the toll | 0.7]
//! [BELIEF: player | generous | 0.8 | 0.5]
//! [RELATE: player | 0.2]
//! [INTENT: open_gate | north_gate | high | reason=toll_paid]
//! [CALL: give_item | item=key,count=1]
//! ```
//!
//! Extraction runs on the raw text, before normalization and hygiene (which
//! would otherwise strip the brackets). Malformed directives are dropped and
//! recorded as parse failures; they never abort the parse.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;

use loreguard_memory::{EpisodeType, IntentPriority, Mutation, WorldIntent, sha256_hex};

use crate::FunctionCall;

#[derive(Debug, Default)]
pub struct ExtractedDirectives {
    pub remaining: String,
    pub mutations: Vec<Mutation>,
    pub intents: Vec<WorldIntent>,
    pub function_calls: Vec<FunctionCall>,
    pub failures: Vec<String>,
}

fn directive_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\[(REMEMBER|BELIEF|RELATE|INTENT|CALL):\s*([^\]]*)\]")
            .unwrap_or_else(|_| Regex::new("$^").unwrap())
    })
}

pub fn extract_directives(raw: &str) -> ExtractedDirectives {
    let mut out = ExtractedDirectives::default();
    let mut remaining = String::with_capacity(raw.len());
    let mut cursor = 0usize;

    for captures in directive_regex().captures_iter(raw) {
        let whole = match captures.get(0) {
            Some(m) => m,
            None => continue,
        };
        remaining.push_str(&raw[cursor..whole.start()]);
        cursor = whole.end();

        let kind = captures.get(1).map(|m| m.as_str()).unwrap_or("");
        let payload = captures.get(2).map(|m| m.as_str()).unwrap_or("").trim();
        if let Err(reason) = apply_directive(kind, payload, &mut out) {
            out.failures.push(format!("malformed {kind} directive: {reason}"));
        }
    }
    remaining.push_str(&raw[cursor..]);
    out.remaining = remaining;
    out
}

fn apply_directive(kind: &str, payload: &str, out: &mut ExtractedDirectives) -> Result<(), String> {
    let fields: Vec<&str> = payload.split('|').map(str::trim).collect();
    match kind {
        "REMEMBER" => {
            let content = *fields.first().unwrap_or(&"");
            if content.is_empty() {
                return Err("empty content".to_string());
            }
            let significance = match fields.get(1) {
                Some(raw) => parse_unit_float(raw, "significance")?,
                None => 0.5,
            };
            out.mutations.push(Mutation::AppendEpisodic {
                id: format!("ep-{}", short_hash(content)),
                content: content.to_string(),
                episode_type: EpisodeType::Dialogue,
                significance,
            });
            Ok(())
        }
        "BELIEF" => {
            let [subject, predicate, confidence_raw] = first_three(&fields)?;
            let confidence = parse_unit_float(confidence_raw, "confidence")?;
            let sentiment = match fields.get(3) {
                Some(raw) => parse_signed_unit_float(raw, "sentiment")?,
                None => 0.0,
            };
            out.mutations.push(Mutation::TransformBelief {
                id: format!("belief-{}", short_hash(&format!("{subject}|{predicate}"))),
                subject: subject.to_string(),
                predicate: predicate.to_string(),
                confidence,
                sentiment,
            });
            Ok(())
        }
        "RELATE" => {
            let subject = non_empty(fields.first(), "subject")?;
            let delta_raw = non_empty(fields.get(1), "delta")?;
            let sentiment_delta = parse_signed_unit_float(delta_raw, "delta")?;
            let confidence = match fields.get(2) {
                Some(raw) => parse_unit_float(raw, "confidence")?,
                None => 0.6,
            };
            out.mutations.push(Mutation::TransformRelationship {
                subject: subject.to_string(),
                sentiment_delta,
                confidence,
            });
            Ok(())
        }
        "INTENT" => {
            let intent_type = non_empty(fields.first(), "intent type")?;
            let target = non_empty(fields.get(1), "target")?;
            let priority = match fields.get(2) {
                Some(raw) if !raw.is_empty() => parse_priority(raw)?,
                _ => IntentPriority::Normal,
            };
            let parameters = match fields.get(3) {
                Some(raw) => parse_kv(raw),
                None => BTreeMap::new(),
            };
            out.intents.push(WorldIntent {
                intent_type: intent_type.to_string(),
                target: target.to_string(),
                priority,
                parameters,
            });
            Ok(())
        }
        "CALL" => {
            let name = non_empty(fields.first(), "function name")?;
            let arguments = match fields.get(1) {
                Some(raw) => parse_kv(raw),
                None => BTreeMap::new(),
            };
            out.function_calls.push(FunctionCall {
                name: name.to_string(),
                arguments,
            });
            Ok(())
        }
        other => Err(format!("unknown directive kind {other}")),
    }
}

fn first_three<'a>(fields: &[&'a str]) -> Result<[&'a str; 3], String> {
    match (fields.first(), fields.get(1), fields.get(2)) {
        (Some(&a), Some(&b), Some(&c)) if !a.is_empty() && !b.is_empty() && !c.is_empty() => {
            Ok([a, b, c])
        }
        _ => Err("expected subject|predicate|confidence".to_string()),
    }
}

fn non_empty<'a>(field: Option<&&'a str>, name: &str) -> Result<&'a str, String> {
    match field {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(format!("missing {name}")),
    }
}

fn parse_unit_float(raw: &str, name: &str) -> Result<f64, String> {
    let value: f64 = raw.parse().map_err(|_| format!("{name} is not a number: {raw}"))?;
    if !(0.0..=1.0).contains(&value) {
        return Err(format!("{name} out of [0,1]: {raw}"));
    }
    Ok(value)
}

fn parse_signed_unit_float(raw: &str, name: &str) -> Result<f64, String> {
    let value: f64 = raw.parse().map_err(|_| format!("{name} is not a number: {raw}"))?;
    if !(-1.0..=1.0).contains(&value) {
        return Err(format!("{name} out of [-1,1]: {raw}"));
    }
    Ok(value)
}

fn parse_priority(raw: &str) -> Result<IntentPriority, String> {
    match raw.to_ascii_lowercase().as_str() {
        "low" => Ok(IntentPriority::Low),
        "normal" => Ok(IntentPriority::Normal),
        "high" => Ok(IntentPriority::High),
        "critical" => Ok(IntentPriority::Critical),
        other => Err(format!("unknown priority {other}")),
    }
}

fn parse_kv(raw: &str) -> BTreeMap<String, String> {
    raw.split(',')
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            let key = key.trim();
            if key.is_empty() {
                return None;
            }
            Some((key.to_string(), value.trim().to_string()))
        })
        .collect()
}

fn short_hash(content: &str) -> String {
    let mut hex = sha256_hex(content.as_bytes());
    hex.truncate(12);
    hex
}
