//! Versioned structured-output replies.
//!
//! Schema descriptors are explicit and authored next to the DTOs they
//! describe; there is no reflection-driven generation. A reply carries a
//! `schema_version` discriminator and older versions are migrated forward
//! through a fixed table.

use serde::{Deserialize, Serialize};
use serde_json::json;

use loreguard_memory::{EpisodeType, Mutation, WorldIntent, sha256_hex};

use crate::FunctionCall;

pub const CURRENT_SCHEMA_VERSION: u32 = 2;

/// The current (v2) structured reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredReply {
    pub schema_version: u32,
    pub dialogue: String,
    #[serde(default)]
    pub mutations: Vec<Mutation>,
    #[serde(default)]
    pub intents: Vec<WorldIntent>,
    #[serde(default)]
    pub function_calls: Vec<FunctionCall>,
}

/// Explicit JSON-schema descriptor for the current reply version, passed to
/// the generator as its output grammar.
pub fn reply_json_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "schema_version": { "type": "integer", "const": CURRENT_SCHEMA_VERSION },
            "dialogue": { "type": "string" },
            "mutations": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "kind": {
                            "type": "string",
                            "enum": [
                                "append_episodic",
                                "transform_belief",
                                "transform_relationship",
                                "emit_world_intent"
                            ]
                        }
                    },
                    "required": ["kind"]
                }
            },
            "intents": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "intent_type": { "type": "string" },
                        "target": { "type": "string" },
                        "priority": {
                            "type": "string",
                            "enum": ["low", "normal", "high", "critical"]
                        },
                        "parameters": { "type": "object" }
                    },
                    "required": ["intent_type", "target"]
                }
            },
            "function_calls": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "name": { "type": "string" },
                        "arguments": { "type": "object" }
                    },
                    "required": ["name"]
                }
            }
        },
        "required": ["schema_version", "dialogue"]
    })
}

/// Parse a raw generator response as a structured reply, migrating older
/// schema versions forward. Accepts either a bare JSON object or one wrapped
/// in a fenced ```json block.
pub fn parse_structured_reply(raw: &str) -> Result<StructuredReply, String> {
    let value = extract_json_value(raw).ok_or_else(|| "no JSON object found".to_string())?;
    let version = value
        .get("schema_version")
        .and_then(|v| v.as_u64())
        .unwrap_or(1) as u32;

    // Migration table: every supported older version maps to current.
    match version {
        1 => migrate_v1(&value),
        CURRENT_SCHEMA_VERSION => serde_json::from_value(value).map_err(|e| e.to_string()),
        other => Err(format!("unsupported schema_version {other}")),
    }
}

/// v1 replies carried `dialogue`, a flat `remember` string list, and intents.
fn migrate_v1(value: &serde_json::Value) -> Result<StructuredReply, String> {
    let dialogue = value
        .get("dialogue")
        .and_then(|v| v.as_str())
        .ok_or_else(|| "v1 reply missing dialogue".to_string())?
        .to_string();

    let mutations = value
        .get("remember")
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.as_str())
                .map(|content| Mutation::AppendEpisodic {
                    id: format!("ep-{}", &sha256_hex(content.as_bytes())[..12]),
                    content: content.to_string(),
                    episode_type: EpisodeType::Dialogue,
                    significance: 0.5,
                })
                .collect()
        })
        .unwrap_or_default();

    let intents = value
        .get("intents")
        .cloned()
        .map(serde_json::from_value::<Vec<WorldIntent>>)
        .transpose()
        .map_err(|e| format!("v1 intents invalid: {e}"))?
        .unwrap_or_default();

    Ok(StructuredReply {
        schema_version: CURRENT_SCHEMA_VERSION,
        dialogue,
        mutations,
        intents,
        function_calls: Vec::new(),
    })
}

/// Find the JSON object in a response: fenced ```json block first, then a
/// bare object spanning the outermost braces.
fn extract_json_value(response: &str) -> Option<serde_json::Value> {
    if let Some(fence_start) = response.find("```json") {
        let after_fence = &response[fence_start + "```json".len()..];
        if let Some(fence_end) = after_fence.find("```") {
            let body = after_fence[..fence_end].trim();
            if let Ok(value) = serde_json::from_str(body) {
                return Some(value);
            }
        }
    }

    let trimmed = response.trim();
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&trimmed[start..=end]).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_current_version() {
        let raw = r#"{"schema_version":2,"dialogue":"Halt!","mutations":[],"intents":[]}"#;
        let reply = parse_structured_reply(raw).unwrap();
        assert_eq!(reply.schema_version, 2);
        assert_eq!(reply.dialogue, "Halt!");
    }

    #[test]
    fn parses_fenced_block() {
        let raw = "Here you go:\n```json\n{\"schema_version\":2,\"dialogue\":\"Hi.\"}\n```";
        let reply = parse_structured_reply(raw).unwrap();
        assert_eq!(reply.dialogue, "Hi.");
    }

    #[test]
    fn migrates_v1_remember_list() {
        let raw = r#"{"dialogue":"Done.","remember":["the player paid","the gate opened"]}"#;
        let reply = parse_structured_reply(raw).unwrap();
        assert_eq!(reply.schema_version, CURRENT_SCHEMA_VERSION);
        assert_eq!(reply.mutations.len(), 2);
        assert!(matches!(reply.mutations[0], Mutation::AppendEpisodic { .. }));
    }

    #[test]
    fn unknown_version_is_rejected() {
        let raw = r#"{"schema_version":99,"dialogue":"?"}"#;
        assert!(parse_structured_reply(raw).is_err());
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(parse_structured_reply("not json at all").is_err());
    }

    #[test]
    fn v2_with_mutations_roundtrips() {
        let raw = r#"{
            "schema_version": 2,
            "dialogue": "The toll is two coins.",
            "mutations": [
                {"kind":"transform_belief","id":"b1","subject":"player","predicate":"stingy","confidence":0.6,"sentiment":-0.2}
            ],
            "intents": [
                {"intent_type":"block_path","target":"south_gate","priority":"normal","parameters":{}}
            ]
        }"#;
        let reply = parse_structured_reply(raw).unwrap();
        assert_eq!(reply.mutations.len(), 1);
        assert_eq!(reply.intents.len(), 1);
    }

    #[test]
    fn schema_descriptor_names_current_version() {
        let schema = reply_json_schema();
        assert_eq!(schema["properties"]["schema_version"]["const"], CURRENT_SCHEMA_VERSION);
    }
}
