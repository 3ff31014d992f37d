//! Proposed memory mutations and world intents.
//!
//! These are *proposals* until the validation gate approves them; only the
//! mutation controller turns approved proposals into state.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::schema::EpisodeType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentPriority {
    Low,
    Normal,
    High,
    Critical,
}

impl Default for IntentPriority {
    fn default() -> Self {
        Self::Normal
    }
}

/// A request for the host system to act on the world. Parameters use a
/// `BTreeMap` so serialization order is a pure function of content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldIntent {
    pub intent_type: String,
    pub target: String,
    #[serde(default)]
    pub priority: IntentPriority,
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

/// A proposed change to authoritative memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Mutation {
    AppendEpisodic {
        id: String,
        content: String,
        episode_type: EpisodeType,
        significance: f64,
    },
    TransformBelief {
        id: String,
        subject: String,
        predicate: String,
        confidence: f64,
        sentiment: f64,
    },
    TransformRelationship {
        subject: String,
        sentiment_delta: f64,
        confidence: f64,
    },
    EmitWorldIntent(WorldIntent),
}

impl Mutation {
    /// The id the mutation targets, used by the mutation-legality gate to
    /// refuse writes aimed at canonical facts.
    pub fn target_id(&self) -> &str {
        match self {
            Self::AppendEpisodic { id, .. } => id,
            Self::TransformBelief { id, .. } => id,
            Self::TransformRelationship { subject, .. } => subject,
            Self::EmitWorldIntent(intent) => &intent.target,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mutation_target_ids() {
        let m = Mutation::AppendEpisodic {
            id: "ep-1".to_string(),
            content: "saw a dragon".to_string(),
            episode_type: EpisodeType::Observation,
            significance: 0.9,
        };
        assert_eq!(m.target_id(), "ep-1");

        let m = Mutation::EmitWorldIntent(WorldIntent {
            intent_type: "open_gate".to_string(),
            target: "north_gate".to_string(),
            priority: IntentPriority::High,
            parameters: BTreeMap::new(),
        });
        assert_eq!(m.target_id(), "north_gate");
    }

    #[test]
    fn mutation_serde_tagged_roundtrip() {
        let m = Mutation::TransformBelief {
            id: "b-1".to_string(),
            subject: "player".to_string(),
            predicate: "trustworthy".to_string(),
            confidence: 0.8,
            sentiment: 0.4,
        };
        let json = serde_json::to_string(&m).unwrap();
        assert!(json.contains("\"kind\":\"transform_belief\""));
        let back: Mutation = serde_json::from_str(&json).unwrap();
        assert_eq!(back, m);
    }

    #[test]
    fn intent_parameters_serialize_in_key_order() {
        let mut parameters = BTreeMap::new();
        parameters.insert("zebra".to_string(), "1".to_string());
        parameters.insert("apple".to_string(), "2".to_string());
        let intent = WorldIntent {
            intent_type: "spawn".to_string(),
            target: "market".to_string(),
            priority: IntentPriority::Normal,
            parameters,
        };
        let json = serde_json::to_string(&intent).unwrap();
        assert!(json.find("apple").unwrap() < json.find("zebra").unwrap());
    }
}
