//! Memory entities and the authority hierarchy.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::ticks::Ticks;

/// Who is asserting a fact. Rank decides what a source may write; persisted
/// DTOs carry the rank as a bare integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthoritySource {
    LlmSuggestion,
    ValidatedOutput,
    GameSystem,
    Designer,
}

impl AuthoritySource {
    pub fn rank(self) -> u8 {
        match self {
            Self::LlmSuggestion => 0,
            Self::ValidatedOutput => 1,
            Self::GameSystem => 2,
            Self::Designer => 3,
        }
    }

    pub fn from_rank(rank: u8) -> Option<Self> {
        match rank {
            0 => Some(Self::LlmSuggestion),
            1 => Some(Self::ValidatedOutput),
            2 => Some(Self::GameSystem),
            3 => Some(Self::Designer),
            _ => None,
        }
    }
}

impl Serialize for AuthoritySource {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.rank())
    }
}

impl<'de> Deserialize<'de> for AuthoritySource {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let rank = u8::deserialize(deserializer)?;
        Self::from_rank(rank)
            .ok_or_else(|| D::Error::custom(format!("invalid authority rank {rank}")))
    }
}

/// What kind of event an episodic memory records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpisodeType {
    Observation,
    Dialogue,
    WorldEvent,
    Reflection,
}

impl EpisodeType {
    pub fn as_u8(self) -> u8 {
        match self {
            Self::Observation => 0,
            Self::Dialogue => 1,
            Self::WorldEvent => 2,
            Self::Reflection => 3,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Observation),
            1 => Some(Self::Dialogue),
            2 => Some(Self::WorldEvent),
            3 => Some(Self::Reflection),
            _ => None,
        }
    }
}

impl Serialize for EpisodeType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.as_u8())
    }
}

impl<'de> Deserialize<'de> for EpisodeType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = u8::deserialize(deserializer)?;
        Self::from_u8(value)
            .ok_or_else(|| D::Error::custom(format!("invalid episode type {value}")))
    }
}

/// Authority tier 1: immutable world truth. Content and id never change once
/// inserted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalFact {
    pub id: String,
    pub content: String,
    pub source: AuthoritySource,
    /// Cheap contradiction hints consumed by the validation gate. The memory
    /// itself performs no semantic analysis.
    #[serde(default)]
    pub contradiction_keywords: Vec<String>,
}

/// Authority tier 2: mutable key/value game facts. Value writable by
/// `GameSystem` or higher only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldStateEntry {
    pub key: String,
    pub value: String,
    pub source: AuthoritySource,
    pub updated_at_ticks: Ticks,
}

/// Authority tier 3: timestamped, decaying observation log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodicMemory {
    pub id: String,
    pub content: String,
    pub episode_type: EpisodeType,
    /// In `[0, 1]`.
    pub significance: f64,
    pub created_at_ticks: Ticks,
    pub sequence_number: u64,
    pub decay_score: f64,
    #[serde(default)]
    pub contradicted: bool,
    pub source: AuthoritySource,
}

/// Authority tier 4: NPC opinion. May be wrong; may be replaced wholesale.
/// Relationships are beliefs whose `predicate` is [`RELATIONSHIP_PREDICATE`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Belief {
    pub id: String,
    pub subject: String,
    pub predicate: String,
    /// In `[0, 1]`.
    pub confidence: f64,
    /// In `[-1, 1]`.
    pub sentiment: f64,
    pub created_at_ticks: Ticks,
    pub sequence_number: u64,
    #[serde(default)]
    pub contradicted: bool,
    pub source: AuthoritySource,
}

pub const RELATIONSHIP_PREDICATE: &str = "relationship";

/// Draft for an episodic insert; the store assigns sequence number and
/// creation ticks.
#[derive(Debug, Clone)]
pub struct EpisodicDraft {
    pub id: String,
    pub content: String,
    pub episode_type: EpisodeType,
    pub significance: f64,
}

/// Draft for a belief insert/replace.
#[derive(Debug, Clone)]
pub struct BeliefDraft {
    pub id: String,
    pub subject: String,
    pub predicate: String,
    pub confidence: f64,
    pub sentiment: f64,
}
