//! Immutable trigger descriptor for one interaction.

use serde::{Deserialize, Serialize};

/// Why an interaction fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerReason {
    PlayerUtterance,
    ZoneEntry,
    TimerElapsed,
    WorldEvent,
    ScriptedBeat,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionContext {
    pub npc_id: String,
    pub reason: TriggerReason,
    /// Empty for non-utterance triggers.
    pub player_input: String,
    pub scene: String,
    pub tags: Vec<String>,
    /// Per-NPC monotonic interaction number; doubles as the generator seed.
    pub interaction_count: i64,
}

impl InteractionContext {
    pub fn player_utterance(
        npc_id: impl Into<String>,
        player_input: impl Into<String>,
        scene: impl Into<String>,
    ) -> Self {
        Self {
            npc_id: npc_id.into(),
            reason: TriggerReason::PlayerUtterance,
            player_input: player_input.into(),
            scene: scene.into(),
            tags: Vec::new(),
            interaction_count: 0,
        }
    }

    pub fn trigger(
        npc_id: impl Into<String>,
        reason: TriggerReason,
        scene: impl Into<String>,
    ) -> Self {
        Self {
            npc_id: npc_id.into(),
            reason,
            player_input: String::new(),
            scene: scene.into(),
            tags: Vec::new(),
            interaction_count: 0,
        }
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }
}
