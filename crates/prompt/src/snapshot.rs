//! Immutable per-attempt state snapshot.
//!
//! A snapshot bundles every input one inference attempt depends on. Retries
//! fork the snapshot with a merged constraint set and a bumped attempt number;
//! nothing else changes; in particular the snapshot time is never re-read.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use loreguard_memory::{MemoryBundle, Ticks};
use loreguard_rules::{ConstraintSet, InteractionContext};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DialogueExchange {
    pub player: String,
    pub npc: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FewShotExample {
    pub player: String,
    pub npc: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub context: InteractionContext,
    pub constraints: ConstraintSet,
    pub memories: MemoryBundle,
    pub system_prompt: String,
    pub dialogue_history: Vec<DialogueExchange>,
    pub few_shot: Vec<FewShotExample>,
    pub attempt_number: u32,
    pub max_attempts: u32,
    pub snapshot_time_ticks: Ticks,
}

impl StateSnapshot {
    pub fn interaction_count(&self) -> i64 {
        self.context.interaction_count
    }

    /// Fork for the next retry attempt: constraints are merged with the
    /// escalation set, the attempt number is replaced, everything else is
    /// copied verbatim (including `snapshot_time_ticks`).
    pub fn fork_for_retry(&self, extra_constraints: &ConstraintSet, new_attempt: u32) -> Self {
        Self {
            constraints: self.constraints.merge(extra_constraints),
            attempt_number: new_attempt,
            ..self.clone()
        }
    }

    /// Cheap content hash over the canonical serialization, for audit.
    pub fn content_hash(&self) -> String {
        let serialized = serde_json::to_vec(self).unwrap_or_default();
        let digest = Sha256::digest(&serialized);
        let mut out = String::with_capacity(digest.len() * 2);
        for byte in digest {
            out.push_str(&format!("{byte:02x}"));
        }
        out
    }
}

/// Collects snapshot inputs; `build` freezes them.
#[derive(Debug, Default)]
pub struct SnapshotBuilder {
    context: Option<InteractionContext>,
    constraints: ConstraintSet,
    memories: MemoryBundle,
    system_prompt: String,
    dialogue_history: Vec<DialogueExchange>,
    few_shot: Vec<FewShotExample>,
    max_attempts: u32,
    snapshot_time_ticks: Ticks,
}

impl SnapshotBuilder {
    pub fn new(context: InteractionContext) -> Self {
        Self {
            context: Some(context),
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn constraints(mut self, constraints: ConstraintSet) -> Self {
        self.constraints = constraints;
        self
    }

    pub fn memories(mut self, memories: MemoryBundle) -> Self {
        self.memories = memories;
        self
    }

    pub fn system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = system_prompt.into();
        self
    }

    pub fn dialogue_history(mut self, history: Vec<DialogueExchange>) -> Self {
        self.dialogue_history = history;
        self
    }

    pub fn few_shot(mut self, examples: Vec<FewShotExample>) -> Self {
        self.few_shot = examples;
        self
    }

    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn snapshot_time_ticks(mut self, ticks: Ticks) -> Self {
        self.snapshot_time_ticks = ticks;
        self
    }

    pub fn build(self) -> StateSnapshot {
        StateSnapshot {
            context: self.context.unwrap_or_else(|| {
                InteractionContext::player_utterance("", "", "")
            }),
            constraints: self.constraints,
            memories: self.memories,
            system_prompt: self.system_prompt,
            dialogue_history: self.dialogue_history,
            few_shot: self.few_shot,
            attempt_number: 0,
            max_attempts: self.max_attempts,
            snapshot_time_ticks: self.snapshot_time_ticks,
        }
    }
}
