//! Persistence DTOs for a persona's memory.
//!
//! Snapshot ordering is a pure function of content: canonical facts by id,
//! world state by key, episodic and beliefs by sequence number. Restoring
//! recomputes each counter as `max(sequence_number) + 1`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::schema::{Belief, CanonicalFact, EpisodicMemory, WorldStateEntry};
use crate::store::PersonaMemory;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonaMemorySnapshot {
    pub npc_id: String,
    pub canonical_facts: Vec<CanonicalFact>,
    pub world_state: Vec<WorldStateEntry>,
    pub episodic: Vec<EpisodicMemory>,
    pub beliefs: Vec<Belief>,
    #[serde(default)]
    pub rejected_writes: u64,
}

impl PersonaMemory {
    pub fn snapshot_for_persist(&self) -> PersonaMemorySnapshot {
        let mut episodic: Vec<EpisodicMemory> = self.episodic().to_vec();
        episodic.sort_by_key(|e| e.sequence_number);
        let mut beliefs: Vec<Belief> = self.beliefs().to_vec();
        beliefs.sort_by_key(|b| b.sequence_number);

        PersonaMemorySnapshot {
            npc_id: self.npc_id().to_string(),
            canonical_facts: self.canonical_facts().cloned().collect(),
            world_state: self.world_state().cloned().collect(),
            episodic,
            beliefs,
            rejected_writes: self.rejected_writes(),
        }
    }

    pub fn restore_from_snapshot(snapshot: PersonaMemorySnapshot) -> Self {
        let canonical: BTreeMap<String, CanonicalFact> = snapshot
            .canonical_facts
            .into_iter()
            .map(|fact| (fact.id.clone(), fact))
            .collect();
        let world_state: BTreeMap<String, WorldStateEntry> = snapshot
            .world_state
            .into_iter()
            .map(|entry| (entry.key.clone(), entry))
            .collect();

        Self::restore_parts(
            snapshot.npc_id,
            canonical,
            world_state,
            snapshot.episodic,
            snapshot.beliefs,
            snapshot.rejected_writes,
        )
    }
}
