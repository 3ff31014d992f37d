//! Applies approved mutations to memory and hands approved intents to the
//! dispatcher.

use tokio::sync::RwLock;

use loreguard_memory::{
    AuthoritySource, BeliefDraft, EpisodicDraft, Mutation, PersonaMemory, Ticks,
};
use loreguard_validate::GateResult;

use crate::intents::IntentDispatcher;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MutationBatch {
    pub applied: u32,
    pub failed: u32,
    pub authority_violations: u32,
    pub intents_emitted: u32,
}

/// Apply a passing gate result: mutations in order under the write lock, then
/// intents on the channel after the lock is released. Individual mutation
/// failures are logged and counted; the rest of the batch still applies.
pub async fn apply_gate_result(
    memory: &RwLock<PersonaMemory>,
    gate: &GateResult,
    now_ticks: Ticks,
    dispatcher: &IntentDispatcher,
) -> MutationBatch {
    let mut batch = MutationBatch::default();

    {
        let mut memory = memory.write().await;
        for mutation in &gate.approved_mutations {
            match apply_one(&mut memory, mutation, now_ticks) {
                Ok(()) => batch.applied += 1,
                Err(error) => {
                    batch.failed += 1;
                    if matches!(error, loreguard_memory::MemoryError::InsufficientAuthority { .. })
                        || matches!(error, loreguard_memory::MemoryError::CanonicalImmutable { .. })
                    {
                        batch.authority_violations += 1;
                    }
                    tracing::warn!(npc_id = %memory.npc_id(), error = %error,
                        "approved mutation failed to apply; continuing batch");
                }
            }
        }
    }

    for intent in &gate.approved_intents {
        if dispatcher.emit(intent.clone()).await {
            batch.intents_emitted += 1;
        }
    }
    batch
}

fn apply_one(
    memory: &mut PersonaMemory,
    mutation: &Mutation,
    now_ticks: Ticks,
) -> Result<(), loreguard_memory::MemoryError> {
    match mutation {
        Mutation::AppendEpisodic { id, content, episode_type, significance } => memory
            .insert_episodic(
                EpisodicDraft {
                    id: id.clone(),
                    content: content.clone(),
                    episode_type: *episode_type,
                    significance: *significance,
                },
                AuthoritySource::ValidatedOutput,
                now_ticks,
            )
            .map(|_| ()),
        Mutation::TransformBelief { id, subject, predicate, confidence, sentiment } => memory
            .upsert_belief(
                BeliefDraft {
                    id: id.clone(),
                    subject: subject.clone(),
                    predicate: predicate.clone(),
                    confidence: *confidence,
                    sentiment: *sentiment,
                },
                AuthoritySource::ValidatedOutput,
                now_ticks,
            )
            .map(|_| ()),
        Mutation::TransformRelationship { subject, sentiment_delta, confidence } => memory
            .adjust_relationship(
                subject,
                *sentiment_delta,
                *confidence,
                AuthoritySource::ValidatedOutput,
                now_ticks,
            )
            .map(|_| ()),
        // The gate routes embedded intents to `approved_intents`; one slipping
        // through here is a no-op rather than a memory write.
        Mutation::EmitWorldIntent(_) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intents::intent_channel;
    use loreguard_memory::{EpisodeType, IntentPriority, RELATIONSHIP_PREDICATE, WorldIntent};
    use std::collections::BTreeMap;

    fn gate_with(mutations: Vec<Mutation>, intents: Vec<WorldIntent>) -> GateResult {
        GateResult {
            passed: true,
            failures: vec![],
            approved_mutations: mutations,
            rejected_mutations: vec![],
            approved_intents: intents,
        }
    }

    #[tokio::test]
    async fn applies_mutations_in_order_and_emits_intents() {
        let memory = RwLock::new(PersonaMemory::new("npc"));
        let (dispatcher, mut rx) = intent_channel(4);

        let gate = gate_with(
            vec![
                Mutation::AppendEpisodic {
                    id: "ep-1".to_string(),
                    content: "toll paid".to_string(),
                    episode_type: EpisodeType::Dialogue,
                    significance: 0.6,
                },
                Mutation::TransformBelief {
                    id: "b-1".to_string(),
                    subject: "player".to_string(),
                    predicate: "honest".to_string(),
                    confidence: 0.7,
                    sentiment: 0.2,
                },
                Mutation::TransformRelationship {
                    subject: "player".to_string(),
                    sentiment_delta: 0.1,
                    confidence: 0.5,
                },
            ],
            vec![WorldIntent {
                intent_type: "open_gate".to_string(),
                target: "north".to_string(),
                priority: IntentPriority::High,
                parameters: BTreeMap::new(),
            }],
        );

        let batch = apply_gate_result(&memory, &gate, 500, &dispatcher).await;
        assert_eq!(batch.applied, 3);
        assert_eq!(batch.failed, 0);
        assert_eq!(batch.intents_emitted, 1);

        let memory = memory.read().await;
        assert_eq!(memory.episodic().len(), 1);
        assert!(memory.belief("player", "honest").is_some());
        assert!(memory.belief("player", RELATIONSHIP_PREDICATE).is_some());
        drop(memory);

        assert_eq!(rx.recv().await.unwrap().intent_type, "open_gate");
    }

    #[tokio::test]
    async fn individual_failure_does_not_stop_batch() {
        let memory = RwLock::new(PersonaMemory::new("npc"));
        let (dispatcher, _rx) = intent_channel(4);

        let gate = gate_with(
            vec![
                // Out-of-range significance fails at the store.
                Mutation::AppendEpisodic {
                    id: "bad".to_string(),
                    content: "x".to_string(),
                    episode_type: EpisodeType::Observation,
                    significance: 7.0,
                },
                Mutation::AppendEpisodic {
                    id: "good".to_string(),
                    content: "y".to_string(),
                    episode_type: EpisodeType::Observation,
                    significance: 0.5,
                },
            ],
            vec![],
        );

        let batch = apply_gate_result(&memory, &gate, 1, &dispatcher).await;
        assert_eq!(batch.applied, 1);
        assert_eq!(batch.failed, 1);
        assert_eq!(memory.read().await.episodic().len(), 1);
    }
}
