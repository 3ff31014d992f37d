//! Per-NPC authoritative memory with authority-checked writes.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::schema::{
    AuthoritySource, Belief, BeliefDraft, CanonicalFact, EpisodicDraft, EpisodicMemory,
    RELATIONSHIP_PREDICATE, WorldStateEntry,
};
use crate::ticks::Ticks;

#[derive(Debug, Error, PartialEq)]
pub enum MemoryError {
    #[error("canonical fact `{id}` already exists and is immutable")]
    CanonicalImmutable { id: String },
    #[error("source rank {actual} below required rank {required} for {operation}")]
    InsufficientAuthority {
        operation: &'static str,
        required: u8,
        actual: u8,
    },
    #[error("{field} must be within {range}, got {value}")]
    ValueOutOfRange {
        field: &'static str,
        range: &'static str,
        value: f64,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecayReport {
    pub rescored: usize,
    pub pruned: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStats {
    pub canonical: usize,
    pub world_state: usize,
    pub episodic: usize,
    pub beliefs: usize,
    pub rejected_writes: u64,
}

/// The four collections of one NPC, plus the monotonic sequence counters.
///
/// Owned by exactly one NPC pipeline; callers wrap it in a lock and never
/// hold that lock across the generator await. Canonical and world-state tiers
/// live in `BTreeMap`s so iteration is ordinal-ordered without an extra sort.
#[derive(Debug, Clone)]
pub struct PersonaMemory {
    npc_id: String,
    canonical: BTreeMap<String, CanonicalFact>,
    world_state: BTreeMap<String, WorldStateEntry>,
    episodic: Vec<EpisodicMemory>,
    beliefs: Vec<Belief>,
    next_episodic_seq: u64,
    next_belief_seq: u64,
    rejected_writes: u64,
}

impl PersonaMemory {
    pub fn new(npc_id: impl Into<String>) -> Self {
        Self {
            npc_id: npc_id.into(),
            canonical: BTreeMap::new(),
            world_state: BTreeMap::new(),
            episodic: Vec::new(),
            beliefs: Vec::new(),
            next_episodic_seq: 0,
            next_belief_seq: 0,
            rejected_writes: 0,
        }
    }

    pub fn npc_id(&self) -> &str {
        &self.npc_id
    }

    // ── Canonical facts (tier 1) ─────────────────────────────────────────────

    /// Insert an immutable canonical fact. Fails if the id exists (facts are
    /// never modified) or the source is below `Designer`.
    pub fn insert_canonical(
        &mut self,
        id: impl Into<String>,
        content: impl Into<String>,
        contradiction_keywords: Vec<String>,
        source: AuthoritySource,
    ) -> Result<(), MemoryError> {
        let id = id.into();
        if source.rank() < AuthoritySource::Designer.rank() {
            self.rejected_writes += 1;
            tracing::warn!(npc_id = %self.npc_id, fact_id = %id, source_rank = source.rank(),
                "rejected canonical insert from low-authority source");
            return Err(MemoryError::InsufficientAuthority {
                operation: "insert_canonical",
                required: AuthoritySource::Designer.rank(),
                actual: source.rank(),
            });
        }
        if self.canonical.contains_key(&id) {
            self.rejected_writes += 1;
            tracing::warn!(npc_id = %self.npc_id, fact_id = %id,
                "rejected write to existing canonical fact");
            return Err(MemoryError::CanonicalImmutable { id });
        }

        self.canonical.insert(
            id.clone(),
            CanonicalFact {
                id,
                content: content.into(),
                source,
                contradiction_keywords,
            },
        );
        Ok(())
    }

    pub fn canonical_fact(&self, id: &str) -> Option<&CanonicalFact> {
        self.canonical.get(id)
    }

    pub fn has_canonical(&self, id: &str) -> bool {
        self.canonical.contains_key(id)
    }

    /// Canonical facts in ordinal id order.
    pub fn canonical_facts(&self) -> impl Iterator<Item = &CanonicalFact> {
        self.canonical.values()
    }

    // ── World state (tier 2) ─────────────────────────────────────────────────

    /// Upsert a world-state value. Requires source rank >= `GameSystem`; the
    /// timestamp comes from the caller, never from a clock read here.
    pub fn set_world_state(
        &mut self,
        key: impl Into<String>,
        value: impl Into<String>,
        source: AuthoritySource,
        now_ticks: Ticks,
    ) -> Result<(), MemoryError> {
        let key = key.into();
        if source.rank() < AuthoritySource::GameSystem.rank() {
            self.rejected_writes += 1;
            tracing::warn!(npc_id = %self.npc_id, key = %key, source_rank = source.rank(),
                "rejected world-state write from low-authority source");
            return Err(MemoryError::InsufficientAuthority {
                operation: "set_world_state",
                required: AuthoritySource::GameSystem.rank(),
                actual: source.rank(),
            });
        }

        self.world_state.insert(
            key.clone(),
            WorldStateEntry {
                key,
                value: value.into(),
                source,
                updated_at_ticks: now_ticks,
            },
        );
        Ok(())
    }

    pub fn world_state_value(&self, key: &str) -> Option<&str> {
        self.world_state.get(key).map(|entry| entry.value.as_str())
    }

    /// World-state entries in ordinal key order.
    pub fn world_state(&self) -> impl Iterator<Item = &WorldStateEntry> {
        self.world_state.values()
    }

    // ── Episodic memories (tier 3) ───────────────────────────────────────────

    /// Append an episodic memory, assigning the next sequence number.
    /// Requires source rank >= `ValidatedOutput`.
    pub fn insert_episodic(
        &mut self,
        draft: EpisodicDraft,
        source: AuthoritySource,
        now_ticks: Ticks,
    ) -> Result<u64, MemoryError> {
        self.require_rank(source, AuthoritySource::ValidatedOutput, "insert_episodic")?;
        if !(0.0..=1.0).contains(&draft.significance) {
            return Err(MemoryError::ValueOutOfRange {
                field: "significance",
                range: "[0, 1]",
                value: draft.significance,
            });
        }

        let sequence_number = self.next_episodic_seq;
        self.next_episodic_seq += 1;
        self.episodic.push(EpisodicMemory {
            id: draft.id,
            content: draft.content,
            episode_type: draft.episode_type,
            significance: draft.significance,
            created_at_ticks: now_ticks,
            sequence_number,
            decay_score: 1.0,
            contradicted: false,
            source,
        });
        Ok(sequence_number)
    }

    pub fn episodic(&self) -> &[EpisodicMemory] {
        &self.episodic
    }

    pub fn mark_episodic_contradicted(&mut self, id: &str) -> bool {
        for entry in &mut self.episodic {
            if entry.id == id {
                entry.contradicted = true;
                return true;
            }
        }
        false
    }

    /// Rescore decay from each entry's age and drop entries below the prune
    /// threshold. Scores are a pure function of `now_ticks`, so repeating a
    /// pass at the same instant is a no-op. Only an explicit decay cycle may
    /// prune; retrieval never does.
    pub fn decay(
        &mut self,
        now_ticks: Ticks,
        half_life_ticks: Ticks,
        prune_below: f64,
    ) -> DecayReport {
        if half_life_ticks <= 0 {
            return DecayReport::default();
        }

        let mut report = DecayReport::default();
        for entry in &mut self.episodic {
            let elapsed = (now_ticks - entry.created_at_ticks).max(0);
            entry.decay_score =
                0.5_f64.powf(elapsed as f64 / half_life_ticks as f64);
            report.rescored += 1;
        }

        let before = self.episodic.len();
        self.episodic.retain(|entry| entry.decay_score >= prune_below);
        report.pruned = before - self.episodic.len();
        report
    }

    // ── Beliefs (tier 4) ─────────────────────────────────────────────────────

    /// Insert or replace a belief keyed by `(subject, predicate)`. The old
    /// entry, if any, is discarded; the new one gets a fresh sequence number.
    /// Requires source rank >= `ValidatedOutput`.
    pub fn upsert_belief(
        &mut self,
        draft: BeliefDraft,
        source: AuthoritySource,
        now_ticks: Ticks,
    ) -> Result<u64, MemoryError> {
        self.require_rank(source, AuthoritySource::ValidatedOutput, "upsert_belief")?;
        if !(0.0..=1.0).contains(&draft.confidence) {
            return Err(MemoryError::ValueOutOfRange {
                field: "confidence",
                range: "[0, 1]",
                value: draft.confidence,
            });
        }
        if !(-1.0..=1.0).contains(&draft.sentiment) {
            return Err(MemoryError::ValueOutOfRange {
                field: "sentiment",
                range: "[-1, 1]",
                value: draft.sentiment,
            });
        }

        self.beliefs
            .retain(|b| !(b.subject == draft.subject && b.predicate == draft.predicate));

        let sequence_number = self.next_belief_seq;
        self.next_belief_seq += 1;
        self.beliefs.push(Belief {
            id: draft.id,
            subject: draft.subject,
            predicate: draft.predicate,
            confidence: draft.confidence,
            sentiment: draft.sentiment,
            created_at_ticks: now_ticks,
            sequence_number,
            contradicted: false,
            source,
        });
        Ok(sequence_number)
    }

    /// Shift the relationship belief toward `sentiment_delta`, creating it at
    /// neutral if absent.
    pub fn adjust_relationship(
        &mut self,
        subject: &str,
        sentiment_delta: f64,
        confidence: f64,
        source: AuthoritySource,
        now_ticks: Ticks,
    ) -> Result<u64, MemoryError> {
        let current = self
            .beliefs
            .iter()
            .find(|b| b.subject == subject && b.predicate == RELATIONSHIP_PREDICATE)
            .map(|b| b.sentiment)
            .unwrap_or(0.0);

        self.upsert_belief(
            BeliefDraft {
                id: format!("rel-{subject}"),
                subject: subject.to_string(),
                predicate: RELATIONSHIP_PREDICATE.to_string(),
                confidence,
                sentiment: (current + sentiment_delta).clamp(-1.0, 1.0),
            },
            source,
            now_ticks,
        )
    }

    pub fn beliefs(&self) -> &[Belief] {
        &self.beliefs
    }

    pub fn belief(&self, subject: &str, predicate: &str) -> Option<&Belief> {
        self.beliefs
            .iter()
            .find(|b| b.subject == subject && b.predicate == predicate)
    }

    // ── Counters & stats ─────────────────────────────────────────────────────

    pub fn rejected_writes(&self) -> u64 {
        self.rejected_writes
    }

    pub fn stats(&self) -> MemoryStats {
        MemoryStats {
            canonical: self.canonical.len(),
            world_state: self.world_state.len(),
            episodic: self.episodic.len(),
            beliefs: self.beliefs.len(),
            rejected_writes: self.rejected_writes,
        }
    }

    pub(crate) fn next_sequence_numbers(&self) -> (u64, u64) {
        (self.next_episodic_seq, self.next_belief_seq)
    }

    pub(crate) fn restore_parts(
        npc_id: String,
        canonical: BTreeMap<String, CanonicalFact>,
        world_state: BTreeMap<String, WorldStateEntry>,
        episodic: Vec<EpisodicMemory>,
        beliefs: Vec<Belief>,
        rejected_writes: u64,
    ) -> Self {
        let next_episodic_seq = episodic
            .iter()
            .map(|e| e.sequence_number + 1)
            .max()
            .unwrap_or(0);
        let next_belief_seq = beliefs
            .iter()
            .map(|b| b.sequence_number + 1)
            .max()
            .unwrap_or(0);
        Self {
            npc_id,
            canonical,
            world_state,
            episodic,
            beliefs,
            next_episodic_seq,
            next_belief_seq,
            rejected_writes,
        }
    }

    fn require_rank(
        &mut self,
        source: AuthoritySource,
        required: AuthoritySource,
        operation: &'static str,
    ) -> Result<(), MemoryError> {
        if source.rank() < required.rank() {
            self.rejected_writes += 1;
            tracing::warn!(npc_id = %self.npc_id, operation, source_rank = source.rank(),
                "rejected write from low-authority source");
            return Err(MemoryError::InsufficientAuthority {
                operation,
                required: required.rank(),
                actual: source.rank(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::EpisodeType;

    fn episodic_draft(id: &str) -> EpisodicDraft {
        EpisodicDraft {
            id: id.to_string(),
            content: format!("event {id}"),
            episode_type: EpisodeType::Observation,
            significance: 0.5,
        }
    }

    // ── Canonical immutability ──────────────────────────────────────────────

    #[test]
    fn canonical_insert_then_reinsert_fails_and_counts() {
        let mut memory = PersonaMemory::new("npc-1");
        memory
            .insert_canonical("king_name", "The king is named Arthur", vec![], AuthoritySource::Designer)
            .unwrap();

        let err = memory
            .insert_canonical("king_name", "The king is named Bob", vec![], AuthoritySource::Designer)
            .unwrap_err();
        assert_eq!(err, MemoryError::CanonicalImmutable { id: "king_name".to_string() });
        assert_eq!(memory.rejected_writes(), 1);
        assert_eq!(
            memory.canonical_fact("king_name").unwrap().content,
            "The king is named Arthur"
        );
    }

    #[test]
    fn canonical_insert_requires_designer() {
        let mut memory = PersonaMemory::new("npc-1");
        for source in [
            AuthoritySource::LlmSuggestion,
            AuthoritySource::ValidatedOutput,
            AuthoritySource::GameSystem,
        ] {
            assert!(memory.insert_canonical("f", "x", vec![], source).is_err());
        }
        assert_eq!(memory.rejected_writes(), 3);
    }

    // ── World-state authority ───────────────────────────────────────────────

    #[test]
    fn world_state_rejects_validated_output() {
        let mut memory = PersonaMemory::new("npc-1");
        let err = memory
            .set_world_state("gate", "open", AuthoritySource::ValidatedOutput, 100)
            .unwrap_err();
        assert!(matches!(err, MemoryError::InsufficientAuthority { .. }));

        memory
            .set_world_state("gate", "open", AuthoritySource::GameSystem, 100)
            .unwrap();
        assert_eq!(memory.world_state_value("gate"), Some("open"));
        assert_eq!(memory.world_state().next().unwrap().updated_at_ticks, 100);
    }

    // ── Sequence numbers ────────────────────────────────────────────────────

    #[test]
    fn episodic_sequence_numbers_are_monotonic() {
        let mut memory = PersonaMemory::new("npc-1");
        let a = memory
            .insert_episodic(episodic_draft("a"), AuthoritySource::GameSystem, 1)
            .unwrap();
        let b = memory
            .insert_episodic(episodic_draft("b"), AuthoritySource::ValidatedOutput, 2)
            .unwrap();
        assert_eq!((a, b), (0, 1));
    }

    #[test]
    fn episodic_rejects_llm_suggestion() {
        let mut memory = PersonaMemory::new("npc-1");
        assert!(
            memory
                .insert_episodic(episodic_draft("a"), AuthoritySource::LlmSuggestion, 1)
                .is_err()
        );
        assert_eq!(memory.rejected_writes(), 1);
    }

    #[test]
    fn belief_replace_discards_old_and_bumps_sequence() {
        let mut memory = PersonaMemory::new("npc-1");
        let first = BeliefDraft {
            id: "b1".to_string(),
            subject: "player".to_string(),
            predicate: "trustworthy".to_string(),
            confidence: 0.4,
            sentiment: 0.1,
        };
        memory
            .upsert_belief(first, AuthoritySource::ValidatedOutput, 10)
            .unwrap();

        let second = BeliefDraft {
            id: "b2".to_string(),
            subject: "player".to_string(),
            predicate: "trustworthy".to_string(),
            confidence: 0.9,
            sentiment: 0.5,
        };
        let seq = memory
            .upsert_belief(second, AuthoritySource::ValidatedOutput, 20)
            .unwrap();

        assert_eq!(seq, 1);
        assert_eq!(memory.beliefs().len(), 1);
        assert_eq!(memory.belief("player", "trustworthy").unwrap().confidence, 0.9);
    }

    #[test]
    fn belief_value_ranges_enforced() {
        let mut memory = PersonaMemory::new("npc-1");
        let draft = BeliefDraft {
            id: "b1".to_string(),
            subject: "player".to_string(),
            predicate: "liar".to_string(),
            confidence: 1.5,
            sentiment: 0.0,
        };
        assert!(matches!(
            memory.upsert_belief(draft, AuthoritySource::ValidatedOutput, 1),
            Err(MemoryError::ValueOutOfRange { field: "confidence", .. })
        ));
    }

    // ── Relationships ───────────────────────────────────────────────────────

    #[test]
    fn relationship_adjustment_accumulates_and_clamps() {
        let mut memory = PersonaMemory::new("npc-1");
        memory
            .adjust_relationship("player", 0.7, 0.8, AuthoritySource::ValidatedOutput, 1)
            .unwrap();
        memory
            .adjust_relationship("player", 0.7, 0.8, AuthoritySource::ValidatedOutput, 2)
            .unwrap();

        let belief = memory.belief("player", RELATIONSHIP_PREDICATE).unwrap();
        assert_eq!(belief.sentiment, 1.0);
        assert_eq!(memory.beliefs().len(), 1);
    }

    // ── Decay ───────────────────────────────────────────────────────────────

    #[test]
    fn decay_halves_at_half_life_and_prunes() {
        let mut memory = PersonaMemory::new("npc-1");
        memory
            .insert_episodic(episodic_draft("old"), AuthoritySource::GameSystem, 0)
            .unwrap();
        memory
            .insert_episodic(episodic_draft("new"), AuthoritySource::GameSystem, 1000)
            .unwrap();

        let report = memory.decay(1000, 1000, 0.0);
        assert_eq!(report.rescored, 2);
        assert_eq!(report.pruned, 0);
        let old = memory.episodic().iter().find(|e| e.id == "old").unwrap();
        assert!((old.decay_score - 0.5).abs() < 1e-12);

        // Prune anything below 0.9: only the fresh entry survives.
        let report = memory.decay(1000, 1000, 0.9);
        assert_eq!(report.pruned, 1);
        assert_eq!(memory.episodic().len(), 1);
        assert_eq!(memory.episodic()[0].id, "new");
    }

    #[test]
    fn decay_is_idempotent_at_fixed_time() {
        let mut memory = PersonaMemory::new("npc-1");
        memory
            .insert_episodic(episodic_draft("a"), AuthoritySource::GameSystem, 0)
            .unwrap();
        memory.decay(500, 1000, 0.0);
        let first = memory.episodic()[0].decay_score;
        memory.decay(500, 1000, 0.0);
        assert_eq!(memory.episodic()[0].decay_score, first);
    }
}
