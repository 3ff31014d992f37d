//! Deterministic, clock-free retrieval over a persona's memory.
//!
//! All scoring uses the snapshot time handed in by the caller. Scores are
//! quantized to fixed-point integers before any comparison, and every sort is
//! a chained comparator that terminates in the sequence number, so the result
//! order is a strict total order over the produced entries.

use serde::{Deserialize, Serialize};

use loreguard_config::RetrievalConfig;

use crate::schema::{Belief, CanonicalFact, EpisodicMemory, WorldStateEntry};
use crate::store::PersonaMemory;
use crate::ticks::Ticks;

/// Fixed-point quantization factor: six decimal places.
const SCORE_SCALE: f64 = 1_000_000.0;

/// Quantize a unit-interval score to a comparable integer. Raw doubles are
/// never compared directly in any ordering.
pub fn quantize(score: f64) -> i64 {
    (score * SCORE_SCALE).round() as i64
}

/// Ordinal keyword overlap between a query and a content string, in `[0, 1]`.
/// Both sides are lowercased (plain codepoint lowercasing, no locale).
pub fn keyword_overlap(query: &str, content: &str) -> f64 {
    let query_tokens: Vec<String> = tokenize(query);
    if query_tokens.is_empty() {
        return 0.0;
    }
    let content_tokens: Vec<String> = tokenize(content);

    let hits = query_tokens
        .iter()
        .filter(|token| content_tokens.contains(token))
        .count();
    hits as f64 / query_tokens.len() as f64
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect()
}

/// Half-life recency factor in `[0, 1]`.
fn recency(snapshot_time_ticks: Ticks, created_at_ticks: Ticks, half_life_ticks: Ticks) -> f64 {
    if half_life_ticks <= 0 {
        return 1.0;
    }
    let elapsed = (snapshot_time_ticks - created_at_ticks).max(0);
    0.5_f64.powf(elapsed as f64 / half_life_ticks as f64)
}

/// The deterministically ordered memory view captured into a snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryBundle {
    pub canonical_facts: Vec<CanonicalFact>,
    pub world_state: Vec<WorldStateEntry>,
    pub episodic: Vec<EpisodicMemory>,
    pub beliefs: Vec<Belief>,
}

/// Select and order the memories relevant to one interaction.
///
/// The caller holds the read lock just long enough to invoke this; everything
/// here operates on owned copies so no lock outlives the scoring pass.
pub fn retrieve(
    memory: &PersonaMemory,
    player_input: &str,
    snapshot_time_ticks: Ticks,
    config: &RetrievalConfig,
) -> MemoryBundle {
    let canonical_facts: Vec<CanonicalFact> = memory.canonical_facts().cloned().collect();
    let world_state: Vec<WorldStateEntry> = memory.world_state().cloned().collect();

    let episodic = select_episodic(memory.episodic(), player_input, snapshot_time_ticks, config);
    let beliefs = select_beliefs(memory.beliefs(), player_input, snapshot_time_ticks, config);

    MemoryBundle {
        canonical_facts,
        world_state,
        episodic,
        beliefs,
    }
}

fn episodic_score(
    entry: &EpisodicMemory,
    player_input: &str,
    snapshot_time_ticks: Ticks,
    config: &RetrievalConfig,
) -> i64 {
    let r = recency(snapshot_time_ticks, entry.created_at_ticks, config.half_life_ticks);
    let rel = keyword_overlap(player_input, &entry.content);
    let score = config.recency_weight * r
        + config.relevance_weight * rel
        + config.significance_weight * entry.significance;
    quantize(score)
}

fn select_episodic(
    entries: &[EpisodicMemory],
    player_input: &str,
    snapshot_time_ticks: Ticks,
    config: &RetrievalConfig,
) -> Vec<EpisodicMemory> {
    let mut scored: Vec<(i64, EpisodicMemory)> = entries
        .iter()
        .filter(|entry| !entry.contradicted)
        .map(|entry| {
            (
                episodic_score(entry, player_input, snapshot_time_ticks, config),
                entry.clone(),
            )
        })
        .collect();

    // score desc, created desc, id asc, sequence asc.
    scored.sort_by(|(score_a, a), (score_b, b)| {
        score_b
            .cmp(score_a)
            .then(b.created_at_ticks.cmp(&a.created_at_ticks))
            .then(a.id.cmp(&b.id))
            .then(a.sequence_number.cmp(&b.sequence_number))
    });

    scored.truncate(config.max_episodic);
    scored.into_iter().map(|(_, entry)| entry).collect()
}

fn belief_score(
    belief: &Belief,
    player_input: &str,
    snapshot_time_ticks: Ticks,
    config: &RetrievalConfig,
) -> i64 {
    let r = recency(snapshot_time_ticks, belief.created_at_ticks, config.half_life_ticks);
    let rel = keyword_overlap(
        player_input,
        &format!("{} {}", belief.subject, belief.predicate),
    );
    let score = config.recency_weight * r
        + config.relevance_weight * rel
        + config.significance_weight * belief.confidence;
    quantize(score)
}

fn select_beliefs(
    beliefs: &[Belief],
    player_input: &str,
    snapshot_time_ticks: Ticks,
    config: &RetrievalConfig,
) -> Vec<Belief> {
    let mut scored: Vec<(i64, Belief)> = beliefs
        .iter()
        .filter(|b| !b.contradicted && b.confidence >= config.belief_confidence_floor)
        .map(|b| {
            (
                belief_score(b, player_input, snapshot_time_ticks, config),
                b.clone(),
            )
        })
        .collect();

    // score desc, confidence desc (quantized), id asc, sequence asc.
    scored.sort_by(|(score_a, a), (score_b, b)| {
        score_b
            .cmp(score_a)
            .then(quantize(b.confidence).cmp(&quantize(a.confidence)))
            .then(a.id.cmp(&b.id))
            .then(a.sequence_number.cmp(&b.sequence_number))
    });

    scored.truncate(config.max_beliefs);
    scored.into_iter().map(|(_, b)| b).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{AuthoritySource, BeliefDraft, EpisodeType, EpisodicDraft};

    fn config() -> RetrievalConfig {
        RetrievalConfig::default()
    }

    fn memory_with_episodes(specs: &[(&str, &str, f64, Ticks)]) -> PersonaMemory {
        let mut memory = PersonaMemory::new("npc");
        for (id, content, significance, ticks) in specs {
            memory
                .insert_episodic(
                    EpisodicDraft {
                        id: id.to_string(),
                        content: content.to_string(),
                        episode_type: EpisodeType::Observation,
                        significance: *significance,
                    },
                    AuthoritySource::GameSystem,
                    *ticks,
                )
                .unwrap();
        }
        memory
    }

    #[test]
    fn quantize_six_decimals() {
        assert_eq!(quantize(0.5), 500_000);
        assert_eq!(quantize(0.1234564), 123_456);
        assert_eq!(quantize(0.1234566), 123_457);
    }

    #[test]
    fn keyword_overlap_basic() {
        assert_eq!(keyword_overlap("the dragon", "I saw the DRAGON yesterday"), 1.0);
        assert_eq!(keyword_overlap("dragon gold", "the dragon sleeps"), 0.5);
        assert_eq!(keyword_overlap("", "anything"), 0.0);
    }

    #[test]
    fn relevance_pulls_matching_episode_first() {
        let memory = memory_with_episodes(&[
            ("a", "talked about the weather", 0.5, 100),
            ("b", "the dragon attacked the village", 0.5, 100),
        ]);
        let bundle = retrieve(&memory, "dragon?", 200, &config());
        assert_eq!(bundle.episodic[0].id, "b");
    }

    // Identical content, significance, and ticks: the sequence number breaks the tie.
    #[test]
    fn identical_scores_tie_break_by_sequence() {
        let memory = memory_with_episodes(&[
            ("twin", "the same event", 0.5, 100),
            ("twin", "the same event", 0.5, 100),
        ]);
        let mut cfg = config();
        cfg.max_episodic = 1;

        for _ in 0..1000 {
            let bundle = retrieve(&memory, "event", 200, &cfg);
            assert_eq!(bundle.episodic.len(), 1);
            assert_eq!(bundle.episodic[0].sequence_number, 0);
        }
    }

    #[test]
    fn near_equal_scores_still_order_by_tiebreak() {
        // Significance differing at 1e-12 quantizes to the same score; the
        // chained comparator must fall through to the sequence number.
        let memory = memory_with_episodes(&[
            ("x", "same text", 0.500000000001, 100),
            ("x", "same text", 0.5, 100),
        ]);
        let bundle = retrieve(&memory, "", 100, &config());
        assert_eq!(bundle.episodic[0].sequence_number, 0);
        assert_eq!(bundle.episodic[1].sequence_number, 1);
    }

    #[test]
    fn retrieval_is_independent_of_invocation_order() {
        let memory = memory_with_episodes(&[
            ("a", "first thing", 0.3, 100),
            ("b", "second thing", 0.9, 50),
            ("c", "third thing", 0.6, 150),
        ]);
        let first = retrieve(&memory, "thing", 500, &config());
        let second = retrieve(&memory, "thing", 500, &config());
        assert_eq!(first, second);
    }

    #[test]
    fn belief_confidence_floor_is_inclusive() {
        let mut memory = PersonaMemory::new("npc");
        let mut cfg = config();
        cfg.belief_confidence_floor = 0.2;

        for (id, confidence) in [("at-floor", 0.2), ("below", 0.2 - 1e-9)] {
            memory
                .upsert_belief(
                    BeliefDraft {
                        id: id.to_string(),
                        subject: id.to_string(),
                        predicate: "p".to_string(),
                        confidence,
                        sentiment: 0.0,
                    },
                    AuthoritySource::ValidatedOutput,
                    10,
                )
                .unwrap();
        }

        let bundle = retrieve(&memory, "", 10, &cfg);
        assert_eq!(bundle.beliefs.len(), 1);
        assert_eq!(bundle.beliefs[0].id, "at-floor");
    }

    #[test]
    fn truncation_applies_after_sort() {
        let memory = memory_with_episodes(&[
            ("low", "filler", 0.1, 0),
            ("high", "filler", 0.9, 0),
            ("mid", "filler", 0.5, 0),
        ]);
        let mut cfg = config();
        cfg.max_episodic = 2;
        let bundle = retrieve(&memory, "", 0, &cfg);
        let ids: Vec<&str> = bundle.episodic.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["high", "mid"]);
    }

    #[test]
    fn canonical_and_world_state_come_out_key_ordered() {
        let mut memory = PersonaMemory::new("npc");
        memory
            .insert_canonical("zeta", "z", vec![], AuthoritySource::Designer)
            .unwrap();
        memory
            .insert_canonical("alpha", "a", vec![], AuthoritySource::Designer)
            .unwrap();
        memory
            .set_world_state("weather", "rain", AuthoritySource::GameSystem, 5)
            .unwrap();
        memory
            .set_world_state("gate", "closed", AuthoritySource::GameSystem, 5)
            .unwrap();

        let bundle = retrieve(&memory, "", 10, &config());
        let fact_ids: Vec<&str> = bundle.canonical_facts.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(fact_ids, vec!["alpha", "zeta"]);
        let keys: Vec<&str> = bundle.world_state.iter().map(|w| w.key.as_str()).collect();
        assert_eq!(keys, vec!["gate", "weather"]);
    }

    #[test]
    fn contradicted_entries_are_not_retrieved() {
        let mut memory = memory_with_episodes(&[("a", "a thing", 0.5, 0)]);
        memory.mark_episodic_contradicted("a");
        let bundle = retrieve(&memory, "", 0, &config());
        assert!(bundle.episodic.is_empty());
    }
}
