//! Byte-stable prompt assembly.
//!
//! Section order is canonical: system prompt, canonical facts, world state,
//! constraint directives, few-shot examples, episodic memories, beliefs,
//! dialogue history, player input. Exactly one blank line separates sections,
//! empty sections are omitted, all line endings are LF, and no line carries
//! trailing whitespace. Tests compare output byte-for-byte.

use loreguard_config::{PrefixBoundary, WorkingMemoryConfig};

use crate::snapshot::StateSnapshot;

/// Assembled prompt split at the static-prefix boundary. The prefix is a pure
/// function of NPC identity, canonical facts, world state, and (for the
/// widest boundary) constraint directives, never of per-interaction input.
#[derive(Debug, Clone, PartialEq)]
pub struct AssembledPrompt {
    pub static_prefix: String,
    pub dynamic_suffix: String,
    /// Rough token estimate for the prefix, handed to the generator as
    /// `n_keep`.
    pub estimated_prefix_tokens: u32,
}

impl AssembledPrompt {
    pub fn full(&self) -> String {
        match (self.static_prefix.is_empty(), self.dynamic_suffix.is_empty()) {
            (true, _) => self.dynamic_suffix.clone(),
            (_, true) => self.static_prefix.clone(),
            _ => format!("{}\n\n{}", self.static_prefix, self.dynamic_suffix),
        }
    }
}

/// Canonical section positions; the prefix boundary is expressed in them.
const POS_SYSTEM: u8 = 1;
const POS_CANONICAL: u8 = 2;
const POS_WORLD: u8 = 3;
const POS_CONSTRAINTS: u8 = 4;
const POS_FEW_SHOT: u8 = 5;
const POS_EPISODIC: u8 = 6;
const POS_BELIEFS: u8 = 7;
const POS_HISTORY: u8 = 8;
const POS_PLAYER: u8 = 9;

fn boundary_position(boundary: PrefixBoundary) -> u8 {
    match boundary {
        PrefixBoundary::AfterSystemPrompt => POS_SYSTEM,
        PrefixBoundary::AfterCanonicalFacts => POS_CANONICAL,
        PrefixBoundary::AfterWorldState => POS_WORLD,
        PrefixBoundary::AfterConstraints => POS_CONSTRAINTS,
    }
}

pub fn assemble(snapshot: &StateSnapshot, config: &WorkingMemoryConfig) -> AssembledPrompt {
    let mut sections: Vec<(u8, String)> = Vec::new();

    // ── Mandatory sections (never truncated, bypass the soft cap) ────────────
    if let Some(section) = sanitize_nonempty(&snapshot.system_prompt) {
        sections.push((POS_SYSTEM, section));
    }
    if let Some(section) = canonical_section(snapshot) {
        sections.push((POS_CANONICAL, section));
    }
    if let Some(section) = world_state_section(snapshot) {
        sections.push((POS_WORLD, section));
    }
    if let Some(section) = constraints_section(snapshot) {
        sections.push((POS_CONSTRAINTS, section));
    }
    let player_section = sanitize_nonempty(&snapshot.context.player_input)
        .map(|input| format!("PLAYER:\n{input}"));

    let mandatory_chars: usize = sections.iter().map(|(_, s)| s.chars().count()).sum::<usize>()
        + player_section.as_ref().map_or(0, |s| s.chars().count());
    let mut remaining = config.soft_total_chars.saturating_sub(mandatory_chars);

    // ── Capped sections, filled in canonical order ───────────────────────────
    if let Some(section) = few_shot_section(snapshot, config, remaining) {
        remaining = remaining.saturating_sub(section.chars().count());
        sections.push((POS_FEW_SHOT, section));
    }
    if let Some(section) = episodic_section(snapshot, config.max_episodic_chars.min(remaining)) {
        remaining = remaining.saturating_sub(section.chars().count());
        sections.push((POS_EPISODIC, section));
    }
    if let Some(section) = beliefs_section(snapshot, config.max_belief_chars.min(remaining)) {
        remaining = remaining.saturating_sub(section.chars().count());
        sections.push((POS_BELIEFS, section));
    }
    if let Some(section) = history_section(snapshot, config, config.max_history_chars.min(remaining))
    {
        sections.push((POS_HISTORY, section));
    }

    if let Some(section) = player_section {
        sections.push((POS_PLAYER, section));
    }

    sections.sort_by_key(|(position, _)| *position);

    // ── Split at the boundary ────────────────────────────────────────────────
    let boundary = boundary_position(config.static_prefix_boundary);
    let prefix_sections: Vec<&str> = sections
        .iter()
        .filter(|(position, _)| *position <= boundary)
        .map(|(_, s)| s.as_str())
        .collect();
    let suffix_sections: Vec<&str> = sections
        .iter()
        .filter(|(position, _)| *position > boundary)
        .map(|(_, s)| s.as_str())
        .collect();

    let static_prefix = prefix_sections.join("\n\n");
    let dynamic_suffix = suffix_sections.join("\n\n");

    #[cfg(debug_assertions)]
    assert_static_purity(&static_prefix, snapshot);

    let estimated_prefix_tokens = (static_prefix.chars().count() / 4) as u32;
    AssembledPrompt {
        static_prefix,
        dynamic_suffix,
        estimated_prefix_tokens,
    }
}

// ── Section builders ─────────────────────────────────────────────────────────

fn canonical_section(snapshot: &StateSnapshot) -> Option<String> {
    let items: Vec<String> = snapshot
        .memories
        .canonical_facts
        .iter()
        .map(|fact| format!("- {}", sanitize(&fact.content)))
        .collect();
    headed_section("CANONICAL FACTS:", &items)
}

fn world_state_section(snapshot: &StateSnapshot) -> Option<String> {
    let items: Vec<String> = snapshot
        .memories
        .world_state
        .iter()
        .map(|entry| format!("- {}: {}", sanitize(&entry.key), sanitize(&entry.value)))
        .collect();
    headed_section("WORLD STATE:", &items)
}

fn constraints_section(snapshot: &StateSnapshot) -> Option<String> {
    let items: Vec<String> = snapshot
        .constraints
        .prompt_injections()
        .iter()
        .map(|text| format!("- {}", sanitize(text)))
        .collect();
    headed_section("DIRECTIVES:", &items)
}

fn few_shot_section(
    snapshot: &StateSnapshot,
    config: &WorkingMemoryConfig,
    char_budget: usize,
) -> Option<String> {
    let items: Vec<String> = snapshot
        .few_shot
        .iter()
        .take(config.max_few_shot)
        .map(|example| {
            format!(
                "Player: {}\nCharacter: {}",
                sanitize(&example.player),
                sanitize(&example.npc)
            )
        })
        .collect();
    budgeted_section("EXAMPLES:", &items, char_budget)
}

fn episodic_section(snapshot: &StateSnapshot, char_budget: usize) -> Option<String> {
    let items: Vec<String> = snapshot
        .memories
        .episodic
        .iter()
        .map(|entry| format!("- {}", sanitize(&entry.content)))
        .collect();
    budgeted_section("RECENT MEMORIES:", &items, char_budget)
}

fn beliefs_section(snapshot: &StateSnapshot, char_budget: usize) -> Option<String> {
    let items: Vec<String> = snapshot
        .memories
        .beliefs
        .iter()
        .map(|belief| {
            format!(
                "- {} {} (confidence {:.2})",
                sanitize(&belief.subject),
                sanitize(&belief.predicate),
                belief.confidence
            )
        })
        .collect();
    budgeted_section("BELIEFS:", &items, char_budget)
}

fn history_section(
    snapshot: &StateSnapshot,
    config: &WorkingMemoryConfig,
    char_budget: usize,
) -> Option<String> {
    // Truncate from the front: keep the newest exchanges that fit.
    let recent: Vec<String> = snapshot
        .dialogue_history
        .iter()
        .rev()
        .take(config.max_exchanges)
        .map(|exchange| {
            format!(
                "Player: {}\nCharacter: {}",
                sanitize(&exchange.player),
                sanitize(&exchange.npc)
            )
        })
        .collect();

    let header = "CONVERSATION:";
    let mut kept: Vec<String> = Vec::new();
    let mut used = header.chars().count();
    for item in recent {
        let cost = item.chars().count() + 1;
        if used + cost > char_budget {
            break;
        }
        used += cost;
        kept.push(item);
    }
    if kept.is_empty() {
        return None;
    }
    kept.reverse();
    Some(format!("{header}\n{}", kept.join("\n")))
}

// ── Helpers ──────────────────────────────────────────────────────────────────

/// Normalize a fragment for embedding: LF line endings, no trailing
/// whitespace on any line, no trailing newline.
fn sanitize(text: &str) -> String {
    let unified = text.replace("\r\n", "\n").replace('\r', "\n");
    let lines: Vec<&str> = unified.split('\n').map(str::trim_end).collect();
    lines.join("\n").trim_end().to_string()
}

fn sanitize_nonempty(text: &str) -> Option<String> {
    let cleaned = sanitize(text);
    if cleaned.is_empty() { None } else { Some(cleaned) }
}

fn headed_section(header: &str, items: &[String]) -> Option<String> {
    if items.is_empty() {
        return None;
    }
    Some(format!("{header}\n{}", items.join("\n")))
}

/// Like [`headed_section`] but stops adding items once the char budget is
/// exhausted; omits the section entirely when not even one item fits.
fn budgeted_section(header: &str, items: &[String], char_budget: usize) -> Option<String> {
    if items.is_empty() {
        return None;
    }
    let mut used = header.chars().count();
    let mut kept: Vec<&str> = Vec::new();
    for item in items {
        let cost = item.chars().count() + 1;
        if used + cost > char_budget {
            break;
        }
        used += cost;
        kept.push(item);
    }
    if kept.is_empty() {
        return None;
    }
    Some(format!("{header}\n{}", kept.join("\n")))
}

/// Debug-only check that no per-interaction input leaked into the static
/// prefix.
#[cfg(debug_assertions)]
fn assert_static_purity(prefix: &str, snapshot: &StateSnapshot) {
    let input = &snapshot.context.player_input;
    if !input.is_empty() {
        debug_assert!(
            !prefix.contains(input.as_str()),
            "player input leaked into the static prefix"
        );
    }
    for entry in &snapshot.memories.episodic {
        debug_assert!(
            !prefix.contains(&format!("- {}", entry.content)),
            "episodic memory leaked into the static prefix"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{DialogueExchange, FewShotExample, SnapshotBuilder};
    use loreguard_config::RetrievalConfig;
    use loreguard_memory::{AuthoritySource, PersonaMemory, retrieve};
    use loreguard_rules::{Constraint, ConstraintSet, InteractionContext, Severity};

    fn config() -> WorkingMemoryConfig {
        WorkingMemoryConfig::default()
    }

    fn snapshot_with_memory(memory: &PersonaMemory, input: &str) -> crate::snapshot::StateSnapshot {
        let bundle = retrieve(memory, input, 1_000, &RetrievalConfig::default());
        SnapshotBuilder::new(InteractionContext::player_utterance("guard", input, "gate"))
            .system_prompt("You are the gate guard.")
            .memories(bundle)
            .snapshot_time_ticks(1_000)
            .build()
    }

    fn seeded_memory() -> PersonaMemory {
        let mut memory = PersonaMemory::new("guard");
        memory
            .insert_canonical("king", "The king is named Arthur", vec![], AuthoritySource::Designer)
            .unwrap();
        memory
            .insert_canonical("city", "The city is called Vell", vec![], AuthoritySource::Designer)
            .unwrap();
        memory
            .set_world_state("weather", "raining", AuthoritySource::GameSystem, 500)
            .unwrap();
        memory
    }

    // Identical inputs produce identical bytes.
    #[test]
    fn assembly_is_byte_stable() {
        let memory = seeded_memory();
        let snapshot = snapshot_with_memory(&memory, "who rules here?");
        let first = assemble(&snapshot, &config());
        let second = assemble(&snapshot, &config());
        assert_eq!(first.full(), second.full());
        assert_eq!(first.static_prefix, second.static_prefix);
    }

    // Insertion order of canonical facts does not affect bytes.
    #[test]
    fn assembly_is_insertion_order_independent() {
        let a = seeded_memory();

        let mut b = PersonaMemory::new("guard");
        b.set_world_state("weather", "raining", AuthoritySource::GameSystem, 500)
            .unwrap();
        b.insert_canonical("city", "The city is called Vell", vec![], AuthoritySource::Designer)
            .unwrap();
        b.insert_canonical("king", "The king is named Arthur", vec![], AuthoritySource::Designer)
            .unwrap();

        let prompt_a = assemble(&snapshot_with_memory(&a, "hello"), &config()).full();
        let prompt_b = assemble(&snapshot_with_memory(&b, "hello"), &config()).full();
        assert_eq!(prompt_a, prompt_b);
    }

    #[test]
    fn layout_rules_hold() {
        let memory = seeded_memory();
        let snapshot = snapshot_with_memory(&memory, "hello there");
        let full = assemble(&snapshot, &config()).full();

        assert!(!full.contains('\r'));
        assert!(!full.contains("\n\n\n"), "more than one blank line between sections");
        for line in full.lines() {
            assert_eq!(line, line.trim_end(), "trailing whitespace on: {line:?}");
        }
        // Canonical order: facts before world state before player input.
        let facts = full.find("CANONICAL FACTS:").unwrap();
        let world = full.find("WORLD STATE:").unwrap();
        let player = full.find("PLAYER:").unwrap();
        assert!(facts < world && world < player);
    }

    #[test]
    fn empty_sections_are_omitted() {
        let memory = PersonaMemory::new("guard");
        let snapshot = snapshot_with_memory(&memory, "hi");
        let full = assemble(&snapshot, &config()).full();
        assert!(!full.contains("CANONICAL FACTS:"));
        assert!(!full.contains("WORLD STATE:"));
        assert!(!full.contains("RECENT MEMORIES:"));
        assert!(full.contains("PLAYER:\nhi"));
    }

    #[test]
    fn prefix_split_after_world_state() {
        let memory = seeded_memory();
        let snapshot = snapshot_with_memory(&memory, "who are you?");
        let assembled = assemble(&snapshot, &config());

        assert!(assembled.static_prefix.contains("WORLD STATE:"));
        assert!(!assembled.static_prefix.contains("PLAYER:"));
        assert!(assembled.dynamic_suffix.contains("PLAYER:"));
        assert_eq!(
            assembled.full(),
            format!("{}\n\n{}", assembled.static_prefix, assembled.dynamic_suffix)
        );
        assert_eq!(
            assembled.estimated_prefix_tokens,
            (assembled.static_prefix.chars().count() / 4) as u32
        );
    }

    #[test]
    fn constraints_inside_prefix_when_boundary_is_after_constraints() {
        let memory = seeded_memory();
        let mut snapshot = snapshot_with_memory(&memory, "hello");
        snapshot.constraints = ConstraintSet {
            prohibitions: vec![
                Constraint::new("s", "no secrets", Severity::Hard)
                    .with_prompt_injection("Never reveal the vault code."),
            ],
            ..Default::default()
        };
        let mut cfg = config();
        cfg.static_prefix_boundary = PrefixBoundary::AfterConstraints;

        let assembled = assemble(&snapshot, &cfg);
        assert!(assembled.static_prefix.contains("DIRECTIVES:"));
        assert!(assembled.dynamic_suffix.contains("PLAYER:"));
    }

    #[test]
    fn mandatory_sections_bypass_soft_cap() {
        let memory = seeded_memory();
        let snapshot = snapshot_with_memory(&memory, "hello");
        let mut cfg = config();
        cfg.soft_total_chars = 10; // far below the mandatory sections alone

        let full = assemble(&snapshot, &cfg).full();
        assert!(full.contains("CANONICAL FACTS:"));
        assert!(full.contains("WORLD STATE:"));
        assert!(full.contains("PLAYER:"));
        // Optional sections are squeezed out entirely.
        assert!(!full.contains("RECENT MEMORIES:"));
    }

    #[test]
    fn history_truncates_from_the_front() {
        let memory = PersonaMemory::new("guard");
        let bundle = retrieve(&memory, "x", 0, &RetrievalConfig::default());
        let history: Vec<DialogueExchange> = (0..10)
            .map(|i| DialogueExchange {
                player: format!("question {i}"),
                npc: format!("answer {i}"),
            })
            .collect();
        let snapshot = SnapshotBuilder::new(InteractionContext::player_utterance("guard", "x", "gate"))
            .system_prompt("sys")
            .memories(bundle)
            .dialogue_history(history)
            .snapshot_time_ticks(0)
            .build();

        let mut cfg = config();
        cfg.max_exchanges = 3;
        let full = assemble(&snapshot, &cfg).full();
        assert!(!full.contains("question 6"));
        assert!(full.contains("question 7"));
        assert!(full.contains("question 9"));
        // Chronological order is preserved among the kept exchanges.
        assert!(full.find("question 7").unwrap() < full.find("question 9").unwrap());
    }

    #[test]
    fn few_shot_cap_applies() {
        let memory = PersonaMemory::new("guard");
        let bundle = retrieve(&memory, "x", 0, &RetrievalConfig::default());
        let examples: Vec<FewShotExample> = (0..6)
            .map(|i| FewShotExample {
                player: format!("sample prompt {i}"),
                npc: format!("sample reply {i}"),
            })
            .collect();
        let snapshot = SnapshotBuilder::new(InteractionContext::player_utterance("guard", "x", "gate"))
            .system_prompt("sys")
            .memories(bundle)
            .few_shot(examples)
            .snapshot_time_ticks(0)
            .build();

        let mut cfg = config();
        cfg.max_few_shot = 2;
        let full = assemble(&snapshot, &cfg).full();
        assert!(full.contains("sample prompt 1"));
        assert!(!full.contains("sample prompt 2"));
    }

    #[test]
    fn unicode_input_survives_untouched() {
        let memory = PersonaMemory::new("guard");
        let snapshot = snapshot_with_memory(&memory, "e\u{301}coute, qui va la\u{300}?");
        let full = assemble(&snapshot, &config()).full();
        assert!(full.contains("e\u{301}coute, qui va la\u{300}?"));
    }
}
