//! Author-authored fallback dialogue.
//!
//! Fallback lines are keyed by trigger reason, with an emergency list that is
//! always present. Selection rotates (`counter % len`) so tests can predict
//! the returned string; fallback never touches memory.

use std::collections::BTreeMap;

use loreguard_rules::TriggerReason;

const DEFAULT_EMERGENCY: &[&str] = &[
    "Hm. Give me a moment.",
    "I've lost my train of thought.",
    "We'll speak of this later.",
];

#[derive(Debug, Clone)]
pub struct FallbackLibrary {
    by_reason: BTreeMap<TriggerReason, Vec<String>>,
    emergency: Vec<String>,
    counter: u64,
}

impl Default for FallbackLibrary {
    fn default() -> Self {
        Self {
            by_reason: BTreeMap::new(),
            emergency: DEFAULT_EMERGENCY.iter().map(|s| (*s).to_string()).collect(),
            counter: 0,
        }
    }
}

impl FallbackLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_list(&mut self, reason: TriggerReason, lines: Vec<String>) {
        self.by_reason.insert(reason, lines);
    }

    /// Replace the emergency list. Empty input is ignored; the library must
    /// always be able to produce a line.
    pub fn set_emergency(&mut self, lines: Vec<String>) {
        if !lines.is_empty() {
            self.emergency = lines;
        }
    }

    pub fn counter(&self) -> u64 {
        self.counter
    }

    /// Deterministic rotating pick: the reason's list when present and
    /// non-empty, the emergency list otherwise.
    pub fn pick(&mut self, reason: TriggerReason) -> String {
        let list = match self.by_reason.get(&reason) {
            Some(lines) if !lines.is_empty() => lines,
            _ => &self.emergency,
        };
        let index = (self.counter % list.len() as u64) as usize;
        self.counter += 1;
        list[index].clone()
    }
}
