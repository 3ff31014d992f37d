//! Per-interaction audit records and the bounded per-NPC recorder.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use loreguard_memory::Ticks;
use loreguard_rules::TriggerReason;

/// Everything needed to inspect one interaction offline and to re-drive it
/// through the pipeline during replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub record_id: Uuid,
    pub npc_id: String,
    pub trigger_reason: TriggerReason,
    pub interaction_count: i64,
    pub seed: i64,
    pub player_input: String,
    pub snapshot_time_ticks: Ticks,
    pub memory_hash_before: String,
    pub prompt_hash: String,
    pub output_hash: String,
    pub raw_output: String,
    pub dialogue_text: String,
    pub validation_passed: bool,
    pub fallback_used: bool,
    #[serde(default)]
    pub cancelled: bool,
    pub retry_count: u32,
    pub mutations_applied: u32,
    pub intents_emitted: u32,
    pub validation_failures: u32,
    pub created_at_ticks: Ticks,
}

/// Bounded ring buffer of audit records for one NPC; oldest evicted first.
#[derive(Debug, Clone)]
pub struct AuditRecorder {
    capacity: usize,
    records: VecDeque<AuditRecord>,
}

impl AuditRecorder {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            records: VecDeque::new(),
        }
    }

    pub fn record(&mut self, record: AuditRecord) {
        if self.records.len() == self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn latest(&self) -> Option<&AuditRecord> {
        self.records.back()
    }

    /// Oldest-first iteration.
    pub fn records(&self) -> impl Iterator<Item = &AuditRecord> {
        self.records.iter()
    }

    pub fn to_vec(&self) -> Vec<AuditRecord> {
        self.records.iter().cloned().collect()
    }
}

#[cfg(test)]
pub(crate) fn test_record(n: i64) -> AuditRecord {
    AuditRecord {
        record_id: Uuid::new_v4(),
        npc_id: "npc".to_string(),
        trigger_reason: TriggerReason::PlayerUtterance,
        interaction_count: n,
        seed: n,
        player_input: format!("input {n}"),
        snapshot_time_ticks: n * 100,
        memory_hash_before: format!("mem-{n}"),
        prompt_hash: format!("prompt-{n}"),
        output_hash: format!("out-{n}"),
        raw_output: format!("raw {n}"),
        dialogue_text: format!("dialogue {n}"),
        validation_passed: true,
        fallback_used: false,
        cancelled: false,
        retry_count: 0,
        mutations_applied: 0,
        intents_emitted: 0,
        validation_failures: 0,
        created_at_ticks: n * 100,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_buffer_evicts_oldest() {
        let mut recorder = AuditRecorder::new(3);
        for n in 0..5 {
            recorder.record(test_record(n));
        }
        assert_eq!(recorder.len(), 3);
        let counts: Vec<i64> = recorder.records().map(|r| r.interaction_count).collect();
        assert_eq!(counts, vec![2, 3, 4]);
        assert_eq!(recorder.latest().unwrap().interaction_count, 4);
    }

    #[test]
    fn zero_capacity_is_clamped_to_one() {
        let mut recorder = AuditRecorder::new(0);
        recorder.record(test_record(1));
        recorder.record(test_record(2));
        assert_eq!(recorder.len(), 1);
        assert_eq!(recorder.latest().unwrap().interaction_count, 2);
    }

    #[test]
    fn record_serde_roundtrip() {
        let record = test_record(7);
        let json = serde_json::to_string(&record).unwrap();
        let back: AuditRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }
}
