//! Drift taxonomy for replay.
//!
//! Drift names the first pipeline stage whose hash diverges from the
//! recorded interaction: memory going in, the assembled prompt, or the raw
//! generator output.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::record::AuditRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Drift {
    None,
    /// Same prompt, different raw output: the model (or its sampling)
    /// changed.
    Output,
    /// The memory state going into the interaction diverged.
    Memory,
    /// Memory matched but the prompt did not: assembly or constraint
    /// evaluation diverged.
    Validation,
}

/// Hashes recomputed by a replay harness for one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayedHashes {
    pub memory_hash_before: String,
    pub prompt_hash: String,
    pub output_hash: String,
}

pub fn classify_drift(record: &AuditRecord, replayed: &ReplayedHashes) -> Drift {
    if replayed.memory_hash_before != record.memory_hash_before {
        return Drift::Memory;
    }
    if replayed.prompt_hash != record.prompt_hash {
        return Drift::Validation;
    }
    if replayed.output_hash != record.output_hash {
        return Drift::Output;
    }
    Drift::None
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DriftReport {
    /// One entry per replayed record, in replay order.
    pub per_record: Vec<(Uuid, Drift)>,
    /// Index into `per_record` where replay halted, if it did.
    pub halted_at: Option<usize>,
}

impl DriftReport {
    pub fn clean(&self) -> bool {
        self.per_record.iter().all(|(_, drift)| *drift == Drift::None)
    }

    pub fn first_drift(&self) -> Option<(Uuid, Drift)> {
        self.per_record
            .iter()
            .find(|(_, drift)| *drift != Drift::None)
            .copied()
    }
}
