//! Deterministic replay of recorded interactions.
//!
//! A replay session drives an identically-configured agent through a set of
//! audit records using a caller-supplied generator, then compares the
//! per-stage hashes against the recorded ones. Drift names the first stage
//! that diverged; replay halts on the first drifting record unless configured
//! otherwise.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use loreguard_audit::{AuditRecord, DriftReport, ReplayedHashes, classify_drift};
use loreguard_memory::ManualClock;
use loreguard_rules::{InteractionContext, TriggerReason};

use crate::agent::{AgentError, NpcAgent};

#[derive(Debug, Clone, Copy)]
pub struct ReplayConfig {
    pub stop_on_first_drift: bool,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self { stop_on_first_drift: true }
    }
}

/// Owns the replay agent. The agent must be configured like the recording
/// one (same config, rules, fallback lists, seeded memory) and must have been
/// built with the session's [`ManualClock`] so each record replays at its
/// recorded snapshot time.
pub struct ReplaySession {
    agent: NpcAgent,
    clock: Arc<ManualClock>,
    config: ReplayConfig,
}

impl ReplaySession {
    pub fn new(agent: NpcAgent, clock: Arc<ManualClock>, config: ReplayConfig) -> Self {
        Self { agent, clock, config }
    }

    pub fn into_agent(self) -> NpcAgent {
        self.agent
    }

    pub async fn replay(&mut self, records: &[AuditRecord]) -> Result<DriftReport, AgentError> {
        let mut report = DriftReport::default();
        let cancel = CancellationToken::new();

        for (index, record) in records.iter().enumerate() {
            self.clock.set(record.snapshot_time_ticks);
            // `send_interaction` increments before use; rewind so the replayed
            // interaction carries the recorded count (and therefore seed).
            self.agent.set_interaction_count(record.interaction_count - 1);

            let ctx = context_from_record(record);
            self.agent.send_interaction(ctx, &cancel).await?;

            let Some(replayed) = self.agent.recorder().latest() else {
                break;
            };
            let hashes = ReplayedHashes {
                memory_hash_before: replayed.memory_hash_before.clone(),
                prompt_hash: replayed.prompt_hash.clone(),
                output_hash: replayed.output_hash.clone(),
            };
            let drift = classify_drift(record, &hashes);
            let drifted = drift != loreguard_audit::Drift::None;
            report.per_record.push((record.record_id, drift));

            if drifted {
                tracing::warn!(npc_id = %record.npc_id, record = %record.record_id,
                    drift = ?drift, "replay drift detected");
                if self.config.stop_on_first_drift {
                    report.halted_at = Some(index);
                    break;
                }
            }
        }
        Ok(report)
    }
}

fn context_from_record(record: &AuditRecord) -> InteractionContext {
    match record.trigger_reason {
        TriggerReason::PlayerUtterance => {
            InteractionContext::player_utterance(&record.npc_id, &record.player_input, "")
        }
        reason => InteractionContext::trigger(&record.npc_id, reason, ""),
    }
}
