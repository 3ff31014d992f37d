//! The per-NPC agent: one interaction in, one dialogue string out.
//!
//! `send_interaction` runs the whole governed pipeline: expectancy rules,
//! retrieval, snapshot, prompt assembly, generation, parsing, validation,
//! retry with escalation, commit or fallback, audit. State changes only when
//! the gate passes; the caller always gets a dialogue string back unless the
//! input itself was invalid or the interaction was cancelled.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{RwLock, mpsc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use loreguard_audit::{AuditRecord, AuditRecorder};
use loreguard_config::AppConfig;
use loreguard_llm::{GenerationParams, Generator};
use loreguard_memory::{
    AuthoritySource, Clock, DecayReport, PersonaMemory, Ticks, WorldIntent, memory_hash,
    retrieve, sha256_hex,
};
use loreguard_parser::{OutputParser, reply_json_schema};
use loreguard_prompt::{
    DialogueExchange, FewShotExample, SnapshotBuilder, StateSnapshot, assemble,
};
use loreguard_rules::{ExpectancyEngine, ExpectancyRule, InteractionContext, TriggerReason};
use loreguard_validate::{
    CustomRule, GateResult, ValidationContext, ValidationFailure, ValidationGate, escalate,
};

use crate::fallback::FallbackLibrary;
use crate::functions::{FunctionCallDispatcher, FunctionCallResult};
use crate::intents::{IntentDispatcher, intent_channel};
use crate::mutator::{MutationBatch, apply_gate_result};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AgentError {
    #[error("player input is required for utterance triggers")]
    EmptyPlayerInput,
    #[error("interaction context targets npc `{expected}`, got `{actual}`")]
    NpcIdMismatch { expected: String, actual: String },
    #[error("interaction cancelled")]
    Cancelled,
}

/// Canonical facts broadcast to every NPC in a world. Built once at host
/// startup, then immutable.
#[derive(Debug, Clone, Default)]
pub struct WorldFacts {
    facts: Vec<(String, String, Vec<String>)>,
}

impl WorldFacts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(
        &mut self,
        id: impl Into<String>,
        content: impl Into<String>,
        contradiction_keywords: Vec<String>,
    ) {
        self.facts.push((id.into(), content.into(), contradiction_keywords));
    }

    pub fn len(&self) -> usize {
        self.facts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }
}

pub struct NpcAgent {
    npc_id: String,
    config: AppConfig,
    memory: Arc<RwLock<PersonaMemory>>,
    engine: ExpectancyEngine,
    gate: ValidationGate,
    parser: OutputParser,
    generator: Arc<dyn Generator>,
    clock: Arc<dyn Clock>,
    fallbacks: FallbackLibrary,
    recorder: AuditRecorder,
    intent_dispatcher: IntentDispatcher,
    functions: FunctionCallDispatcher,
    forbidden_knowledge: Vec<String>,
    few_shot: Vec<FewShotExample>,
    dialogue_history: Vec<DialogueExchange>,
    interaction_count: i64,
    use_output_schema: bool,
    last_snapshot: Option<StateSnapshot>,
    last_gate_result: Option<GateResult>,
    last_mutation_batch: Option<MutationBatch>,
    last_function_call_results: Vec<FunctionCallResult>,
}

impl NpcAgent {
    /// Create an agent and the host-side receiver for its world intents.
    pub fn new(
        npc_id: impl Into<String>,
        config: AppConfig,
        generator: Arc<dyn Generator>,
        clock: Arc<dyn Clock>,
    ) -> (Self, mpsc::Receiver<WorldIntent>) {
        let npc_id = npc_id.into();
        let (intent_dispatcher, intent_rx) = intent_channel(config.agent.intent_channel_capacity);
        let agent = Self {
            memory: Arc::new(RwLock::new(PersonaMemory::new(npc_id.clone()))),
            npc_id,
            engine: ExpectancyEngine::new(),
            gate: ValidationGate::new(),
            parser: OutputParser::new(),
            generator,
            clock,
            fallbacks: FallbackLibrary::new(),
            recorder: AuditRecorder::new(config.audit.capacity),
            intent_dispatcher,
            functions: FunctionCallDispatcher::new(),
            forbidden_knowledge: Vec::new(),
            few_shot: Vec::new(),
            dialogue_history: Vec::new(),
            interaction_count: 0,
            use_output_schema: false,
            last_snapshot: None,
            last_gate_result: None,
            last_mutation_batch: None,
            last_function_call_results: Vec::new(),
            config,
        };
        (agent, intent_rx)
    }

    // ── Host-facing configuration ────────────────────────────────────────────

    pub fn register_rule(&mut self, rule: Box<dyn ExpectancyRule>) {
        self.engine.register(rule);
    }

    pub fn register_custom_rule(&mut self, rule: Box<dyn CustomRule>) {
        self.gate.register_rule(rule);
    }

    pub fn register_function(
        &mut self,
        name: impl Into<String>,
        handler: impl Fn(&loreguard_parser::FunctionCall) -> anyhow::Result<String>
        + Send
        + Sync
        + 'static,
    ) {
        self.functions.register(name, handler);
    }

    pub fn fallbacks_mut(&mut self) -> &mut FallbackLibrary {
        &mut self.fallbacks
    }

    pub fn set_forbidden_knowledge(&mut self, terms: Vec<String>) {
        self.forbidden_knowledge = terms;
    }

    pub fn set_few_shot(&mut self, examples: Vec<FewShotExample>) {
        self.few_shot = examples;
    }

    pub fn set_use_output_schema(&mut self, enabled: bool) {
        self.use_output_schema = enabled;
    }

    /// Seed the world-wide canonical broadcast into this NPC's memory.
    pub async fn adopt_world_facts(&self, facts: &WorldFacts) {
        let mut memory = self.memory.write().await;
        for (id, content, keywords) in &facts.facts {
            if let Err(error) = memory.insert_canonical(
                id.clone(),
                content.clone(),
                keywords.clone(),
                AuthoritySource::Designer,
            ) {
                tracing::warn!(npc_id = %self.npc_id, fact_id = %id, error = %error,
                    "world fact broadcast skipped");
            }
        }
    }

    // ── Observability accessors ──────────────────────────────────────────────

    pub fn npc_id(&self) -> &str {
        &self.npc_id
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn memory(&self) -> Arc<RwLock<PersonaMemory>> {
        Arc::clone(&self.memory)
    }

    pub fn recorder(&self) -> &AuditRecorder {
        &self.recorder
    }

    pub fn last_snapshot(&self) -> Option<&StateSnapshot> {
        self.last_snapshot.as_ref()
    }

    pub fn last_gate_result(&self) -> Option<&GateResult> {
        self.last_gate_result.as_ref()
    }

    pub fn last_mutation_batch(&self) -> Option<MutationBatch> {
        self.last_mutation_batch
    }

    pub fn last_function_call_results(&self) -> &[FunctionCallResult] {
        &self.last_function_call_results
    }

    pub fn interaction_count(&self) -> i64 {
        self.interaction_count
    }

    /// Restore the interaction counter (save-load and replay).
    pub fn set_interaction_count(&mut self, count: i64) {
        self.interaction_count = count;
    }

    pub fn dialogue_history(&self) -> &[DialogueExchange] {
        &self.dialogue_history
    }

    pub fn set_dialogue_history(&mut self, history: Vec<DialogueExchange>) {
        self.dialogue_history = history;
    }

    /// Run an explicit decay cycle. Never runs concurrently with retrieval;
    /// the write lock serializes it against the pipeline.
    pub async fn run_decay(
        &self,
        now_ticks: Ticks,
        half_life_ticks: Ticks,
        prune_below: f64,
    ) -> DecayReport {
        self.memory.write().await.decay(now_ticks, half_life_ticks, prune_below)
    }

    // ── The pipeline ─────────────────────────────────────────────────────────

    pub async fn send_interaction(
        &mut self,
        ctx: InteractionContext,
        cancel: &CancellationToken,
    ) -> Result<String, AgentError> {
        if ctx.npc_id != self.npc_id {
            return Err(AgentError::NpcIdMismatch {
                expected: self.npc_id.clone(),
                actual: ctx.npc_id,
            });
        }
        if ctx.reason == TriggerReason::PlayerUtterance && ctx.player_input.trim().is_empty() {
            return Err(AgentError::EmptyPlayerInput);
        }
        if cancel.is_cancelled() {
            return Err(AgentError::Cancelled);
        }

        self.interaction_count += 1;
        let mut ctx = ctx;
        ctx.interaction_count = self.interaction_count;

        // One clock read per interaction; retries reuse it.
        let snapshot_time = self.clock.now_ticks();

        let (memory_hash_before, bundle) = {
            let memory = self.memory.read().await;
            (
                memory_hash(&memory),
                retrieve(&memory, &ctx.player_input, snapshot_time, &self.config.retrieval),
            )
        };
        let constraints = self.engine.evaluate(&ctx);

        let snapshot0 = SnapshotBuilder::new(ctx.clone())
            .constraints(constraints)
            .memories(bundle)
            .system_prompt(self.config.agent.system_prompt.clone())
            .dialogue_history(self.dialogue_history.clone())
            .few_shot(self.few_shot.clone())
            .max_attempts(self.config.retry.max_attempts)
            .snapshot_time_ticks(snapshot_time)
            .build();

        let seed = ctx.interaction_count;
        let deadline =
            tokio::time::Instant::now() + Duration::from_millis(self.config.retry.timeout_ms);

        let assembled0 = assemble(&snapshot0, &self.config.working_memory);
        let first_prompt_hash = sha256_hex(assembled0.full().as_bytes());

        self.last_snapshot = Some(snapshot0.clone());
        self.last_function_call_results.clear();

        let max_attempts = self.config.retry.max_attempts;
        let mut snapshot = snapshot0;
        let mut assembled = assembled0;
        let mut retry_count: u32 = 0;
        let mut total_failures: u32 = 0;
        let mut last_raw = String::new();
        let mut final_gate: Option<GateResult> = None;

        let mut attempt: u32 = 0;
        while attempt < max_attempts {
            if attempt > 0 {
                assembled = assemble(&snapshot, &self.config.working_memory);
            }
            let prompt = assembled.full();

            let params = GenerationParams {
                max_tokens: self.config.generator.max_tokens,
                temperature: self.config.generator.temperature,
                seed: Some(seed),
                output_schema: self.use_output_schema.then(reply_json_schema),
                cache_prompt: self.config.generator.cache_prompt,
                n_keep: Some(assembled.estimated_prefix_tokens),
            };

            // The generator call is the pipeline's only suspension point; it
            // honors cancellation and the interaction's total time budget.
            let generator = Arc::clone(&self.generator);
            let outcome = tokio::select! {
                () = cancel.cancelled() => None,
                generated = tokio::time::timeout_at(deadline, generator.generate(&prompt, &params)) => {
                    Some(generated)
                }
            };

            let Some(generated) = outcome else {
                self.record_audit(AuditInputs {
                    ctx: &ctx,
                    snapshot_time,
                    seed,
                    memory_hash_before: &memory_hash_before,
                    prompt_hash: &first_prompt_hash,
                    raw_output: "",
                    dialogue_text: "",
                    validation_passed: false,
                    fallback_used: false,
                    cancelled: true,
                    retry_count,
                    total_failures,
                    batch: MutationBatch::default(),
                });
                return Err(AgentError::Cancelled);
            };

            let response = match generated {
                Err(_elapsed) => {
                    total_failures += 1;
                    final_gate = Some(GateResult::from_failures(vec![
                        ValidationFailure::timeout_exceeded("interaction wall-time budget exceeded"),
                    ]));
                    break;
                }
                Ok(Err(error)) => {
                    tracing::warn!(npc_id = %self.npc_id, error = %error, "generator failed");
                    total_failures += 1;
                    final_gate =
                        Some(GateResult::from_failures(vec![ValidationFailure::generator_failure(
                            error.to_string(),
                        )]));
                    break;
                }
                Ok(Ok(response)) => response,
            };

            last_raw = response.text;
            let parsed = self.parser.parse(&last_raw, self.use_output_schema);
            let gate = {
                let validation_ctx = ValidationContext {
                    constraints: &snapshot.constraints,
                    canonical_facts: &snapshot.memories.canonical_facts,
                    forbidden_knowledge: &self.forbidden_knowledge,
                };
                self.gate.validate(&parsed, &validation_ctx)
            };

            if gate.passed {
                let batch = apply_gate_result(
                    &self.memory,
                    &gate,
                    snapshot_time,
                    &self.intent_dispatcher,
                )
                .await;
                let function_results = self.functions.dispatch_all(&parsed.function_calls);
                let dialogue = parsed.dialogue_text.clone();

                self.dialogue_history.push(DialogueExchange {
                    player: ctx.player_input.clone(),
                    npc: dialogue.clone(),
                });
                self.record_audit(AuditInputs {
                    ctx: &ctx,
                    snapshot_time,
                    seed,
                    memory_hash_before: &memory_hash_before,
                    prompt_hash: &first_prompt_hash,
                    raw_output: &last_raw,
                    dialogue_text: &dialogue,
                    validation_passed: true,
                    fallback_used: false,
                    cancelled: false,
                    retry_count,
                    total_failures,
                    batch,
                });
                self.last_gate_result = Some(gate);
                self.last_mutation_batch = Some(batch);
                self.last_function_call_results = function_results;
                return Ok(dialogue);
            }

            total_failures += gate.failures.len() as u32;
            if gate.should_retry(attempt, max_attempts) {
                let escalation = escalate(&gate.failures, self.config.retry.escalation);
                snapshot = snapshot.fork_for_retry(&escalation, attempt + 1);
                self.last_snapshot = Some(snapshot.clone());
                final_gate = Some(gate);
                retry_count += 1;
                attempt += 1;
                continue;
            }

            final_gate = Some(gate);
            break;
        }

        // Retries exhausted, critical failure, generator failure, or
        // max_attempts == 0: author fallback, no state change.
        let dialogue = self.fallbacks.pick(ctx.reason);
        self.dialogue_history.push(DialogueExchange {
            player: ctx.player_input.clone(),
            npc: dialogue.clone(),
        });
        self.record_audit(AuditInputs {
            ctx: &ctx,
            snapshot_time,
            seed,
            memory_hash_before: &memory_hash_before,
            prompt_hash: &first_prompt_hash,
            raw_output: &last_raw,
            dialogue_text: &dialogue,
            validation_passed: false,
            fallback_used: true,
            cancelled: false,
            retry_count,
            total_failures,
            batch: MutationBatch::default(),
        });
        self.last_gate_result = final_gate;
        self.last_mutation_batch = Some(MutationBatch::default());
        Ok(dialogue)
    }

    fn record_audit(&mut self, inputs: AuditInputs<'_>) {
        let record = AuditRecord {
            record_id: Uuid::new_v4(),
            npc_id: self.npc_id.clone(),
            trigger_reason: inputs.ctx.reason,
            interaction_count: inputs.ctx.interaction_count,
            seed: inputs.seed,
            player_input: inputs.ctx.player_input.clone(),
            snapshot_time_ticks: inputs.snapshot_time,
            memory_hash_before: inputs.memory_hash_before.to_string(),
            prompt_hash: inputs.prompt_hash.to_string(),
            output_hash: sha256_hex(inputs.raw_output.as_bytes()),
            raw_output: inputs.raw_output.to_string(),
            dialogue_text: inputs.dialogue_text.to_string(),
            validation_passed: inputs.validation_passed,
            fallback_used: inputs.fallback_used,
            cancelled: inputs.cancelled,
            retry_count: inputs.retry_count,
            mutations_applied: inputs.batch.applied,
            intents_emitted: inputs.batch.intents_emitted,
            validation_failures: inputs.total_failures,
            created_at_ticks: inputs.snapshot_time,
        };
        self.recorder.record(record);
    }
}

struct AuditInputs<'a> {
    ctx: &'a InteractionContext,
    snapshot_time: Ticks,
    seed: i64,
    memory_hash_before: &'a str,
    prompt_hash: &'a str,
    raw_output: &'a str,
    dialogue_text: &'a str,
    validation_passed: bool,
    fallback_used: bool,
    cancelled: bool,
    retry_count: u32,
    total_failures: u32,
    batch: MutationBatch,
}
