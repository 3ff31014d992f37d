//! The validation gate: five sequential checks with accumulated failures.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use loreguard_memory::{CanonicalFact, Mutation, WorldIntent};
use loreguard_parser::ParsedOutput;
use loreguard_rules::{ConstraintSet, Severity};

use crate::patterns::effective_patterns;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    ProhibitionViolated,
    RequirementNotMet,
    CanonicalFactContradiction,
    KnowledgeBoundaryViolation,
    CanonicalMutationAttempt,
    CustomRuleFailed,
    ParseFailure,
    GeneratorFailure,
    TimeoutExceeded,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationFailure {
    pub reason: FailureReason,
    pub severity: Severity,
    pub constraint_id: Option<String>,
    pub matched_pattern: Option<String>,
    pub detail: String,
}

impl ValidationFailure {
    /// Synthetic critical failure for generator transport/timeout errors;
    /// forces fallback without retry.
    pub fn generator_failure(detail: impl Into<String>) -> Self {
        Self {
            reason: FailureReason::GeneratorFailure,
            severity: Severity::Critical,
            constraint_id: None,
            matched_pattern: None,
            detail: detail.into(),
        }
    }

    /// Synthetic critical failure when the interaction exceeded its total
    /// wall-time budget.
    pub fn timeout_exceeded(detail: impl Into<String>) -> Self {
        Self {
            reason: FailureReason::TimeoutExceeded,
            severity: Severity::Critical,
            constraint_id: None,
            matched_pattern: None,
            detail: detail.into(),
        }
    }
}

/// Everything the gate checks an output against.
pub struct ValidationContext<'a> {
    pub constraints: &'a ConstraintSet,
    pub canonical_facts: &'a [CanonicalFact],
    pub forbidden_knowledge: &'a [String],
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GateResult {
    pub passed: bool,
    pub failures: Vec<ValidationFailure>,
    /// Empty whenever `passed == false`; downstream code consumes these, never
    /// the raw parsed output.
    pub approved_mutations: Vec<Mutation>,
    /// Approved/rejected partition the proposal list even when the gate fails.
    pub rejected_mutations: Vec<(Mutation, String)>,
    pub approved_intents: Vec<WorldIntent>,
}

impl GateResult {
    pub fn from_failures(failures: Vec<ValidationFailure>) -> Self {
        Self {
            passed: failures.is_empty(),
            failures,
            ..Self::default()
        }
    }

    pub fn has_critical(&self) -> bool {
        self.failures.iter().any(|f| f.severity == Severity::Critical)
    }

    /// Retry is worthwhile only for non-critical failures with attempts left.
    pub fn should_retry(&self, attempt_number: u32, max_attempts: u32) -> bool {
        !self.failures.is_empty() && !self.has_critical() && attempt_number + 1 < max_attempts
    }
}

/// A host-supplied extra check run as the final gate. A rule that errors is
/// logged and skipped, never fatal.
pub trait CustomRule: Send + Sync {
    fn id(&self) -> &str;
    fn check(&self, parsed: &ParsedOutput) -> Result<Option<ValidationFailure>>;
}

#[derive(Default)]
pub struct ValidationGate {
    custom_rules: Vec<Box<dyn CustomRule>>,
}

impl ValidationGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_rule(&mut self, rule: Box<dyn CustomRule>) {
        self.custom_rules.push(rule);
    }

    /// Run all gates in order, accumulating failures. `passed` is the AND of
    /// every gate; approved lists are cleared on failure.
    pub fn validate(&self, parsed: &ParsedOutput, ctx: &ValidationContext<'_>) -> GateResult {
        let mut failures: Vec<ValidationFailure> = Vec::new();

        // Parse failures enter the gate as retryable (non-critical) failures.
        for parse_failure in &parsed.parse_failures {
            failures.push(ValidationFailure {
                reason: FailureReason::ParseFailure,
                severity: Severity::Hard,
                constraint_id: None,
                matched_pattern: None,
                detail: parse_failure.clone(),
            });
        }

        self.check_constraints(parsed, ctx, &mut failures);
        self.check_canonical_contradictions(parsed, ctx, &mut failures);
        self.check_forbidden_knowledge(parsed, ctx, &mut failures);
        let (approved_mutations, rejected_mutations, mut approved_intents) =
            self.check_mutation_legality(parsed, ctx, &mut failures);
        self.check_custom_rules(parsed, &mut failures);

        let passed = failures.is_empty();
        let approved_mutations = if passed { approved_mutations } else { Vec::new() };
        if !passed {
            approved_intents.clear();
        }

        GateResult {
            passed,
            failures,
            approved_mutations,
            rejected_mutations,
            approved_intents,
        }
    }

    // ── Constraint check ─────────────────────────────────────────────────────

    fn check_constraints(
        &self,
        parsed: &ParsedOutput,
        ctx: &ValidationContext<'_>,
        failures: &mut Vec<ValidationFailure>,
    ) {
        let dialogue = &parsed.dialogue_text;

        for prohibition in &ctx.constraints.prohibitions {
            for pattern in effective_patterns(prohibition) {
                if pattern.matches(dialogue) {
                    failures.push(ValidationFailure {
                        reason: FailureReason::ProhibitionViolated,
                        severity: prohibition.severity,
                        constraint_id: Some(prohibition.id.clone()),
                        matched_pattern: Some(pattern.source()),
                        detail: format!("prohibition `{}` matched output", prohibition.id),
                    });
                }
            }
        }

        for requirement in &ctx.constraints.requirements {
            let patterns = effective_patterns(requirement);
            // A descriptive requirement with no derivable patterns is
            // unenforceable and passes.
            if patterns.is_empty() {
                continue;
            }
            if !patterns.iter().any(|pattern| pattern.matches(dialogue)) {
                failures.push(ValidationFailure {
                    reason: FailureReason::RequirementNotMet,
                    severity: requirement.severity,
                    constraint_id: Some(requirement.id.clone()),
                    matched_pattern: None,
                    detail: format!("requirement `{}` not satisfied", requirement.id),
                });
            }
        }
    }

    // ── Canonical contradiction ──────────────────────────────────────────────

    fn check_canonical_contradictions(
        &self,
        parsed: &ParsedOutput,
        ctx: &ValidationContext<'_>,
        failures: &mut Vec<ValidationFailure>,
    ) {
        let dialogue_lower = parsed.dialogue_text.to_lowercase();

        for fact in ctx.canonical_facts {
            if let Some(hit) = contradiction_hit(&dialogue_lower, fact) {
                failures.push(ValidationFailure {
                    reason: FailureReason::CanonicalFactContradiction,
                    severity: Severity::Critical,
                    constraint_id: None,
                    matched_pattern: Some(hit),
                    detail: format!("output contradicts canonical fact `{}`", fact.id),
                });
            }
        }
    }

    // ── Forbidden knowledge ──────────────────────────────────────────────────

    fn check_forbidden_knowledge(
        &self,
        parsed: &ParsedOutput,
        ctx: &ValidationContext<'_>,
        failures: &mut Vec<ValidationFailure>,
    ) {
        let dialogue_lower = parsed.dialogue_text.to_lowercase();
        for term in ctx.forbidden_knowledge {
            if dialogue_lower.contains(&term.to_lowercase()) {
                failures.push(ValidationFailure {
                    reason: FailureReason::KnowledgeBoundaryViolation,
                    severity: Severity::Hard,
                    constraint_id: None,
                    matched_pattern: Some(term.clone()),
                    detail: format!("output contains forbidden term `{term}`"),
                });
            }
        }
    }

    // ── Mutation legality ────────────────────────────────────────────────────

    #[allow(clippy::type_complexity)]
    fn check_mutation_legality(
        &self,
        parsed: &ParsedOutput,
        ctx: &ValidationContext<'_>,
        failures: &mut Vec<ValidationFailure>,
    ) -> (Vec<Mutation>, Vec<(Mutation, String)>, Vec<WorldIntent>) {
        let mut approved: Vec<Mutation> = Vec::new();
        let mut rejected: Vec<(Mutation, String)> = Vec::new();
        let mut intents: Vec<WorldIntent> = parsed.proposed_intents.clone();

        for mutation in &parsed.proposed_mutations {
            let target = mutation.target_id();
            if ctx.canonical_facts.iter().any(|fact| fact.id == target) {
                failures.push(ValidationFailure {
                    reason: FailureReason::CanonicalMutationAttempt,
                    severity: Severity::Critical,
                    constraint_id: None,
                    matched_pattern: None,
                    detail: format!("mutation targets canonical fact `{target}`"),
                });
                rejected.push((mutation.clone(), "targets canonical fact".to_string()));
                continue;
            }

            match mutation {
                Mutation::AppendEpisodic { significance, .. }
                    if !(0.0..=1.0).contains(significance) =>
                {
                    rejected.push((mutation.clone(), "significance out of range".to_string()));
                }
                Mutation::TransformBelief { confidence, sentiment, .. }
                    if !(0.0..=1.0).contains(confidence) || !(-1.0..=1.0).contains(sentiment) =>
                {
                    rejected.push((mutation.clone(), "belief value out of range".to_string()));
                }
                // Embedded intents are delivered on the intent channel, not
                // applied as memory writes.
                Mutation::EmitWorldIntent(intent) => intents.push(intent.clone()),
                _ => approved.push(mutation.clone()),
            }
        }

        (approved, rejected, intents)
    }

    // ── Custom rules ─────────────────────────────────────────────────────────

    fn check_custom_rules(&self, parsed: &ParsedOutput, failures: &mut Vec<ValidationFailure>) {
        for rule in &self.custom_rules {
            match rule.check(parsed) {
                Ok(Some(failure)) => failures.push(failure),
                Ok(None) => {}
                Err(error) => {
                    tracing::warn!(rule_id = rule.id(), error = %error,
                        "custom validation rule errored; skipping");
                }
            }
        }
    }
}

/// Look for explicit negations of the fact's content ("not X", "isn't X") and
/// for any declared contradiction keyword. Tails shorter than two words are
/// ignored to keep noise down.
fn contradiction_hit(dialogue_lower: &str, fact: &CanonicalFact) -> Option<String> {
    const NEGATORS: &[&str] = &["not ", "isn't ", "is not ", "never ", "no longer "];

    let tokens: Vec<&str> = fact
        .content
        .split_whitespace()
        .collect();
    let content_lower = fact.content.to_lowercase();
    let lower_tokens: Vec<String> = content_lower
        .split_whitespace()
        .map(str::to_string)
        .collect();

    for start in 0..tokens.len().saturating_sub(1) {
        let tail = lower_tokens[start..].join(" ");
        if tail.split_whitespace().count() < 2 {
            continue;
        }
        for negator in NEGATORS {
            let needle = format!("{negator}{tail}");
            if dialogue_lower.contains(&needle) {
                return Some(needle);
            }
        }
    }

    for keyword in &fact.contradiction_keywords {
        if dialogue_lower.contains(&keyword.to_lowercase()) {
            return Some(keyword.clone());
        }
    }
    None
}
