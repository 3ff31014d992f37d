//! Constraint escalation: a pure, idempotent strengthening of the constraint
//! set in response to validation failures. The result is merged into the next
//! retry snapshot; escalating the same failures twice merges to the same set.

use loreguard_config::EscalationMode;
use loreguard_rules::{Constraint, ConstraintSet, Severity};

use crate::gate::{FailureReason, ValidationFailure};

pub fn escalate(failures: &[ValidationFailure], mode: EscalationMode) -> ConstraintSet {
    match mode {
        EscalationMode::None => ConstraintSet::default(),
        EscalationMode::AddSpecificProhibition => ConstraintSet {
            prohibitions: specific_prohibitions(failures),
            ..Default::default()
        },
        EscalationMode::HardenRequirements => ConstraintSet {
            requirements: hardened_requirements(failures),
            ..Default::default()
        },
        EscalationMode::Full => ConstraintSet {
            prohibitions: specific_prohibitions(failures),
            requirements: hardened_requirements(failures),
            ..Default::default()
        },
    }
}

/// Each violated pattern becomes a new critical prohibition with an explicit
/// prompt directive, so the next attempt both sees the rule and is hard-gated
/// on it.
fn specific_prohibitions(failures: &[ValidationFailure]) -> Vec<Constraint> {
    let mut out: Vec<Constraint> = Vec::new();
    for failure in failures {
        if failure.reason != FailureReason::ProhibitionViolated {
            continue;
        }
        let Some(pattern) = &failure.matched_pattern else { continue };
        let base_id = failure.constraint_id.as_deref().unwrap_or("anon");
        let id = format!("escalated-{base_id}");
        if out.iter().any(|c| c.id == id) {
            continue;
        }
        out.push(
            Constraint::new(id, format!("escalated from `{base_id}`"), Severity::Critical)
                .with_patterns(vec![pattern.clone()])
                .with_prompt_injection(format!(
                    "You must not mention \"{pattern}\" in any form."
                )),
        );
    }
    out
}

/// Re-issue each unmet requirement at `Hard`; the merge keeps the original
/// description and patterns and just raises the severity.
fn hardened_requirements(failures: &[ValidationFailure]) -> Vec<Constraint> {
    let mut out: Vec<Constraint> = Vec::new();
    for failure in failures {
        if failure.reason != FailureReason::RequirementNotMet {
            continue;
        }
        let Some(id) = &failure.constraint_id else { continue };
        if out.iter().any(|c| c.id == *id) {
            continue;
        }
        out.push(Constraint::new(id.clone(), failure.detail.clone(), Severity::Hard));
    }
    out
}
