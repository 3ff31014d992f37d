//! The expectancy engine: author rules in, constraint set out.

use anyhow::Result;

use crate::constraint::ConstraintSet;
use crate::context::InteractionContext;

/// An author-supplied rule. `applies` decides cheaply whether to run;
/// `constraints` may fail, and a failing rule never aborts the interaction.
pub trait ExpectancyRule: Send + Sync {
    fn id(&self) -> &str;
    fn applies(&self, ctx: &InteractionContext) -> bool;
    fn constraints(&self, ctx: &InteractionContext) -> Result<ConstraintSet>;
}

/// Evaluates every registered rule against an interaction context and merges
/// the results in registration order.
#[derive(Default)]
pub struct ExpectancyEngine {
    rules: Vec<Box<dyn ExpectancyRule>>,
}

impl ExpectancyEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, rule: Box<dyn ExpectancyRule>) {
        self.rules.push(rule);
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Merge the constraint sets of all applicable rules. Rule failures are
    /// logged and skipped; the remaining rules still contribute.
    pub fn evaluate(&self, ctx: &InteractionContext) -> ConstraintSet {
        let mut merged = ConstraintSet::default();
        for rule in &self.rules {
            if !rule.applies(ctx) {
                continue;
            }
            match rule.constraints(ctx) {
                Ok(set) => merged = merged.merge(&set),
                Err(error) => {
                    tracing::warn!(rule_id = rule.id(), npc_id = %ctx.npc_id, error = %error,
                        "expectancy rule failed; skipping");
                }
            }
        }
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraint::{Constraint, Severity};
    use crate::context::TriggerReason;

    struct StaticRule {
        id: String,
        reason: TriggerReason,
        set: ConstraintSet,
    }

    impl ExpectancyRule for StaticRule {
        fn id(&self) -> &str {
            &self.id
        }
        fn applies(&self, ctx: &InteractionContext) -> bool {
            ctx.reason == self.reason
        }
        fn constraints(&self, _ctx: &InteractionContext) -> Result<ConstraintSet> {
            Ok(self.set.clone())
        }
    }

    struct FailingRule;

    impl ExpectancyRule for FailingRule {
        fn id(&self) -> &str {
            "failing"
        }
        fn applies(&self, _ctx: &InteractionContext) -> bool {
            true
        }
        fn constraints(&self, _ctx: &InteractionContext) -> Result<ConstraintSet> {
            anyhow::bail!("rule asset missing")
        }
    }

    fn prohibition_set(id: &str) -> ConstraintSet {
        ConstraintSet {
            prohibitions: vec![Constraint::new(id, format!("do not {id}"), Severity::Hard)],
            ..Default::default()
        }
    }

    #[test]
    fn only_applicable_rules_contribute() {
        let mut engine = ExpectancyEngine::new();
        engine.register(Box::new(StaticRule {
            id: "utterance".to_string(),
            reason: TriggerReason::PlayerUtterance,
            set: prohibition_set("secrets"),
        }));
        engine.register(Box::new(StaticRule {
            id: "zone".to_string(),
            reason: TriggerReason::ZoneEntry,
            set: prohibition_set("lore"),
        }));

        let ctx = InteractionContext::player_utterance("guard", "hi", "gate");
        let set = engine.evaluate(&ctx);
        assert_eq!(set.prohibitions.len(), 1);
        assert_eq!(set.prohibitions[0].id, "secrets");
    }

    #[test]
    fn failing_rule_is_skipped_not_fatal() {
        let mut engine = ExpectancyEngine::new();
        engine.register(Box::new(FailingRule));
        engine.register(Box::new(StaticRule {
            id: "ok".to_string(),
            reason: TriggerReason::PlayerUtterance,
            set: prohibition_set("secrets"),
        }));

        let ctx = InteractionContext::player_utterance("guard", "hi", "gate");
        let set = engine.evaluate(&ctx);
        assert_eq!(set.prohibitions.len(), 1);
    }

    #[test]
    fn empty_engine_yields_empty_set() {
        let engine = ExpectancyEngine::new();
        let ctx = InteractionContext::player_utterance("guard", "hi", "gate");
        assert!(engine.evaluate(&ctx).is_empty());
    }
}
