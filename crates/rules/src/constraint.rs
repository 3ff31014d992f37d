//! Constraints and constraint sets.

use serde::{Deserialize, Serialize};

/// Severity ordering matters: merges keep the stronger of two duplicates, and
/// critical failures end the retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Soft,
    Hard,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constraint {
    pub id: String,
    pub description: String,
    /// Literal keywords, or regexes wrapped in `/.../`. When empty, the
    /// validator derives patterns from the description.
    #[serde(default)]
    pub validation_patterns: Vec<String>,
    /// Text injected into the prompt's constraints section.
    #[serde(default)]
    pub prompt_injection: Option<String>,
    pub severity: Severity,
}

impl Constraint {
    pub fn new(id: impl Into<String>, description: impl Into<String>, severity: Severity) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            validation_patterns: Vec::new(),
            prompt_injection: None,
            severity,
        }
    }

    pub fn with_patterns(mut self, patterns: Vec<String>) -> Self {
        self.validation_patterns = patterns;
        self
    }

    pub fn with_prompt_injection(mut self, text: impl Into<String>) -> Self {
        self.prompt_injection = Some(text.into());
        self
    }
}

/// Ordered triple of permissions, prohibitions, and requirements.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConstraintSet {
    pub permissions: Vec<Constraint>,
    pub prohibitions: Vec<Constraint>,
    pub requirements: Vec<Constraint>,
}

impl ConstraintSet {
    pub fn is_empty(&self) -> bool {
        self.permissions.is_empty() && self.prohibitions.is_empty() && self.requirements.is_empty()
    }

    pub fn len(&self) -> usize {
        self.permissions.len() + self.prohibitions.len() + self.requirements.len()
    }

    /// Merge two sets. Associative; for equal ids within a sequence the
    /// higher severity wins and the earlier description/patterns are kept.
    pub fn merge(&self, other: &Self) -> Self {
        Self {
            permissions: merge_sequence(&self.permissions, &other.permissions),
            prohibitions: merge_sequence(&self.prohibitions, &other.prohibitions),
            requirements: merge_sequence(&self.requirements, &other.requirements),
        }
    }

    /// Prompt-injection texts in sequence order: prohibitions, requirements,
    /// then permissions.
    pub fn prompt_injections(&self) -> Vec<&str> {
        self.prohibitions
            .iter()
            .chain(self.requirements.iter())
            .chain(self.permissions.iter())
            .filter_map(|c| c.prompt_injection.as_deref())
            .collect()
    }
}

fn merge_sequence(base: &[Constraint], extra: &[Constraint]) -> Vec<Constraint> {
    let mut merged: Vec<Constraint> = base.to_vec();
    for incoming in extra {
        if let Some(existing) = merged.iter_mut().find(|c| c.id == incoming.id) {
            if incoming.severity > existing.severity {
                existing.severity = incoming.severity;
            }
        } else {
            merged.push(incoming.clone());
        }
    }
    merged
}
