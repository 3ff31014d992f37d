use std::fs;
use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Where the static (KV-cache-eligible) prompt prefix ends.
///
/// Everything up to and including the named section goes into the static
/// prefix; later sections form the dynamic suffix. `AfterConstraints` trades
/// cache stability for stronger in-prefix steering: escalated retries rebuild
/// the prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrefixBoundary {
    AfterSystemPrompt,
    AfterCanonicalFacts,
    AfterWorldState,
    AfterConstraints,
}

/// How the retry loop strengthens the constraint set after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationMode {
    None,
    AddSpecificProhibition,
    HardenRequirements,
    Full,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Baseline system prompt prepended to every assembled prompt.
    pub system_prompt: String,
    /// Capacity of the per-NPC outbound world-intent channel.
    pub intent_channel_capacity: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            system_prompt: "You are a character in a living world. Stay in character. \
                            Speak only as your character would."
                .to_string(),
            intent_channel_capacity: 32,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub max_episodic: usize,
    pub max_beliefs: usize,
    pub recency_weight: f64,
    pub relevance_weight: f64,
    pub significance_weight: f64,
    /// Half-life for recency decay, in 100-ns ticks (default: 30 minutes).
    pub half_life_ticks: i64,
    /// Beliefs below this confidence are filtered before sorting.
    pub belief_confidence_floor: f64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            max_episodic: 8,
            max_beliefs: 6,
            recency_weight: 0.35,
            relevance_weight: 0.45,
            significance_weight: 0.20,
            half_life_ticks: 30 * 60 * 10_000_000,
            belief_confidence_floor: 0.2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkingMemoryConfig {
    /// Dialogue exchanges kept in the prompt (truncated from the front).
    pub max_exchanges: usize,
    pub max_few_shot: usize,
    pub max_episodic_chars: usize,
    pub max_belief_chars: usize,
    pub max_history_chars: usize,
    /// Soft cap on total prompt characters. Mandatory sections (system
    /// prompt, canonical facts, world state, constraints) may exceed it.
    pub soft_total_chars: usize,
    pub static_prefix_boundary: PrefixBoundary,
}

impl Default for WorkingMemoryConfig {
    fn default() -> Self {
        Self {
            max_exchanges: 6,
            max_few_shot: 4,
            max_episodic_chars: 1200,
            max_belief_chars: 800,
            max_history_chars: 2000,
            soft_total_chars: 6000,
            static_prefix_boundary: PrefixBoundary::AfterWorldState,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Generator attempts per interaction. Zero means immediate fallback.
    pub max_attempts: u32,
    pub escalation: EscalationMode,
    /// Total wall-time budget for one interaction, including retries.
    /// Exceeding it is treated as a critical failure.
    pub timeout_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            escalation: EscalationMode::Full,
            timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub base_url: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub cache_prompt: bool,
    pub request_timeout_ms: u64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            max_tokens: 256,
            temperature: 0.7,
            cache_prompt: true,
            request_timeout_ms: 20_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Ring-buffer capacity per NPC; oldest records are evicted first.
    pub capacity: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self { capacity: 50 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub save_dir: String,
    pub max_file_bytes: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            save_dir: ".loreguard/saves".to_string(),
            max_file_bytes: 5 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub agent: AgentConfig,
    pub retrieval: RetrievalConfig,
    pub working_memory: WorkingMemoryConfig,
    pub retry: RetryConfig,
    pub generator: GeneratorConfig,
    pub audit: AuditConfig,
    pub persistence: PersistenceConfig,
}

impl AppConfig {
    /// Load from a TOML file; a missing file yields the full defaults.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::default();
        if let Ok(raw) = fs::read_to_string(path) {
            config = toml::from_str(&raw)?;
        }
        Ok(config)
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        let rendered = toml::to_string_pretty(self)?;
        fs::write(path, rendered)?;
        Ok(())
    }
}
