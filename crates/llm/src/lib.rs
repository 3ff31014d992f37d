//! Generator adapter: the one boundary to the external text generator.
//!
//! The adapter carries prompt, sampling params, seed, and an optional output
//! schema to a completion endpoint and hands the raw text back. It never
//! retries on its own; the retry loop outside owns that decision.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

/// Seed value meaning "explicitly random".
pub const SEED_EXPLICIT_RANDOM: i64 = -1;

/// Sampling and caching parameters for one generator call.
///
/// Seed semantics: `None` = implementation default (non-reproducible);
/// non-negative = deterministic best-effort; `-1` = explicit random. The
/// retry loop reuses one seed for every attempt of an interaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub max_tokens: u32,
    pub temperature: f32,
    pub seed: Option<i64>,
    /// JSON schema constraining the output grammar. When absent the parser
    /// falls back to regex mode.
    pub output_schema: Option<serde_json::Value>,
    pub cache_prompt: bool,
    /// Static-prefix token count the server may keep in its KV cache.
    pub n_keep: Option<u32>,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_tokens: 256,
            temperature: 0.7,
            seed: None,
            output_schema: None,
            cache_prompt: true,
            n_keep: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationResponse {
    pub text: String,
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub cached_tokens: u32,
    #[serde(default)]
    pub prefill_ms: u64,
    #[serde(default)]
    pub completion_ms: u64,
}

#[derive(Debug, Error)]
pub enum GeneratorError {
    #[error("generator timed out")]
    Timeout,
    #[error("generator transport failure: {0}")]
    Transport(String),
    #[error("generator returned an invalid response: {0}")]
    InvalidResponse(String),
}

/// The single capability the pipeline requires of a text generator.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<GenerationResponse, GeneratorError>;
}

// ── HTTP completion endpoint ─────────────────────────────────────────────────

/// Adapter for an HTTP completion endpoint (llama.cpp-server style).
#[derive(Debug, Clone)]
pub struct HttpGenerator {
    client: reqwest::Client,
    base_url: String,
}

impl HttpGenerator {
    pub fn new(base_url: impl Into<String>, request_timeout_ms: u64) -> Result<Self, GeneratorError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(request_timeout_ms))
            .build()
            .map_err(|e| GeneratorError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/completion", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl Generator for HttpGenerator {
    async fn generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<GenerationResponse, GeneratorError> {
        let mut payload = json!({
            "prompt": prompt,
            "max_tokens": params.max_tokens,
            "temperature": params.temperature,
            "cache_prompt": params.cache_prompt,
        });
        // Optional fields are omitted entirely when unset so the server's
        // defaults apply.
        if let Some(seed) = params.seed {
            payload["seed"] = json!(seed);
        }
        if let Some(schema) = &params.output_schema {
            payload["json_schema"] = schema.clone();
        }
        if let Some(n_keep) = params.n_keep {
            payload["n_keep"] = json!(n_keep);
        }

        let response = self
            .client
            .post(self.endpoint())
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GeneratorError::Timeout
                } else {
                    GeneratorError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GeneratorError::Transport(format!("status {status}: {body}")));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| GeneratorError::InvalidResponse(e.to_string()))?;
        let Some(text) = body.get("text").and_then(|v| v.as_str()) else {
            return Err(GeneratorError::InvalidResponse(format!(
                "missing `text` field in {body}"
            )));
        };

        let u32_field = |name: &str| body.get(name).and_then(|v| v.as_u64()).unwrap_or(0) as u32;
        let u64_field = |name: &str| body.get(name).and_then(|v| v.as_u64()).unwrap_or(0);

        Ok(GenerationResponse {
            text: text.to_string(),
            prompt_tokens: u32_field("prompt_tokens"),
            cached_tokens: u32_field("cached_tokens"),
            prefill_ms: u64_field("prefill_ms"),
            completion_ms: u64_field("completion_ms"),
        })
    }
}

// ── Scripted generator for tests ─────────────────────────────────────────────

/// One recorded call made through a [`ScriptedGenerator`].
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub prompt: String,
    pub params: GenerationParams,
}

/// Replays a fixed script of responses and records every call, so tests can
/// assert what the pipeline actually sent (notably that all retry attempts
/// share one seed).
#[derive(Default)]
pub struct ScriptedGenerator {
    script: std::sync::Mutex<std::collections::VecDeque<Result<String, GeneratorError>>>,
    calls: std::sync::Mutex<Vec<RecordedCall>>,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_response(&self, text: impl Into<String>) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(Ok(text.into()));
        }
    }

    pub fn push_error(&self, error: GeneratorError) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(Err(error));
        }
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|calls| calls.len()).unwrap_or(0)
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<GenerationResponse, GeneratorError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(RecordedCall {
                prompt: prompt.to_string(),
                params: params.clone(),
            });
        }
        let next = self
            .script
            .lock()
            .ok()
            .and_then(|mut script| script.pop_front());
        match next {
            Some(Ok(text)) => Ok(GenerationResponse {
                text,
                ..GenerationResponse::default()
            }),
            Some(Err(error)) => Err(error),
            None => Err(GeneratorError::Transport("script exhausted".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_params_have_no_seed() {
        let params = GenerationParams::default();
        assert_eq!(params.seed, None);
        assert!(params.output_schema.is_none());
        assert!(params.cache_prompt);
    }

    #[tokio::test]
    async fn scripted_generator_replays_in_order() {
        let generator = ScriptedGenerator::new();
        generator.push_response("first");
        generator.push_response("second");

        let params = GenerationParams::default();
        let a = generator.generate("p1", &params).await.unwrap();
        let b = generator.generate("p2", &params).await.unwrap();
        assert_eq!(a.text, "first");
        assert_eq!(b.text, "second");

        let calls = generator.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].prompt, "p1");
    }

    #[tokio::test]
    async fn scripted_generator_exhaustion_is_transport_error() {
        let generator = ScriptedGenerator::new();
        let err = generator
            .generate("p", &GenerationParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, GeneratorError::Transport(_)));
    }

    #[tokio::test]
    async fn scripted_generator_replays_errors() {
        let generator = ScriptedGenerator::new();
        generator.push_error(GeneratorError::Timeout);
        let err = generator
            .generate("p", &GenerationParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, GeneratorError::Timeout));
    }

    #[test]
    fn http_generator_endpoint_trims_trailing_slash() {
        let generator = HttpGenerator::new("http://localhost:8080/", 1000).unwrap();
        assert_eq!(generator.endpoint(), "http://localhost:8080/completion");
    }
}
