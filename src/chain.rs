//! # Model Call Chain
//! Ordered candidate models tried strictly in sequence. Per model: one
//! completion call under a `tokio::time::timeout`, with a fixed short delay
//! and retry on HTTP 429. The first response carrying non-empty text wins;
//! when every candidate is exhausted the chain reports the last failure.
//!
//! The HTTP edge sits behind [`CompletionProvider`] so tests can inject stub
//! providers.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::{ModelConfig, RetryPolicy};
use crate::counters::PerformanceCounters;
use crate::error::PipelineError;

/// Text from the first successful attempt, with authoritative measurements.
#[derive(Debug, Clone)]
pub struct RawOutput {
    pub raw_text: String,
    pub model_used: String,
    pub token_count: u64,
    pub elapsed_ms: u64,
}

/// One completed provider call.
#[derive(Debug, Clone)]
pub struct Completion {
    pub content: String,
    pub total_tokens: u64,
}

/// Provider-level failure. `RateLimited` keeps the chain on the same model;
/// anything else advances to the next candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    RateLimited,
    Failed(String),
}

impl std::fmt::Display for CallError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CallError::RateLimited => write!(f, "rate limited (429)"),
            CallError::Failed(msg) => write!(f, "{msg}"),
        }
    }
}

/// Low-level completion call. Separated from the chain so production and
/// tests share the same retry/fallback logic.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(
        &self,
        model: &ModelConfig,
        system: &str,
        user: &str,
    ) -> Result<Completion, CallError>;

    fn name(&self) -> &'static str;
}

pub struct ModelCallChain {
    provider: Arc<dyn CompletionProvider>,
    models: Vec<ModelConfig>,
    retry: RetryPolicy,
}

impl ModelCallChain {
    pub fn new(
        provider: Arc<dyn CompletionProvider>,
        models: Vec<ModelConfig>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            provider,
            models,
            retry,
        }
    }

    pub fn models(&self) -> &[ModelConfig] {
        &self.models
    }

    /// Try candidates in order, an explicitly requested model first.
    pub async fn generate(
        &self,
        system: &str,
        user: &str,
        requested_model: Option<&str>,
        counters: &PerformanceCounters,
    ) -> Result<RawOutput, PipelineError> {
        let ordered = self.ordered_candidates(requested_model);
        let total = ordered.len();
        let mut last_error = String::from("no models configured");

        for (i, model) in ordered.into_iter().enumerate() {
            info!(model = %model.id, attempt = i + 1, total, "attempting model");
            match self.call_with_retry(model, system, user, counters).await {
                Ok(out) => {
                    info!(
                        model = %out.model_used,
                        elapsed_ms = out.elapsed_ms,
                        tokens = out.token_count,
                        "model succeeded"
                    );
                    return Ok(out);
                }
                Err(e) => {
                    warn!(model = %model.id, error = %e, "model failed, advancing");
                    last_error = format!("{}: {e}", model.id);
                }
            }
        }

        Err(PipelineError::AllModelsFailed(last_error))
    }

    fn ordered_candidates(&self, requested: Option<&str>) -> Vec<&ModelConfig> {
        let mut ordered: Vec<&ModelConfig> = Vec::with_capacity(self.models.len());
        if let Some(req) = requested {
            if let Some(m) = self.models.iter().find(|m| m.id == req) {
                ordered.push(m);
            }
        }
        for m in &self.models {
            if ordered.iter().all(|o| o.id != m.id) {
                ordered.push(m);
            }
        }
        ordered
    }

    /// One model: retry the 429 case up to the configured cap, time out each
    /// attempt individually. Empty content counts as a failure.
    async fn call_with_retry(
        &self,
        model: &ModelConfig,
        system: &str,
        user: &str,
        counters: &PerformanceCounters,
    ) -> Result<RawOutput, CallError> {
        let mut attempts_left = self.retry.rate_limit_retries + 1;
        loop {
            attempts_left -= 1;
            counters.record_model_attempt(&model.id);
            let started = Instant::now();
            let result = tokio::time::timeout(
                Duration::from_secs(model.timeout_s),
                self.provider.complete(model, system, user),
            )
            .await;
            let elapsed_ms = started.elapsed().as_millis() as u64;

            match result {
                Ok(Ok(completion)) if !completion.content.trim().is_empty() => {
                    counters.record_model_success(&model.id, elapsed_ms, completion.total_tokens);
                    return Ok(RawOutput {
                        raw_text: completion.content,
                        model_used: model.id.clone(),
                        token_count: completion.total_tokens,
                        elapsed_ms,
                    });
                }
                Ok(Ok(_)) => {
                    counters.record_model_failure(&model.id);
                    return Err(CallError::Failed("empty response".to_string()));
                }
                Ok(Err(CallError::RateLimited)) if attempts_left > 0 => {
                    counters.record_model_failure(&model.id);
                    tokio::time::sleep(Duration::from_millis(self.retry.rate_limit_delay_ms)).await;
                }
                Ok(Err(e)) => {
                    counters.record_model_failure(&model.id);
                    return Err(e);
                }
                Err(_elapsed) => {
                    counters.record_model_failure(&model.id);
                    return Err(CallError::Failed(format!(
                        "timed out after {}s",
                        model.timeout_s
                    )));
                }
            }
        }
    }
}

/// Production provider: OpenRouter's chat-completions contract over reqwest.
pub struct OpenRouterProvider {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl OpenRouterProvider {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .user_agent("adoption-trends-analyzer/0.1")
            .connect_timeout(Duration::from_secs(4))
            .build()
            .unwrap_or_default();
        Self {
            http,
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f64,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: String,
}

#[derive(Deserialize)]
struct Usage {
    #[serde(default)]
    total_tokens: u64,
}

#[async_trait]
impl CompletionProvider for OpenRouterProvider {
    async fn complete(
        &self,
        model: &ModelConfig,
        system: &str,
        user: &str,
    ) -> Result<Completion, CallError> {
        if self.api_key.is_empty() {
            return Err(CallError::Failed("missing API key".to_string()));
        }

        let req = ChatRequest {
            model: &model.id,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            max_tokens: model.max_tokens,
            temperature: model.temperature,
        };

        let resp = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await
            .map_err(|e| CallError::Failed(e.to_string()))?;

        if resp.status().as_u16() == 429 {
            return Err(CallError::RateLimited);
        }
        if !resp.status().is_success() {
            return Err(CallError::Failed(format!("HTTP {}", resp.status())));
        }

        let body: ChatResponse = resp
            .json()
            .await
            .map_err(|e| CallError::Failed(format!("malformed response: {e}")))?;
        let content = body
            .choices
            .first()
            .map(|c| c.message.content.clone())
            .unwrap_or_default();
        Ok(Completion {
            content,
            total_tokens: body.usage.map(|u| u.total_tokens).unwrap_or(0),
        })
    }

    fn name(&self) -> &'static str {
        "openrouter"
    }
}
