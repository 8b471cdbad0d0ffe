//! Reasoning provider abstraction.
//!
//! Defines the [`ReasoningProvider`] trait used by the analysis, planning,
//! and recovery paths, plus the concrete implementations:
//!
//! - [`HttpProvider`] for OpenAI-compatible chat-completions servers
//! - [`TimedProvider`] decorator bounding every call with a wall-clock timeout
//! - [`StubProvider`] and [`ScriptedProvider`] for tests and unconfigured runs
//!
//! Structured output goes through [`generate_structured`], which extracts the
//! outermost JSON object from the reply and performs at most one corrective
//! round-trip before giving up with [`ProviderError::MalformedResponse`].

use gw_core::config::ReasoningConfig;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

pub type Result<T> = std::result::Result<T, ProviderError>;

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

/// Errors from a reasoning provider.
///
/// An unconfigured or unreachable provider is deliberately distinguishable
/// from one that answered with something unusable: callers degrade
/// differently (skip reasoning entirely vs. record a malformed reply).
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// Provider is missing credentials or has no backend at all.
    #[error("provider not configured: {0}")]
    NotConfigured(String),

    /// The provider's API returned an error (4xx/5xx, bad request, ...).
    #[error("api error: {0}")]
    Api(String),

    /// Request was rate limited; wait before retrying.
    #[error("rate limited - retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    /// The request exceeded its wall-clock budget.
    #[error("request timed out")]
    Timeout,

    /// The provider answered, but not with anything parseable. Carries a
    /// snippet of the offending reply.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// Network, serialization, or other unexpected failures.
    #[error("{0}")]
    Other(String),
}

// ---------------------------------------------------------------------------
// ReasoningProvider trait
// ---------------------------------------------------------------------------

/// Async trait for prompt-in/text-out generation.
///
/// Implementations must be `Send + Sync`; the engine shares one provider
/// across stages behind an `Arc`.
#[async_trait::async_trait]
pub trait ReasoningProvider: Send + Sync {
    /// Send one prompt and return the raw text reply.
    async fn generate(&self, prompt: &str) -> Result<String>;

    /// Human-readable provider identifier, used in logs.
    fn name(&self) -> &str;
}

// ---------------------------------------------------------------------------
// Structured generation
// ---------------------------------------------------------------------------

/// The outermost `{...}` span of `text`, if any.
///
/// Spans from the first `{` to the last `}`; replies that wrap JSON in prose
/// or code fences still extract cleanly.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

fn parse_json_reply(reply: &str) -> Option<serde_json::Value> {
    let candidate = extract_json_object(reply).unwrap_or(reply);
    serde_json::from_str(candidate).ok()
}

fn snippet(text: &str) -> String {
    text.chars().take(200).collect()
}

/// Ask the provider for a JSON object.
///
/// Appends a JSON-only instruction to the prompt and parses the extracted
/// object span. A non-JSON reply gets exactly one corrective round-trip; a
/// second bad reply is [`ProviderError::MalformedResponse`]. Provider
/// failures propagate untouched.
pub async fn generate_structured(
    provider: &dyn ReasoningProvider,
    prompt: &str,
) -> Result<serde_json::Value> {
    let json_prompt = format!("{prompt}\n\nRespond with valid JSON only.");
    let reply = provider.generate(&json_prompt).await?;
    if let Some(value) = parse_json_reply(&reply) {
        return Ok(value);
    }

    tracing::debug!(
        provider = provider.name(),
        "reply was not valid JSON, requesting a correction"
    );
    let fix_prompt = format!("Convert this to valid JSON:\n{reply}");
    let fixed = provider.generate(&fix_prompt).await?;
    parse_json_reply(&fixed).ok_or_else(|| ProviderError::MalformedResponse(snippet(&fixed)))
}

// ---------------------------------------------------------------------------
// TimedProvider – wall-clock bound on every call
// ---------------------------------------------------------------------------

/// Decorator that bounds `generate` with a wall-clock timeout.
///
/// The pipeline must keep moving even when a backend hangs; an elapsed
/// budget surfaces as [`ProviderError::Timeout`] like any other provider
/// failure.
pub struct TimedProvider<P> {
    inner: P,
    timeout: Duration,
}

impl<P> TimedProvider<P> {
    pub fn new(inner: P, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

#[async_trait::async_trait]
impl<P: ReasoningProvider> ReasoningProvider for TimedProvider<P> {
    async fn generate(&self, prompt: &str) -> Result<String> {
        match tokio::time::timeout(self.timeout, self.inner.generate(prompt)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    provider = self.inner.name(),
                    timeout_secs = self.timeout.as_secs(),
                    "provider call exceeded its time budget"
                );
                Err(ProviderError::Timeout)
            }
        }
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

// ---------------------------------------------------------------------------
// HttpProvider – OpenAI-compatible chat completions
// ---------------------------------------------------------------------------

/// Provider speaking the OpenAI-compatible `/chat/completions` protocol.
///
/// Works against hosted APIs and local inference servers alike. The API key
/// is resolved from the env var named in config at construction time; local
/// servers that require no auth simply leave the var unset.
pub struct HttpProvider {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    max_tokens: u32,
}

impl HttpProvider {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
        max_tokens: u32,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            model: model.into(),
            api_key,
            max_tokens,
        }
    }

    pub fn from_config(cfg: &ReasoningConfig) -> Self {
        let api_key = std::env::var(&cfg.api_key_env).ok();
        Self::new(cfg.base_url.clone(), cfg.model.clone(), api_key, cfg.max_tokens)
    }
}

#[async_trait::async_trait]
impl ReasoningProvider for HttpProvider {
    async fn generate(&self, prompt: &str) -> Result<String> {
        if self.base_url.trim().is_empty() {
            return Err(ProviderError::NotConfigured(
                "reasoning.base_url is empty".to_string(),
            ));
        }

        let body = serde_json::json!({
            "model": self.model,
            "messages": [{"role": "user", "content": prompt}],
            "max_tokens": self.max_tokens,
        });

        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let mut request = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout
            } else {
                ProviderError::Other(e.to_string())
            }
        })?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after_ms = response
                .headers()
                .get("retry-after")
                .and_then(|h| h.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .map(|secs| secs * 1000)
                .unwrap_or(1000);
            return Err(ProviderError::RateLimited { retry_after_ms });
        }

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api(format!("HTTP {status}: {}", snippet(&text))));
        }

        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ProviderError::Other(format!("parse error: {e}")))?;

        payload["choices"][0]["message"]["content"]
            .as_str()
            .map(String::from)
            .ok_or_else(|| {
                ProviderError::MalformedResponse(snippet(&payload.to_string()))
            })
    }

    fn name(&self) -> &str {
        &self.model
    }
}

// ---------------------------------------------------------------------------
// StubProvider – returns an error for every call
// ---------------------------------------------------------------------------

/// Placeholder provider that always returns `NotConfigured`. Used when no
/// backend is reachable so the pipeline's degraded paths stay exercised.
#[derive(Debug, Clone)]
pub struct StubProvider {
    provider_name: String,
}

impl StubProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            provider_name: name.into(),
        }
    }
}

#[async_trait::async_trait]
impl ReasoningProvider for StubProvider {
    async fn generate(&self, _prompt: &str) -> Result<String> {
        Err(ProviderError::NotConfigured(format!(
            "{} provider is not configured - set an API key or base URL",
            self.provider_name
        )))
    }

    fn name(&self) -> &str {
        &self.provider_name
    }
}

// ---------------------------------------------------------------------------
// ScriptedProvider – canned replies for deterministic tests
// ---------------------------------------------------------------------------

/// Test double returning queued replies in order and recording every prompt
/// it was asked.
#[derive(Debug, Default)]
pub struct ScriptedProvider {
    replies: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: Mutex::new(replies.into_iter().map(Into::into).collect()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Every prompt seen so far, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait::async_trait]
impl ReasoningProvider for ScriptedProvider {
    async fn generate(&self, prompt: &str) -> Result<String> {
        self.prompts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(prompt.to_string());
        self.replies
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .ok_or_else(|| ProviderError::Other("scripted provider ran out of replies".to_string()))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
