//! Multi-provider structured-output client.
//!
//! Providers are tried in ascending priority. Each gets `max_retries`
//! attempts; malformed or truncated output is retried with corrective hints
//! appended to the original conversation as system turns. Transient transport
//! failures (rate limits, 5xx, dropped connections) back off and retry the same
//! provider; any other transport failure moves on to the next provider. The call
//! fails only once every provider is exhausted.
mod provider;
mod transport;

pub use provider::{build_providers, ProviderDescriptor};
pub use transport::{ChatMessage, ChatTransport, HttpChatTransport, TransportError};

use crate::config::LlmConfig;
use crate::util::duration_ms;
use serde_json::{json, Map, Value};
use std::fmt;
use std::thread;
use std::time::Duration;

const TRUNCATED_HINT: &str = "Your previous response was cut off before the JSON object was complete. \
Answer again with a shorter JSON object: keep every issue to one sentence and keep rewrite_suggestion brief.";
const INVALID_JSON_HINT: &str = "Your previous response was not a valid JSON object. \
Respond with exactly one JSON object with the keys is_valid, issues and rewrite_suggestion, and nothing else.";
const MINIMAL_JSON_HINT: &str = "This is the last attempt. Return the minimal valid JSON object: \
at most two short issues and a rewrite_suggestion of one sentence.";
const MAX_RETRY_DELAY: Duration = Duration::from_secs(8);
const REJECTION_KEYWORDS: [&str; 5] =
    ["unsupported", "unknown", "not allowed", "invalid", "cannot"];

/// JSON schema of the verdict object every provider must return.
pub fn verdict_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "is_valid": { "type": "boolean" },
            "issues": { "type": "array", "items": { "type": "string" } },
            "rewrite_suggestion": { "type": "string" }
        },
        "required": ["is_valid", "issues", "rewrite_suggestion"],
        "additionalProperties": false
    })
}

/// A parsed verdict object plus the provider that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    pub payload: Map<String, Value>,
    pub provider: String,
    pub model: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProviderFailure {
    pub provider: String,
    pub message: String,
    pub transient: bool,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LmError {
    #[error("All LLM providers failed: {}", FailureList(.0))]
    AllProvidersFailed(Vec<ProviderFailure>),
}

impl LmError {
    pub fn failures(&self) -> &[ProviderFailure] {
        match self {
            LmError::AllProvidersFailed(failures) => failures,
        }
    }

    /// True when any provider gave up on a transient error (rate limit, 5xx,
    /// dropped connection), so the whole call is worth repeating later.
    pub fn transient(&self) -> bool {
        self.failures().iter().any(|failure| failure.transient)
    }
}

struct FailureList<'a>(&'a [ProviderFailure]);

impl fmt::Display for FailureList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, failure) in self.0.iter().enumerate() {
            if idx > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}: {}", failure.provider, failure.message)?;
        }
        Ok(())
    }
}

/// Anything that can turn a prompt into a verdict object.
pub trait Generate: Sync {
    fn generate(
        &self,
        messages: &[ChatMessage],
        prompt_cache_key: Option<&str>,
    ) -> Result<Generation, LmError>;
}

pub struct ProviderFallbackClient {
    providers: Vec<ProviderDescriptor>,
    transport: Box<dyn ChatTransport>,
    max_retries: u32,
    temperature: f32,
    max_tokens: u32,
    retry_delay: Duration,
}

impl ProviderFallbackClient {
    pub fn new(
        providers: Vec<ProviderDescriptor>,
        transport: Box<dyn ChatTransport>,
        config: &LlmConfig,
    ) -> Self {
        Self {
            providers,
            transport,
            max_retries: config.max_retries.max(1),
            temperature: config.temperature,
            max_tokens: config.max_output_tokens,
            retry_delay: Duration::from_millis(config.retry_delay_ms),
        }
    }

    /// Providers from config over HTTP.
    pub fn from_config(config: &LlmConfig) -> anyhow::Result<Self> {
        let providers = build_providers(config)?;
        let transport = HttpChatTransport::new(
            Duration::from_secs(config.request_timeout_secs),
            config.http_referer.clone(),
            config.x_title.clone(),
        );
        Ok(Self::new(providers, Box::new(transport), config))
    }

    #[cfg(test)]
    pub fn providers(&self) -> &[ProviderDescriptor] {
        &self.providers
    }

    fn generate_with_provider(
        &self,
        provider: &ProviderDescriptor,
        messages: &[ChatMessage],
        prompt_cache_key: Option<&str>,
    ) -> Result<Map<String, Value>, TransportError> {
        let max_attempts = self.max_retries;
        let mut conversation = messages.to_vec();
        let mut attempt = 1;
        let mut backoff = self.retry_delay.min(MAX_RETRY_DELAY);
        let mut last_problem = String::new();
        while attempt <= max_attempts {
            let request = transport::ChatRequest {
                model: provider.model_id(),
                messages: &conversation,
                temperature: self.temperature,
                max_tokens: self.max_tokens,
                response_format: provider.response_format(),
                reasoning_effort: provider.reasoning_effort(),
                prompt_cache_key: prompt_cache_key.filter(|_| provider.cache_hint_enabled()),
            };
            let response = match self.transport.complete(provider, &request) {
                Ok(response) => response,
                Err(err) => {
                    if request.reasoning_effort.is_some() && rejects_parameter(&err, "reasoning") {
                        tracing::warn!(
                            provider = provider.display_name(),
                            error = %err,
                            "provider rejected reasoning hint; disabling it"
                        );
                        provider.disable_reasoning();
                        continue;
                    }
                    if request.prompt_cache_key.is_some()
                        && rejects_parameter(&err, "prompt_cache_key")
                    {
                        tracing::warn!(
                            provider = provider.display_name(),
                            error = %err,
                            "provider rejected prompt cache key; disabling it"
                        );
                        provider.disable_cache_hint();
                        continue;
                    }
                    if err.is_transient() && attempt < max_attempts {
                        tracing::warn!(
                            provider = provider.display_name(),
                            attempt,
                            max_attempts,
                            wait_ms = duration_ms(backoff),
                            error = %err,
                            "transient provider error; retrying"
                        );
                        thread::sleep(backoff);
                        backoff = (backoff * 2).min(MAX_RETRY_DELAY);
                        attempt += 1;
                        continue;
                    }
                    return Err(err);
                }
            };
            if let Some(cached_tokens) = response.cached_tokens {
                tracing::debug!(
                    provider = provider.display_name(),
                    prompt_tokens = response.prompt_tokens,
                    cached_tokens,
                    "prompt cache usage"
                );
            }

            let is_final = attempt == max_attempts;
            let hint = match response.finish_reason.as_deref() {
                Some("length") => {
                    last_problem = "response was truncated (finish_reason=length)".to_string();
                    TRUNCATED_HINT
                }
                Some(reason) if reason != "stop" => {
                    return Err(TransportError::new(
                        None,
                        format!("unexpected finish_reason '{reason}'"),
                    ));
                }
                _ => match parse_object(&response.content) {
                    Ok(payload) => return Ok(payload),
                    Err(problem) => {
                        last_problem = problem;
                        INVALID_JSON_HINT
                    }
                },
            };
            if is_final {
                break;
            }
            tracing::info!(
                provider = provider.display_name(),
                attempt,
                max_attempts,
                problem = %last_problem,
                "retrying with corrective hint"
            );
            conversation = with_hints(messages, hint, attempt + 1 == max_attempts);
            attempt += 1;
        }
        Err(TransportError::new(
            None,
            format!("no valid JSON after {max_attempts} attempts: {last_problem}"),
        ))
    }
}

impl Generate for ProviderFallbackClient {
    fn generate(
        &self,
        messages: &[ChatMessage],
        prompt_cache_key: Option<&str>,
    ) -> Result<Generation, LmError> {
        let mut failures = Vec::new();
        for provider in &self.providers {
            match self.generate_with_provider(provider, messages, prompt_cache_key) {
                Ok(payload) => {
                    if !failures.is_empty() {
                        tracing::info!(
                            provider = provider.display_name(),
                            failed_before = failures.len(),
                            "fallback provider succeeded"
                        );
                    }
                    return Ok(Generation {
                        payload,
                        provider: provider.display_name().to_string(),
                        model: provider.model_id().to_string(),
                    });
                }
                Err(err) => {
                    tracing::warn!(
                        provider = provider.display_name(),
                        priority = provider.priority(),
                        error = %err,
                        "provider failed"
                    );
                    failures.push(ProviderFailure {
                        provider: provider.display_name().to_string(),
                        transient: err.is_transient(),
                        message: err.message,
                    });
                }
            }
        }
        Err(LmError::AllProvidersFailed(failures))
    }
}

/// Original messages plus one system turn per corrective hint.
fn with_hints(messages: &[ChatMessage], hint: &str, penultimate: bool) -> Vec<ChatMessage> {
    let mut conversation = messages.to_vec();
    conversation.push(ChatMessage::system(hint));
    if penultimate {
        conversation.push(ChatMessage::system(MINIMAL_JSON_HINT));
    }
    conversation
}

fn rejects_parameter(err: &TransportError, parameter: &str) -> bool {
    let message = err.message.to_lowercase();
    message.contains(parameter)
        && REJECTION_KEYWORDS
            .iter()
            .any(|keyword| message.contains(keyword))
}

fn parse_object(content: &str) -> Result<Map<String, Value>, String> {
    let text = extract_json(content);
    if text.is_empty() {
        return Err("empty response".to_string());
    }
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err("response is JSON but not an object".to_string()),
        Err(err) => Err(format!("invalid JSON: {err}")),
    }
}

/// Strip markdown code fences some models wrap around JSON.
fn extract_json(text: &str) -> &str {
    let text = text.trim();
    if let Some(start) = text.find("```json") {
        let start = start + 7;
        if let Some(end) = text[start..].find("```") {
            return text[start..start + end].trim();
        }
    }
    if let Some(start) = text.find("```") {
        let start = start + 3;
        let start = text[start..]
            .find('\n')
            .map(|i| start + i + 1)
            .unwrap_or(start);
        if let Some(end) = text[start..].find("```") {
            return text[start..start + end].trim();
        }
    }
    text
}

#[cfg(test)]
#[path = "lm_tests.rs"]
mod tests;
