//! Chat-completions transport for OpenAI-compatible providers.
use super::provider::ProviderDescriptor;
use crate::config::ResponseFormat;
use serde::Serialize;
use serde_json::{json, Value};
use std::time::Duration;
use ureq::Agent;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// One structured-output request as sent to a provider.
#[derive(Debug, Clone)]
pub struct ChatRequest<'a> {
    pub model: &'a str,
    pub messages: &'a [ChatMessage],
    pub temperature: f32,
    pub max_tokens: u32,
    pub response_format: ResponseFormat,
    pub reasoning_effort: Option<&'a str>,
    pub prompt_cache_key: Option<&'a str>,
}

impl ChatRequest<'_> {
    pub fn to_body(&self) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": self.messages,
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
            "response_format": response_format_body(self.response_format),
        });
        if let Some(effort) = self.reasoning_effort {
            body["reasoning"] = json!({ "effort": effort });
        }
        if let Some(key) = self.prompt_cache_key {
            body["prompt_cache_key"] = json!(key);
        }
        body
    }
}

fn response_format_body(format: ResponseFormat) -> Value {
    match format {
        ResponseFormat::JsonObject => json!({ "type": "json_object" }),
        ResponseFormat::JsonSchema => json!({
            "type": "json_schema",
            "json_schema": {
                "name": "status_verdict",
                "strict": true,
                "schema": super::verdict_schema(),
            }
        }),
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatResponse {
    pub content: String,
    pub finish_reason: Option<String>,
    pub prompt_tokens: Option<u64>,
    pub cached_tokens: Option<u64>,
}

const RETRYABLE_STATUS: [u16; 5] = [429, 500, 502, 503, 504];

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct TransportError {
    pub status: Option<u16>,
    pub message: String,
    /// The request never produced an HTTP response (connect, reset, timeout).
    connection: bool,
}

impl TransportError {
    pub fn new(status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            connection: false,
        }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
            connection: true,
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        if self.status == Some(429) {
            return true;
        }
        let message = self.message.to_lowercase();
        message.contains("rate limit") || message.contains("too many requests")
    }

    /// Worth retrying later: rate limits, gateway/5xx errors, dropped connections.
    pub fn is_transient(&self) -> bool {
        self.connection
            || self.status.is_some_and(|status| RETRYABLE_STATUS.contains(&status))
            || self.is_rate_limited()
    }
}

pub trait ChatTransport: Send + Sync {
    fn complete(
        &self,
        provider: &ProviderDescriptor,
        request: &ChatRequest<'_>,
    ) -> Result<ChatResponse, TransportError>;
}

pub struct HttpChatTransport {
    agent: Agent,
    http_referer: Option<String>,
    x_title: Option<String>,
}

impl HttpChatTransport {
    pub fn new(timeout: Duration, http_referer: Option<String>, x_title: Option<String>) -> Self {
        let agent: Agent = Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .build()
            .into();
        Self {
            agent,
            http_referer,
            x_title,
        }
    }
}

impl ChatTransport for HttpChatTransport {
    fn complete(
        &self,
        provider: &ProviderDescriptor,
        request: &ChatRequest<'_>,
    ) -> Result<ChatResponse, TransportError> {
        let url = format!(
            "{}/chat/completions",
            provider.base_url().trim_end_matches('/')
        );
        let mut builder = self
            .agent
            .post(&url)
            .header("Authorization", format!("Bearer {}", provider.api_key()));
        if let Some(organization) = provider.organization() {
            builder = builder.header("OpenAI-Organization", organization);
        }
        if let Some(referer) = &self.http_referer {
            builder = builder.header("HTTP-Referer", referer);
        }
        if let Some(title) = &self.x_title {
            builder = builder.header("X-Title", title);
        }
        let mut response = builder
            .send_json(request.to_body())
            .map_err(|err| TransportError::connection(format!("LLM request failed: {err}")))?;
        let status = response.status().as_u16();
        let text = response
            .body_mut()
            .read_to_string()
            .map_err(|err| TransportError::new(Some(status), format!("read LLM response: {err}")))?;
        if !(200..300).contains(&status) {
            return Err(TransportError::new(
                Some(status),
                format!("LLM request failed with HTTP {status}: {}", error_message(&text)),
            ));
        }
        parse_chat_response(&text)
    }
}

fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| {
            value
                .pointer("/error/message")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| crate::util::truncate_string(body.trim(), 500))
}

pub fn parse_chat_response(text: &str) -> Result<ChatResponse, TransportError> {
    let value: Value = serde_json::from_str(text).map_err(|err| {
        TransportError::new(None, format!("LLM response envelope is not JSON: {err}"))
    })?;
    let Some(choice) = value
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
    else {
        return Err(TransportError::new(
            None,
            "LLM response does not contain choices",
        ));
    };
    let content = choice
        .pointer("/message/content")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();
    let finish_reason = choice
        .get("finish_reason")
        .and_then(Value::as_str)
        .map(str::to_string);
    Ok(ChatResponse {
        content,
        finish_reason,
        prompt_tokens: value.pointer("/usage/prompt_tokens").and_then(Value::as_u64),
        cached_tokens: value
            .pointer("/usage/prompt_tokens_details/cached_tokens")
            .and_then(Value::as_u64),
    })
}
