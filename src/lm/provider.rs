use crate::config::{resolve_value, validate_priorities, LlmConfig, ProviderConfig, ResponseFormat};
use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicBool, Ordering};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// One configured provider endpoint.
///
/// Optional request features (reasoning hints, prompt-cache keys) start
/// enabled when configured and are switched off for the rest of the run the
/// first time the endpoint rejects them.
#[derive(Debug)]
pub struct ProviderDescriptor {
    priority: u32,
    display_name: String,
    model_id: String,
    base_url: String,
    api_key: String,
    organization: Option<String>,
    response_format: ResponseFormat,
    reasoning_effort: Option<String>,
    reasoning_enabled: AtomicBool,
    cache_hint_enabled: AtomicBool,
}

impl ProviderDescriptor {
    pub fn from_config(priority: u32, config: &ProviderConfig) -> Result<Self> {
        let display_name = config
            .name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("provider-{priority}"));
        let model_id = resolve_value(config.model.as_deref(), Some(&config.model_env))
            .ok_or_else(|| {
                anyhow!(
                    "provider {priority} ({display_name}): model is not configured (set model or {})",
                    config.model_env
                )
            })?;
        let api_key = resolve_value(config.api_key.as_deref(), Some(&config.api_key_env))
            .ok_or_else(|| {
                anyhow!(
                    "provider {priority} ({display_name}): API key is not configured (set api_key or {})",
                    config.api_key_env
                )
            })?;
        let base_url = resolve_value(config.base_url.as_deref(), Some(&config.base_url_env))
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let reasoning_effort = config
            .reasoning_effort
            .as_deref()
            .map(str::trim)
            .filter(|effort| !effort.is_empty())
            .map(str::to_string);
        Ok(Self {
            priority,
            display_name,
            model_id,
            base_url,
            api_key,
            organization: config.organization.clone(),
            response_format: config.response_format,
            reasoning_enabled: AtomicBool::new(reasoning_effort.is_some()),
            reasoning_effort,
            cache_hint_enabled: AtomicBool::new(config.prompt_cache),
        })
    }

    pub fn priority(&self) -> u32 {
        self.priority
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn organization(&self) -> Option<&str> {
        self.organization.as_deref()
    }

    pub fn response_format(&self) -> ResponseFormat {
        self.response_format
    }

    /// Reasoning effort to send, unless the endpoint has rejected it.
    pub fn reasoning_effort(&self) -> Option<&str> {
        if self.reasoning_enabled.load(Ordering::Relaxed) {
            self.reasoning_effort.as_deref()
        } else {
            None
        }
    }

    pub fn cache_hint_enabled(&self) -> bool {
        self.cache_hint_enabled.load(Ordering::Relaxed)
    }

    pub fn disable_reasoning(&self) {
        self.reasoning_enabled.store(false, Ordering::Relaxed);
    }

    pub fn disable_cache_hint(&self) {
        self.cache_hint_enabled.store(false, Ordering::Relaxed);
    }
}

/// Build providers in priority order. Any provider missing credentials is fatal.
pub fn build_providers(config: &LlmConfig) -> Result<Vec<ProviderDescriptor>> {
    validate_priorities(&config.providers)?;
    config
        .providers
        .iter()
        .map(|(priority, provider)| ProviderDescriptor::from_config(*priority, provider))
        .collect()
}

#[cfg(test)]
pub fn test_provider(priority: u32, name: &str) -> ProviderDescriptor {
    ProviderDescriptor {
        priority,
        display_name: name.to_string(),
        model_id: format!("{name}-model"),
        base_url: "http://localhost".to_string(),
        api_key: "key".to_string(),
        organization: None,
        response_format: ResponseFormat::JsonObject,
        reasoning_effort: Some("high".to_string()),
        reasoning_enabled: AtomicBool::new(true),
        cache_hint_enabled: AtomicBool::new(true),
    }
}
