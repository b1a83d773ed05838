//! Run configuration.
//!
//! Loads the YAML config, applies serde defaults, and validates everything that
//! must be fatal before the first row is touched: row numbering, worker bounds,
//! provider priority contiguity, and provider credentials.
use crate::util::resolve_relative;
use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const MAX_WORKERS: usize = 20;
const DEFAULT_CACHE_FILE: &str = "status_audit_cache.sqlite";
const DEFAULT_SHEETS_API: &str = "https://sheets.googleapis.com/v4";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    pub sheets: SheetsConfig,
    pub columns: ColumnsConfig,
    #[serde(default = "default_header_row")]
    pub header_row: usize,
    #[serde(default = "default_data_start_row")]
    pub data_start_row: usize,
    #[serde(default)]
    pub allowed_statuses: Vec<String>,
    pub rules_text: String,
    #[serde(default = "default_language")]
    pub response_language: String,
    pub llm: LlmConfig,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default)]
    pub cache_path: Option<PathBuf>,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SheetsConfig {
    pub source_spreadsheet_id: String,
    pub source_sheet_name: String,
    /// Sheet gid used to build direct row links.
    #[serde(default)]
    pub source_sheet_gid: Option<i64>,
    pub target_spreadsheet_id: String,
    pub target_sheet_name: String,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default = "default_token_env")]
    pub access_token_env: String,
    #[serde(default = "default_sheets_api")]
    pub api_base_url: String,
}

/// Source column names; matched trimmed and case-insensitively.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ColumnsConfig {
    pub status: String,
    pub comment: String,
    #[serde(default)]
    pub completion_date: Option<String>,
    #[serde(default)]
    pub identifier: Option<String>,
    #[serde(default)]
    pub project_manager: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LlmConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// First backoff after a transient provider error; doubles per retry.
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,
    #[serde(default)]
    pub http_referer: Option<String>,
    #[serde(default)]
    pub x_title: Option<String>,
    /// Providers keyed by priority; keys must be exactly `1..=N`.
    pub providers: BTreeMap<u32, ProviderConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderConfig {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_model_env")]
    pub model_env: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_base_url_env")]
    pub base_url_env: String,
    #[serde(default)]
    pub organization: Option<String>,
    /// Optional reasoning effort hint (e.g. "high").
    #[serde(default)]
    pub reasoning_effort: Option<String>,
    #[serde(default = "default_true")]
    pub prompt_cache: bool,
    #[serde(default)]
    pub response_format: ResponseFormat,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseFormat {
    #[default]
    JsonObject,
    JsonSchema,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimitConfig {
    #[serde(default = "default_rate_limit_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_rate_limit_delay")]
    pub base_delay_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_rate_limit_attempts(),
            base_delay_ms: default_rate_limit_delay(),
        }
    }
}

fn default_header_row() -> usize {
    1
}

fn default_data_start_row() -> usize {
    2
}

fn default_language() -> String {
    "Russian".to_string()
}

fn default_batch_size() -> usize {
    10
}

fn default_workers() -> usize {
    1
}

fn default_token_env() -> String {
    "GOOGLE_SHEETS_ACCESS_TOKEN".to_string()
}

fn default_sheets_api() -> String {
    DEFAULT_SHEETS_API.to_string()
}

fn default_max_retries() -> u32 {
    3
}

fn default_max_output_tokens() -> u32 {
    1024
}

fn default_request_timeout() -> u64 {
    60
}

fn default_retry_delay() -> u64 {
    1000
}

fn default_model_env() -> String {
    "OPENAI_MODEL".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_base_url_env() -> String {
    "OPENAI_BASE_URL".to_string()
}

fn default_true() -> bool {
    true
}

fn default_rate_limit_attempts() -> u32 {
    3
}

fn default_rate_limit_delay() -> u64 {
    1000
}

/// Load `.env` files, then parse and validate the YAML config at `path`.
pub fn load_config(path: &Path) -> Result<AppConfig> {
    if !path.is_file() {
        return Err(anyhow!("configuration file not found: {}", path.display()));
    }
    load_env_files(path);
    let text =
        fs::read_to_string(path).with_context(|| format!("read config {}", path.display()))?;
    let config = parse_config(&text)?;
    validate_config(&config)?;
    Ok(config)
}

pub fn parse_config(text: &str) -> Result<AppConfig> {
    if text.trim().is_empty() {
        return Err(anyhow!("configuration file is empty"));
    }
    serde_yaml::from_str(text).context("parse config YAML")
}

/// `.env` in the working directory first, then next to the config file.
/// Neither overrides variables that are already set.
fn load_env_files(config_path: &Path) {
    if let Err(err) = dotenvy::dotenv() {
        if !err.not_found() {
            tracing::warn!(error = %err, "failed to load .env from working directory");
        }
    }
    let Some(dir) = config_path.parent() else {
        return;
    };
    let beside = dir.join(".env");
    if beside.is_file() {
        if let Err(err) = dotenvy::from_path(&beside) {
            tracing::warn!(path = %beside.display(), error = %err, "failed to load .env");
        }
    }
}

pub fn validate_config(config: &AppConfig) -> Result<()> {
    if config.header_row < 1 {
        return Err(anyhow!("header_row must be 1 or greater"));
    }
    if config.data_start_row <= config.header_row {
        return Err(anyhow!("data_start_row must be greater than header_row"));
    }
    if config.batch_size == 0 {
        return Err(anyhow!("batch_size must be greater than 0"));
    }
    validate_workers(config.workers)?;
    if config.columns.status.trim().is_empty() || config.columns.comment.trim().is_empty() {
        return Err(anyhow!("columns.status and columns.comment must be non-empty"));
    }
    if config.llm.max_retries < 1 {
        return Err(anyhow!("llm.max_retries must be 1 or greater"));
    }
    if !(0.0..=2.0).contains(&config.llm.temperature) {
        return Err(anyhow!(
            "llm.temperature must be between 0 and 2 (got {})",
            config.llm.temperature
        ));
    }
    if config.rate_limit.max_attempts < 1 {
        return Err(anyhow!("rate_limit.max_attempts must be 1 or greater"));
    }
    validate_priorities(&config.llm.providers)?;
    Ok(())
}

pub fn validate_workers(workers: usize) -> Result<()> {
    if workers == 0 || workers > MAX_WORKERS {
        return Err(anyhow!(
            "workers must be between 1 and {MAX_WORKERS} (got {workers})"
        ));
    }
    Ok(())
}

/// Priorities must be exactly `1..=N` with no gaps.
pub fn validate_priorities(providers: &BTreeMap<u32, ProviderConfig>) -> Result<()> {
    if providers.is_empty() {
        return Err(anyhow!("llm.providers must define at least one provider"));
    }
    for (expected, priority) in (1u32..).zip(providers.keys()) {
        if *priority != expected {
            let found = providers
                .keys()
                .map(|key| key.to_string())
                .collect::<Vec<_>>()
                .join(", ");
            return Err(anyhow!(
                "llm.providers priorities must be contiguous starting at 1 (found: {found})"
            ));
        }
    }
    Ok(())
}

impl AppConfig {
    /// Cache location, defaulting to a file next to the config.
    pub fn resolved_cache_path(&self, config_path: &Path) -> Result<PathBuf> {
        let base = config_path.parent().unwrap_or_else(|| Path::new("."));
        match &self.cache_path {
            Some(path) => resolve_relative(path, base),
            None => Ok(base.join(DEFAULT_CACHE_FILE)),
        }
    }
}

impl SheetsConfig {
    pub fn resolve_access_token(&self) -> Result<String> {
        resolve_value(
            self.access_token.as_deref(),
            Some(&self.access_token_env),
        )
        .ok_or_else(|| {
            anyhow!(
                "Sheets access token is not configured (set sheets.access_token or {})",
                self.access_token_env
            )
        })
    }
}

/// Explicit value first, then the named environment variable. Blank counts as unset.
pub fn resolve_value(explicit: Option<&str>, env_name: Option<&str>) -> Option<String> {
    if let Some(value) = explicit.map(str::trim).filter(|value| !value.is_empty()) {
        return Some(value.to_string());
    }
    let name = env_name.map(str::trim).filter(|name| !name.is_empty())?;
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
