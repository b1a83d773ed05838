//! Chat prompt assembly.
//!
//! Static content (instructions, rules, allowed statuses) comes first and the
//! row data last, so providers with prefix caching can reuse the shared part.
use crate::lm::ChatMessage;
use crate::rows::SourceRow;
use crate::util::sha256_hex;
use serde_json::json;

const SYSTEM_PROMPT: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/prompts/system.md"));
const RULES_PROMPT: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/prompts/rules.md"));
const ROW_PROMPT: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/prompts/row.md"));
const RULES_ACK: &str = "Understood the validation rules. Ready to check the row data.";

/// Everything about a prompt that stays the same for a whole run.
#[derive(Debug, Clone)]
pub struct PromptContext {
    rules_text: String,
    allowed_statuses: Vec<String>,
    language: String,
    cache_key: String,
}

impl PromptContext {
    pub fn new(rules_text: &str, allowed_statuses: &[String], language: &str) -> Self {
        Self {
            rules_text: rules_text.to_string(),
            allowed_statuses: allowed_statuses.to_vec(),
            language: language.to_string(),
            cache_key: prompt_cache_key(rules_text, allowed_statuses),
        }
    }

    pub fn cache_key(&self) -> &str {
        &self.cache_key
    }

    pub fn messages(&self, row: &SourceRow) -> Vec<ChatMessage> {
        let allowed = if self.allowed_statuses.is_empty() {
            "(constraints not provided)".to_string()
        } else {
            self.allowed_statuses.join("; ")
        };
        let system = SYSTEM_PROMPT.replace("{language}", &self.language);
        let rules = RULES_PROMPT
            .replace("{rules_text}", self.rules_text.trim())
            .replace("{allowed_statuses}", &allowed);
        let row_data = json!({
            "status_value": row.status_text,
            "comment": row.comment_text,
            "completion_date": row.completion_date,
        });
        let row_json =
            serde_json::to_string_pretty(&row_data).unwrap_or_else(|_| row_data.to_string());
        let data = ROW_PROMPT
            .replace("{language}", &self.language)
            .replace("{row_json}", &row_json);
        vec![
            ChatMessage::system(system.trim()),
            ChatMessage::user(rules.trim()),
            ChatMessage::assistant(RULES_ACK),
            ChatMessage::user(data.trim()),
        ]
    }
}

/// `rules_<16 hex>` derived from the rules and the sorted status list.
pub fn prompt_cache_key(rules_text: &str, allowed_statuses: &[String]) -> String {
    let mut statuses = allowed_statuses.to_vec();
    statuses.sort();
    let combined = format!("{rules_text}\n---\n{}", statuses.join(";"));
    let digest = sha256_hex(combined.as_bytes());
    format!("rules_{}", &digest[..16])
}
