//! Spreadsheet transport.
//!
//! The orchestration layer only needs four operations on a tab: fetch the
//! grid, overwrite it, append rows, and rewrite specific rows. Implementations
//! retry transient failures themselves and surface only fatal errors.
mod google;
#[cfg(test)]
pub mod memory;
mod range;

pub use google::GoogleSheetsClient;
pub use range::parse_updated_range;

use anyhow::Result;
use std::collections::BTreeMap;

/// A tab inside a spreadsheet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetTab {
    pub spreadsheet_id: String,
    pub sheet_name: String,
}

impl SheetTab {
    pub fn new(spreadsheet_id: &str, sheet_name: &str) -> Self {
        Self {
            spreadsheet_id: spreadsheet_id.to_string(),
            sheet_name: sheet_name.to_string(),
        }
    }
}

/// Result of an append: the A1 range the remote side actually wrote, if reported.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppendOutcome {
    pub updated_range: Option<String>,
}

pub trait SheetTransport {
    fn fetch_rows(&self, tab: &SheetTab) -> Result<Vec<Vec<String>>>;

    /// Replace the whole tab with `rows` (header included).
    fn overwrite_rows(&self, tab: &SheetTab, rows: &[Vec<String>]) -> Result<()>;

    fn append_rows(&self, tab: &SheetTab, rows: &[Vec<String>]) -> Result<AppendOutcome>;

    /// Rewrite rows addressed by 1-based position.
    fn update_rows(&self, tab: &SheetTab, rows: &BTreeMap<usize, Vec<String>>) -> Result<()>;
}

/// Direct link to a row in the source sheet.
pub fn row_url(spreadsheet_id: &str, sheet_gid: Option<i64>, row_number: usize) -> String {
    let anchor = match sheet_gid {
        Some(gid) => format!("#gid={gid}&range={row_number}:{row_number}"),
        None => format!("#range={row_number}:{row_number}"),
    };
    format!("https://docs.google.com/spreadsheets/d/{spreadsheet_id}/edit{anchor}")
}

/// `=HYPERLINK("url"; "label")` with quotes escaped.
pub fn hyperlink_formula(url: &str, label: &str) -> String {
    let label = if label.is_empty() { url } else { label };
    format!(
        "=HYPERLINK(\"{}\"; \"{}\")",
        url.replace('"', "\"\""),
        label.replace('"', "\"\"")
    )
}

/// Label of a HYPERLINK formula, or the cell text when it is not one.
pub fn cell_label(cell: &str) -> String {
    let trimmed = cell.trim();
    let Some(rest) = trimmed
        .strip_prefix("=HYPERLINK(")
        .and_then(|rest| rest.strip_suffix(')'))
    else {
        return trimmed.to_string();
    };
    let args = split_formula_args(rest);
    match args.get(1).or_else(|| args.first()) {
        Some(label) => label.clone(),
        None => trimmed.to_string(),
    }
}

fn split_formula_args(args: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = args.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            ';' | ',' if !in_quotes => {
                parts.push(current.trim().to_string());
                current.clear();
            }
            _ if in_quotes => current.push(ch),
            _ => {}
        }
    }
    parts.push(current.trim().to_string());
    parts
}
