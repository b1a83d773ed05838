use crate::rows::SourceRow;
use crate::sheets::hyperlink_formula;
use crate::verdict::Verdict;

pub const ROW_NUMBER_HEADER: &str = "Row Number";
pub const IDENTIFIER_HEADER: &str = "Project name";
pub const CHECK_DATE_HEADER: &str = "Check date";
pub const MODEL_HEADER: &str = "Model";

/// Destination column layout for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLayout {
    include_identifier: bool,
    include_manager: bool,
    header: Vec<String>,
}

impl OutputLayout {
    pub fn new(include_identifier: bool, include_manager: bool) -> Self {
        let mut header = vec![ROW_NUMBER_HEADER];
        header.push(if include_identifier {
            IDENTIFIER_HEADER
        } else {
            "Source URL"
        });
        if include_manager {
            header.push("Project manager");
        }
        header.extend([
            "Status Value",
            "Completion Date",
            "Comment",
            "Is Valid",
            "Issues",
            "Rewrite Suggestion",
            "Raw LLM JSON",
            CHECK_DATE_HEADER,
            MODEL_HEADER,
        ]);
        Self {
            include_identifier,
            include_manager,
            header: header.into_iter().map(str::to_string).collect(),
        }
    }

    pub fn header(&self) -> &[String] {
        &self.header
    }

    pub fn render(
        &self,
        row: &SourceRow,
        verdict: &Verdict,
        check_date: &str,
        model: &str,
    ) -> Vec<String> {
        let mut cells = Vec::with_capacity(self.header.len());
        cells.push(verdict.row_number.to_string());
        if self.include_identifier {
            cells.push(hyperlink_formula(
                &verdict.source_link,
                row.identifier.as_deref().unwrap_or("").trim(),
            ));
        } else {
            cells.push(verdict.source_link.clone());
        }
        if self.include_manager {
            cells.push(row.manager.clone().unwrap_or_default());
        }
        let raw_json = serde_json::to_string_pretty(&verdict.raw_payload)
            .unwrap_or_else(|_| serde_json::Value::Object(verdict.raw_payload.clone()).to_string());
        cells.extend([
            row.status_text.clone(),
            row.completion_date.clone().unwrap_or_default(),
            row.comment_text.clone(),
            if verdict.is_valid { "YES" } else { "NO" }.to_string(),
            verdict.issues_text(),
            verdict.rewrite_suggestion.clone(),
            raw_json,
            check_date.to_string(),
            model.to_string(),
        ]);
        cells
    }
}

/// Position of `name` in a header row, compared trimmed.
pub fn column_index(header: &[String], name: &str) -> Option<usize> {
    header.iter().position(|cell| cell.trim() == name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map, Value};
    use std::collections::BTreeMap;

    fn row() -> SourceRow {
        SourceRow {
            row_number: 3,
            status_text: "At risk".to_string(),
            comment_text: "Blocked on vendor".to_string(),
            completion_date: None,
            identifier: Some(" Apollo ".to_string()),
            manager: Some("Kim".to_string()),
            raw_fields: BTreeMap::new(),
        }
    }

    fn verdict() -> Verdict {
        let payload: Map<String, Value> = json!({"is_valid": false, "issues": ["x"]})
            .as_object()
            .cloned()
            .expect("object");
        Verdict {
            row_number: 3,
            source_link: "https://link".to_string(),
            is_valid: false,
            issues: vec!["No dates".to_string(), "No next steps".to_string()],
            rewrite_suggestion: "Fix it".to_string(),
            raw_payload: payload,
        }
    }

    #[test]
    fn header_depends_on_optional_columns() {
        let with_id = OutputLayout::new(true, true);
        assert_eq!(&with_id.header()[..3], ["Row Number", "Project name", "Project manager"]);
        assert_eq!(with_id.header().len(), 12);

        let plain = OutputLayout::new(false, false);
        assert_eq!(&plain.header()[..3], ["Row Number", "Source URL", "Status Value"]);
        assert_eq!(plain.header().last().map(String::as_str), Some("Model"));
    }

    #[test]
    fn renders_cells_in_header_order() {
        let layout = OutputLayout::new(true, true);
        let cells = layout.render(&row(), &verdict(), "01.06.2025 10:00", "gpt-x");
        assert_eq!(cells.len(), layout.header().len());
        assert_eq!(cells[0], "3");
        assert_eq!(cells[1], "=HYPERLINK(\"https://link\"; \"Apollo\")");
        assert_eq!(cells[2], "Kim");
        assert_eq!(cells[6], "NO");
        assert_eq!(cells[7], "- No dates\n- No next steps");
        assert!(cells[9].contains("\"is_valid\": false"));
        let check = column_index(layout.header(), CHECK_DATE_HEADER).expect("check date column");
        assert_eq!(cells[check], "01.06.2025 10:00");
        let model = column_index(layout.header(), MODEL_HEADER).expect("model column");
        assert_eq!(cells[model], "gpt-x");
    }

    #[test]
    fn source_url_mode_uses_plain_link() {
        let layout = OutputLayout::new(false, false);
        let cells = layout.render(&row(), &verdict(), "", "");
        assert_eq!(cells[1], "https://link");
        assert_eq!(cells[2], "At risk");
    }
}
