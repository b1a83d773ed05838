//! Source row extraction from a raw sheet grid.
use crate::config::ColumnsConfig;
use anyhow::{anyhow, Result};
use std::collections::{BTreeMap, HashMap};

/// One status row read from the source sheet.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceRow {
    /// 1-based sheet row number, header included.
    pub row_number: usize,
    pub status_text: String,
    pub comment_text: String,
    pub completion_date: Option<String>,
    pub identifier: Option<String>,
    pub manager: Option<String>,
    pub raw_fields: BTreeMap<String, String>,
}

/// Rows plus which optional columns were actually found.
#[derive(Debug, Clone, Default)]
pub struct SourceTable {
    pub rows: Vec<SourceRow>,
    pub has_identifier: bool,
    pub has_manager: bool,
}

fn normalize_header(header: &str) -> String {
    header.trim().to_lowercase()
}

fn required_column(header_map: &HashMap<String, usize>, name: &str) -> Result<usize> {
    header_map
        .get(&normalize_header(name))
        .copied()
        .ok_or_else(|| {
            let mut available = header_map.keys().cloned().collect::<Vec<_>>();
            available.sort();
            anyhow!(
                "column '{name}' not found; available columns: {}",
                available.join(", ")
            )
        })
}

fn cell(row: &[String], idx: usize) -> String {
    row.get(idx).cloned().unwrap_or_default()
}

fn optional_column(header_map: &HashMap<String, usize>, name: Option<&str>) -> Option<usize> {
    let name = name?;
    let idx = header_map.get(&normalize_header(name)).copied();
    if idx.is_none() {
        tracing::warn!(column = name, "column not found in source sheet; skipping");
    }
    idx
}

/// Build source rows from the fetched grid.
///
/// Missing required columns are fatal; missing optional columns are ignored.
pub fn build_source_rows(
    values: &[Vec<String>],
    columns: &ColumnsConfig,
    header_row: usize,
    data_start_row: usize,
) -> Result<SourceTable> {
    if header_row < 1 {
        return Err(anyhow!("header_row must be 1 or greater"));
    }
    if data_start_row <= header_row {
        return Err(anyhow!("data_start_row must be greater than header_row"));
    }
    let header_idx = header_row - 1;
    let Some(header) = values.get(header_idx) else {
        return Ok(SourceTable::default());
    };

    let mut header_map = HashMap::new();
    for (idx, name) in header.iter().enumerate() {
        header_map.entry(normalize_header(name)).or_insert(idx);
    }
    let status_idx = required_column(&header_map, &columns.status)?;
    let comment_idx = required_column(&header_map, &columns.comment)?;
    let completion_idx = optional_column(&header_map, columns.completion_date.as_deref());
    let identifier_idx = optional_column(&header_map, columns.identifier.as_deref());
    let manager_idx = optional_column(&header_map, columns.project_manager.as_deref());

    let start = (data_start_row - 1).max(header_idx + 1);
    let rows = values
        .iter()
        .enumerate()
        .skip(start)
        .map(|(absolute_idx, row)| {
            let raw_fields = header
                .iter()
                .enumerate()
                .map(|(idx, name)| (name.clone(), cell(row, idx)))
                .collect();
            SourceRow {
                row_number: absolute_idx + 1,
                status_text: cell(row, status_idx),
                comment_text: cell(row, comment_idx),
                completion_date: completion_idx.map(|idx| cell(row, idx)),
                identifier: identifier_idx.map(|idx| cell(row, idx)),
                manager: manager_idx.map(|idx| cell(row, idx)),
                raw_fields,
            }
        })
        .collect();

    Ok(SourceTable {
        rows,
        has_identifier: identifier_idx.is_some(),
        has_manager: manager_idx.is_some(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn columns() -> ColumnsConfig {
        ColumnsConfig {
            status: "Status".to_string(),
            comment: "Comment".to_string(),
            completion_date: Some("Due".to_string()),
            identifier: Some("Project".to_string()),
            project_manager: Some("Owner".to_string()),
        }
    }

    fn grid(rows: &[&[&str]]) -> Vec<Vec<String>> {
        rows.iter()
            .map(|row| row.iter().map(|cell| cell.to_string()).collect())
            .collect()
    }

    #[test]
    fn extracts_rows_with_sheet_row_numbers() {
        let values = grid(&[
            &["Project", " status ", "COMMENT", "Due"],
            &["Apollo", "Done", "shipped", "01.02.2026"],
            &["Gemini", "At risk"],
        ]);
        let table = build_source_rows(&values, &columns(), 1, 2).expect("build rows");
        assert!(table.has_identifier);
        assert!(!table.has_manager);
        assert_eq!(table.rows.len(), 2);

        let first = &table.rows[0];
        assert_eq!(first.row_number, 2);
        assert_eq!(first.identifier.as_deref(), Some("Apollo"));
        assert_eq!(first.completion_date.as_deref(), Some("01.02.2026"));
        assert_eq!(first.manager, None);

        let second = &table.rows[1];
        assert_eq!(second.row_number, 3);
        assert_eq!(second.comment_text, "");
        assert_eq!(second.raw_fields.get("Due").map(String::as_str), Some(""));
    }

    #[test]
    fn missing_required_column_is_fatal() {
        let values = grid(&[&["Project", "Status"], &["Apollo", "Done"]]);
        let err = build_source_rows(&values, &columns(), 1, 2).expect_err("no comment column");
        assert!(err.to_string().contains("Comment"), "{err}");
    }

    #[test]
    fn honors_header_and_data_offsets() {
        let values = grid(&[
            &["title banner"],
            &["Status", "Comment"],
            &["skip me", ""],
            &["Done", "ok"],
        ]);
        let table = build_source_rows(&values, &columns(), 2, 4).expect("build rows");
        assert_eq!(table.rows.len(), 1);
        assert_eq!(table.rows[0].row_number, 4);
        assert!(!table.has_identifier);
    }

    #[test]
    fn empty_grid_yields_no_rows() {
        let table = build_source_rows(&[], &columns(), 1, 2).expect("build rows");
        assert!(table.rows.is_empty());
    }
}
