use super::layout::{
    column_index, CHECK_DATE_HEADER, IDENTIFIER_HEADER, MODEL_HEADER, ROW_NUMBER_HEADER,
};
use crate::sheets::cell_label;
use crate::util::normalize_identifier;
use std::collections::HashMap;

/// Normalized identifier to 1-based destination row.
#[derive(Debug, Clone, Default)]
pub struct OutputRowIndex {
    positions: HashMap<String, usize>,
}

impl OutputRowIndex {
    /// First occurrence wins when the snapshot already holds duplicates.
    pub fn from_snapshot(snapshot: &[Vec<String>]) -> Self {
        let mut index = Self::default();
        let Some(column) = snapshot
            .first()
            .and_then(|header| column_index(header, IDENTIFIER_HEADER))
        else {
            return index;
        };
        for (row_number, row) in (2..).zip(snapshot.iter().skip(1)) {
            let key = normalize_identifier(row.get(column).map(|cell| cell_label(cell)).as_deref());
            if !key.is_empty() {
                index.positions.entry(key).or_insert(row_number);
            }
        }
        index
    }

    pub fn get(&self, key: &str) -> Option<usize> {
        self.positions.get(key).copied()
    }

    pub fn insert(&mut self, key: &str, row: usize) {
        if !key.is_empty() {
            self.positions.insert(key.to_string(), row);
        }
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Recorded {
    check_date: Option<String>,
    model: Option<String>,
}

/// Check date and model last written for each identifier and source row.
#[derive(Debug, Clone, Default)]
pub struct RecordedHistory {
    by_identifier: HashMap<String, Recorded>,
    by_row_number: HashMap<usize, Recorded>,
}

fn cell_at(row: &[String], col: Option<usize>) -> String {
    col.and_then(|idx| row.get(idx)).cloned().unwrap_or_default()
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

impl RecordedHistory {
    /// Read history from a destination snapshot, locating columns by header name.
    pub fn from_snapshot(snapshot: &[Vec<String>]) -> Self {
        let mut history = Self::default();
        let Some(header) = snapshot.first() else {
            return history;
        };
        let Some(check_col) = column_index(header, CHECK_DATE_HEADER) else {
            return history;
        };
        let row_col = column_index(header, ROW_NUMBER_HEADER);
        let id_col = column_index(header, IDENTIFIER_HEADER);
        let model_col = column_index(header, MODEL_HEADER);
        for row in snapshot.iter().skip(1) {
            let recorded = Recorded {
                check_date: non_empty(&cell_at(row, Some(check_col))),
                model: non_empty(&cell_at(row, model_col)),
            };
            if let Ok(source_row) = cell_at(row, row_col).trim().parse::<usize>() {
                history.by_row_number.insert(source_row, recorded.clone());
            }
            let key = normalize_identifier(Some(&cell_label(&cell_at(row, id_col))));
            if !key.is_empty() {
                history.by_identifier.insert(key, recorded);
            }
        }
        history
    }

    /// Identifier first, then the source row number.
    pub fn check_date(&self, identifier: &str, row_number: usize) -> Option<&str> {
        self.by_identifier
            .get(identifier)
            .and_then(|recorded| recorded.check_date.as_deref())
            .or_else(|| {
                self.by_row_number
                    .get(&row_number)
                    .and_then(|recorded| recorded.check_date.as_deref())
            })
    }

    pub fn model(&self, identifier: &str, row_number: usize) -> Option<&str> {
        self.by_identifier
            .get(identifier)
            .and_then(|recorded| recorded.model.as_deref())
            .or_else(|| {
                self.by_row_number
                    .get(&row_number)
                    .and_then(|recorded| recorded.model.as_deref())
            })
    }

    pub fn record(&mut self, identifier: &str, row_number: usize, check_date: &str, model: &str) {
        let recorded = Recorded {
            check_date: non_empty(check_date),
            model: non_empty(model),
        };
        if !identifier.is_empty() {
            self.by_identifier
                .insert(identifier.to_string(), recorded.clone());
        }
        self.by_row_number.insert(row_number, recorded);
    }
}
