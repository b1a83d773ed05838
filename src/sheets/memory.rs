//! In-memory sheet transport for tests.
use super::{AppendOutcome, SheetTab, SheetTransport};
use anyhow::{anyhow, Result};
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SheetCall {
    Fetch(String),
    Overwrite(String, usize),
    Append(String, usize),
    Update(String, Vec<usize>),
}

#[derive(Default)]
struct State {
    tabs: HashMap<String, Vec<Vec<String>>>,
    calls: Vec<SheetCall>,
    /// Rows some other writer slips in right before our next append.
    foreign_rows_before_append: usize,
    omit_append_range: bool,
}

#[derive(Default)]
pub struct MemorySheets {
    state: Mutex<State>,
}

fn tab_key(tab: &SheetTab) -> String {
    format!("{}/{}", tab.spreadsheet_id, tab.sheet_name)
}

impl MemorySheets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_rows(&self, tab: &SheetTab, rows: Vec<Vec<String>>) {
        self.state
            .lock()
            .expect("lock memory sheets")
            .tabs
            .insert(tab_key(tab), rows);
    }

    pub fn rows(&self, tab: &SheetTab) -> Vec<Vec<String>> {
        self.state
            .lock()
            .expect("lock memory sheets")
            .tabs
            .get(&tab_key(tab))
            .cloned()
            .unwrap_or_default()
    }

    pub fn calls(&self) -> Vec<SheetCall> {
        self.state.lock().expect("lock memory sheets").calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().expect("lock memory sheets").calls.clear();
    }

    pub fn insert_foreign_rows_before_next_append(&self, count: usize) {
        self.state
            .lock()
            .expect("lock memory sheets")
            .foreign_rows_before_append = count;
    }

    pub fn omit_append_range(&self) {
        self.state.lock().expect("lock memory sheets").omit_append_range = true;
    }
}

fn used_extent(rows: &[Vec<String>]) -> usize {
    rows.iter()
        .rposition(|row| row.iter().any(|cell| !cell.is_empty()))
        .map(|idx| idx + 1)
        .unwrap_or(0)
}

impl SheetTransport for MemorySheets {
    fn fetch_rows(&self, tab: &SheetTab) -> Result<Vec<Vec<String>>> {
        let mut state = self.state.lock().map_err(|_| anyhow!("poisoned"))?;
        state.calls.push(SheetCall::Fetch(tab.sheet_name.clone()));
        Ok(state.tabs.get(&tab_key(tab)).cloned().unwrap_or_default())
    }

    fn overwrite_rows(&self, tab: &SheetTab, rows: &[Vec<String>]) -> Result<()> {
        let mut state = self.state.lock().map_err(|_| anyhow!("poisoned"))?;
        state
            .calls
            .push(SheetCall::Overwrite(tab.sheet_name.clone(), rows.len()));
        state.tabs.insert(tab_key(tab), rows.to_vec());
        Ok(())
    }

    fn append_rows(&self, tab: &SheetTab, rows: &[Vec<String>]) -> Result<AppendOutcome> {
        let mut state = self.state.lock().map_err(|_| anyhow!("poisoned"))?;
        state
            .calls
            .push(SheetCall::Append(tab.sheet_name.clone(), rows.len()));
        let foreign = std::mem::take(&mut state.foreign_rows_before_append);
        let omit_range = state.omit_append_range;
        let grid = state.tabs.entry(tab_key(tab)).or_default();
        let extent = used_extent(grid);
        grid.truncate(extent);
        for idx in 0..foreign {
            grid.push(vec![format!("foreign-{idx}")]);
        }
        let start = grid.len() + 1;
        grid.extend(rows.iter().cloned());
        let end = grid.len();
        if omit_range {
            return Ok(AppendOutcome::default());
        }
        Ok(AppendOutcome {
            updated_range: Some(format!("'{}'!A{start}:L{end}", tab.sheet_name)),
        })
    }

    fn update_rows(&self, tab: &SheetTab, rows: &BTreeMap<usize, Vec<String>>) -> Result<()> {
        let mut state = self.state.lock().map_err(|_| anyhow!("poisoned"))?;
        state.calls.push(SheetCall::Update(
            tab.sheet_name.clone(),
            rows.keys().copied().collect(),
        ));
        let grid = state.tabs.entry(tab_key(tab)).or_default();
        for (row_number, values) in rows {
            if *row_number < 1 {
                return Err(anyhow!("row numbers must be 1-based; received {row_number}"));
            }
            if grid.len() < *row_number {
                grid.resize(*row_number, Vec::new());
            }
            grid[row_number - 1] = values.clone();
        }
        Ok(())
    }
}
