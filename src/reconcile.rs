//! Destination reconciliation.
//!
//! Verdicts are staged as they are produced and flushed once per batch. In
//! upsert mode every identifier owns at most one destination row: known rows
//! are rewritten in place, new identifiers are appended and remembered so
//! later batches route to the same row. Without an identifier column the
//! first flush overwrites the sheet and later flushes append.
mod history;
mod layout;

pub use layout::OutputLayout;

use history::{OutputRowIndex, RecordedHistory};

use crate::rows::SourceRow;
use crate::sheets::{parse_updated_range, SheetTab, SheetTransport};
use crate::util::normalize_identifier;
use crate::verdict::Verdict;
use anyhow::{Context, Result};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    UpsertByIdentifier,
    AppendOverwrite,
}

impl WriteMode {
    pub fn for_source(has_identifier: bool) -> Self {
        if has_identifier {
            WriteMode::UpsertByIdentifier
        } else {
            WriteMode::AppendOverwrite
        }
    }
}

/// Where a verdict came from; decides how Check date and Model are filled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    Fresh { model: String },
    Cached,
}

#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub dry_run: bool,
    /// Read the destination even in a dry run (stale check-date detection needs it).
    pub read_history: bool,
    /// Check date stamped on fresh verdicts, `DD.MM.YYYY HH:MM`.
    pub now_label: String,
}

#[derive(Debug, Clone)]
struct PendingRow {
    identifier: String,
    row_number: usize,
    values: Vec<String>,
    check_date: String,
    model: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushStats {
    pub updated: usize,
    pub appended: usize,
}

pub struct ReconciliationEngine<'a> {
    transport: &'a dyn SheetTransport,
    tab: SheetTab,
    layout: OutputLayout,
    mode: WriteMode,
    options: EngineOptions,
    index: OutputRowIndex,
    history: RecordedHistory,
    next_free_row: usize,
    pending: Vec<PendingRow>,
    staged_total: usize,
    wrote_any: bool,
    dry_run_rows: Vec<Vec<String>>,
}

impl<'a> ReconciliationEngine<'a> {
    /// Snapshot the destination, repair its header, and build the row index.
    pub fn prepare(
        transport: &'a dyn SheetTransport,
        tab: SheetTab,
        layout: OutputLayout,
        mode: WriteMode,
        options: EngineOptions,
    ) -> Result<Self> {
        let snapshot = if !options.dry_run || options.read_history {
            transport
                .fetch_rows(&tab)
                .with_context(|| format!("read destination sheet '{}'", tab.sheet_name))?
        } else {
            Vec::new()
        };
        let history = RecordedHistory::from_snapshot(&snapshot);
        let header = layout.header().to_vec();

        let mut index = OutputRowIndex::default();
        if !options.dry_run {
            if snapshot.first() != Some(&header) {
                tracing::info!(sheet = %tab.sheet_name, "rewriting destination header");
                transport
                    .update_rows(&tab, &BTreeMap::from([(1, header)]))
                    .context("update destination header")?;
            }
            if mode == WriteMode::UpsertByIdentifier {
                index = OutputRowIndex::from_snapshot(&snapshot);
                if index.is_empty() && snapshot.len() > 1 {
                    tracing::warn!(
                        sheet = %tab.sheet_name,
                        "destination rows carry no project name; new verdicts will be appended"
                    );
                }
            }
        }
        let next_free_row = snapshot.len().max(1) + 1;
        tracing::debug!(
            snapshot_rows = snapshot.len(),
            indexed = index.len(),
            next_free_row,
            ?mode,
            "destination prepared"
        );
        Ok(Self {
            transport,
            tab,
            layout,
            mode,
            options,
            index,
            history,
            next_free_row,
            pending: Vec::new(),
            staged_total: 0,
            wrote_any: false,
            dry_run_rows: Vec::new(),
        })
    }

    pub fn mode(&self) -> WriteMode {
        self.mode
    }

    /// Check date last recorded for this row, if any.
    pub fn recorded_check_date(&self, row: &SourceRow) -> Option<&str> {
        let identifier = normalize_identifier(row.identifier.as_deref());
        self.history.check_date(&identifier, row.row_number)
    }

    #[cfg(test)]
    pub fn next_free_row(&self) -> usize {
        self.next_free_row
    }

    pub fn stage(&mut self, row: &SourceRow, verdict: &Verdict, origin: Origin) {
        let identifier = normalize_identifier(row.identifier.as_deref());
        let (check_date, model) = match origin {
            Origin::Fresh { model } => (self.options.now_label.clone(), model),
            Origin::Cached => (
                self.history
                    .check_date(&identifier, row.row_number)
                    .unwrap_or_default()
                    .to_string(),
                self.history
                    .model(&identifier, row.row_number)
                    .unwrap_or_default()
                    .to_string(),
            ),
        };
        let values = self.layout.render(row, verdict, &check_date, &model);
        self.pending.push(PendingRow {
            identifier,
            row_number: row.row_number,
            values,
            check_date,
            model,
        });
        self.staged_total += 1;
    }

    /// Write everything staged since the previous flush as one unit.
    pub fn flush(&mut self) -> Result<FlushStats> {
        if self.pending.is_empty() {
            return Ok(FlushStats::default());
        }
        let pending = std::mem::take(&mut self.pending);
        if self.options.dry_run {
            for row in &pending {
                self.remember(row);
            }
            self.dry_run_rows
                .extend(pending.into_iter().map(|row| row.values));
            return Ok(FlushStats::default());
        }
        let stats = match self.mode {
            WriteMode::UpsertByIdentifier => self.flush_upsert(pending)?,
            WriteMode::AppendOverwrite => self.flush_append(pending)?,
        };
        self.wrote_any = true;
        Ok(stats)
    }

    fn flush_upsert(&mut self, pending: Vec<PendingRow>) -> Result<FlushStats> {
        let mut updates: BTreeMap<usize, PendingRow> = BTreeMap::new();
        let mut appends: Vec<PendingRow> = Vec::new();
        let mut append_slots: HashMap<String, usize> = HashMap::new();
        for row in pending {
            if let Some(position) = self.index.get(&row.identifier) {
                updates.insert(position, row);
                continue;
            }
            if !row.identifier.is_empty() {
                if let Some(&slot) = append_slots.get(&row.identifier) {
                    appends[slot] = row;
                    continue;
                }
                append_slots.insert(row.identifier.clone(), appends.len());
            }
            appends.push(row);
        }

        if !updates.is_empty() {
            let values: BTreeMap<usize, Vec<String>> = updates
                .iter()
                .map(|(position, row)| (*position, row.values.clone()))
                .collect();
            self.transport
                .update_rows(&self.tab, &values)
                .context("update destination rows")?;
            for row in updates.values() {
                self.remember(row);
            }
            tracing::info!(rows = updates.len(), "updated existing destination rows");
        }

        if !appends.is_empty() {
            let values: Vec<Vec<String>> = appends.iter().map(|row| row.values.clone()).collect();
            let outcome = self
                .transport
                .append_rows(&self.tab, &values)
                .context("append destination rows")?;
            let start = self.reconcile_append(outcome.updated_range.as_deref(), appends.len());
            for (position, row) in (start..).zip(&appends) {
                self.index.insert(&row.identifier, position);
                self.remember(row);
            }
            tracing::info!(rows = appends.len(), start, "appended destination rows");
        }
        Ok(FlushStats {
            updated: updates.len(),
            appended: appends.len(),
        })
    }

    /// First row of an append, preferring the range the sheet reports.
    fn reconcile_append(&mut self, updated_range: Option<&str>, count: usize) -> usize {
        let predicted = self.next_free_row;
        let (start, end) = match updated_range.and_then(parse_updated_range) {
            Some((start, end)) => {
                if end + 1 - start != count {
                    tracing::warn!(
                        range = updated_range.unwrap_or_default(),
                        count,
                        "append range does not match row count"
                    );
                }
                if start != predicted {
                    tracing::info!(predicted, actual = start, "destination grew during run");
                }
                (start, start + count - 1)
            }
            None => {
                tracing::warn!(
                    range = updated_range.unwrap_or_default(),
                    predicted,
                    "append did not report a usable range; assuming predicted rows"
                );
                (predicted, predicted + count - 1)
            }
        };
        self.next_free_row = self.next_free_row.max(end + 1);
        start
    }

    fn flush_append(&mut self, pending: Vec<PendingRow>) -> Result<FlushStats> {
        let rows: Vec<Vec<String>> = pending.iter().map(|row| row.values.clone()).collect();
        if self.wrote_any {
            self.transport
                .append_rows(&self.tab, &rows)
                .context("append destination rows")?;
            tracing::info!(rows = rows.len(), "appended result rows");
        } else {
            let mut table = Vec::with_capacity(rows.len() + 1);
            table.push(self.layout.header().to_vec());
            table.extend(rows.iter().cloned());
            self.transport
                .overwrite_rows(&self.tab, &table)
                .context("overwrite destination sheet")?;
            tracing::info!(rows = rows.len(), "wrote result rows");
        }
        for row in &pending {
            self.remember(row);
        }
        Ok(FlushStats {
            updated: 0,
            appended: rows.len(),
        })
    }

    fn remember(&mut self, row: &PendingRow) {
        self.history
            .record(&row.identifier, row.row_number, &row.check_date, &row.model);
    }

    /// Called once after the last batch. A run that produced nothing still
    /// leaves the destination with a current header.
    pub fn finish(&mut self) -> Result<()> {
        self.flush()?;
        if self.options.dry_run || self.staged_total > 0 {
            return Ok(());
        }
        let header = self.layout.header().to_vec();
        match self.mode {
            WriteMode::UpsertByIdentifier => {
                tracing::info!("no rows produced; ensuring destination header");
                self.transport
                    .update_rows(&self.tab, &BTreeMap::from([(1, header)]))
                    .context("update destination header")?;
            }
            WriteMode::AppendOverwrite => {
                tracing::info!("no rows produced; clearing destination to header");
                self.transport
                    .overwrite_rows(&self.tab, &[header])
                    .context("clear destination sheet")?;
            }
        }
        Ok(())
    }

    /// Header plus every row a dry run would have written.
    pub fn dry_run_table(&self) -> Vec<Vec<String>> {
        let mut table = Vec::with_capacity(self.dry_run_rows.len() + 1);
        table.push(self.layout.header().to_vec());
        table.extend(self.dry_run_rows.iter().cloned());
        table
    }
}

#[cfg(test)]
#[path = "reconcile_tests.rs"]
mod tests;
