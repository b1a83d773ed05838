use super::*;
use crate::sheets::cell_label;
use crate::sheets::memory::{MemorySheets, SheetCall};
use serde_json::{json, Map, Value};

const NOW: &str = "09.06.2025 10:00";

fn tab() -> SheetTab {
    SheetTab::new("dest", "Audit")
}

fn source_row(row_number: usize, identifier: Option<&str>) -> SourceRow {
    SourceRow {
        row_number,
        status_text: "On track".to_string(),
        comment_text: format!("comment {row_number}"),
        completion_date: None,
        identifier: identifier.map(str::to_string),
        manager: None,
        raw_fields: Default::default(),
    }
}

fn verdict(row_number: usize) -> Verdict {
    let payload: Map<String, Value> =
        json!({"is_valid": true, "issues": [], "rewrite_suggestion": ""})
            .as_object()
            .cloned()
            .expect("object");
    Verdict {
        row_number,
        source_link: format!("https://src/{row_number}"),
        is_valid: true,
        issues: Vec::new(),
        rewrite_suggestion: String::new(),
        raw_payload: payload,
    }
}

fn fresh() -> Origin {
    Origin::Fresh {
        model: "gpt-new".to_string(),
    }
}

fn options(dry_run: bool) -> EngineOptions {
    EngineOptions {
        dry_run,
        read_history: false,
        now_label: NOW.to_string(),
    }
}

fn upsert_layout() -> OutputLayout {
    OutputLayout::new(true, false)
}

fn header(layout: &OutputLayout) -> Vec<String> {
    layout.header().to_vec()
}

/// A destination row in the upsert layout with the given label and stamps.
fn existing_row(row_number: usize, label: &str, check_date: &str, model: &str) -> Vec<String> {
    let mut row = vec![String::new(); upsert_layout().header().len()];
    row[0] = row_number.to_string();
    row[1] = crate::sheets::hyperlink_formula("https://old", label);
    let last = row.len() - 1;
    row[last - 1] = check_date.to_string();
    row[last] = model.to_string();
    row
}

fn labels(sheets: &MemorySheets) -> Vec<String> {
    sheets
        .rows(&tab())
        .iter()
        .skip(1)
        .map(|row| row.get(1).map(|cell| cell_label(cell)).unwrap_or_default())
        .collect()
}

fn upsert_engine(sheets: &MemorySheets) -> ReconciliationEngine<'_> {
    ReconciliationEngine::prepare(
        sheets,
        tab(),
        upsert_layout(),
        WriteMode::UpsertByIdentifier,
        options(false),
    )
    .expect("prepare engine")
}

#[test]
fn header_is_rewritten_only_when_it_differs() {
    let sheets = MemorySheets::new();
    sheets.set_rows(&tab(), vec![vec!["Old".to_string()]]);
    upsert_engine(&sheets);
    assert_eq!(
        sheets.calls(),
        vec![
            SheetCall::Fetch("Audit".to_string()),
            SheetCall::Update("Audit".to_string(), vec![1]),
        ]
    );
    assert_eq!(sheets.rows(&tab())[0], header(&upsert_layout()));

    sheets.clear_calls();
    upsert_engine(&sheets);
    assert_eq!(sheets.calls(), vec![SheetCall::Fetch("Audit".to_string())]);
}

#[test]
fn known_identifiers_update_in_place_and_new_ones_append() {
    let sheets = MemorySheets::new();
    sheets.set_rows(
        &tab(),
        vec![
            header(&upsert_layout()),
            existing_row(2, "Apollo", "01.06.2025 09:00", "gpt-old"),
        ],
    );
    let mut engine = upsert_engine(&sheets);
    sheets.clear_calls();

    engine.stage(&source_row(2, Some(" APOLLO ")), &verdict(2), fresh());
    engine.stage(&source_row(3, Some("Zeus")), &verdict(3), fresh());
    let stats = engine.flush().expect("flush");
    assert_eq!(stats, FlushStats { updated: 1, appended: 1 });
    assert_eq!(
        sheets.calls(),
        vec![
            SheetCall::Update("Audit".to_string(), vec![2]),
            SheetCall::Append("Audit".to_string(), 1),
        ]
    );
    assert_eq!(engine.next_free_row(), 4);

    // A later batch routes the appended identifier back to its row.
    sheets.clear_calls();
    engine.stage(&source_row(3, Some("zeus")), &verdict(3), fresh());
    engine.flush().expect("flush");
    assert_eq!(
        sheets.calls(),
        vec![SheetCall::Update("Audit".to_string(), vec![3])]
    );
    assert_eq!(labels(&sheets), vec!["APOLLO", "zeus"]);

    let rows = sheets.rows(&tab());
    let last = rows[1].len() - 1;
    assert_eq!(rows[1][last - 1], NOW);
    assert_eq!(rows[1][last], "gpt-new");
}

#[test]
fn repeated_identifier_in_one_batch_appends_once() {
    let sheets = MemorySheets::new();
    let mut engine = upsert_engine(&sheets);
    engine.stage(&source_row(4, Some("Hermes")), &verdict(4), fresh());
    engine.stage(&source_row(9, Some("hermes")), &verdict(9), fresh());
    let stats = engine.flush().expect("flush");
    assert_eq!(stats.appended, 1);
    let rows = sheets.rows(&tab());
    assert_eq!(rows.len(), 2);
    // The later verdict wins.
    assert_eq!(rows[1][0], "9");
}

#[test]
fn append_positions_follow_the_reported_range() {
    let sheets = MemorySheets::new();
    sheets.set_rows(
        &tab(),
        vec![header(&upsert_layout()), existing_row(2, "Apollo", "", "")],
    );
    let mut engine = upsert_engine(&sheets);
    assert_eq!(engine.next_free_row(), 3);

    sheets.insert_foreign_rows_before_next_append(2);
    engine.stage(&source_row(5, Some("Zeus")), &verdict(5), fresh());
    engine.flush().expect("flush");
    assert_eq!(engine.next_free_row(), 6);

    sheets.clear_calls();
    engine.stage(&source_row(5, Some("Zeus")), &verdict(5), fresh());
    engine.flush().expect("flush");
    assert_eq!(
        sheets.calls(),
        vec![SheetCall::Update("Audit".to_string(), vec![5])]
    );
    let rows = sheets.rows(&tab());
    assert_eq!(cell_label(&rows[4][1]), "Zeus");
    assert_eq!(rows[2][0], "foreign-0");
}

#[test]
fn missing_append_range_falls_back_to_prediction() {
    let sheets = MemorySheets::new();
    sheets.set_rows(
        &tab(),
        vec![header(&upsert_layout()), existing_row(2, "Apollo", "", "")],
    );
    sheets.omit_append_range();
    let mut engine = upsert_engine(&sheets);
    engine.stage(&source_row(3, Some("Zeus")), &verdict(3), fresh());
    engine.stage(&source_row(4, Some("Hera")), &verdict(4), fresh());
    engine.flush().expect("flush");
    assert_eq!(engine.next_free_row(), 5);

    sheets.clear_calls();
    engine.stage(&source_row(4, Some("Hera")), &verdict(4), fresh());
    engine.flush().expect("flush");
    assert_eq!(
        sheets.calls(),
        vec![SheetCall::Update("Audit".to_string(), vec![4])]
    );
}

#[test]
fn cached_verdicts_keep_recorded_check_date_and_model() {
    let sheets = MemorySheets::new();
    sheets.set_rows(
        &tab(),
        vec![
            header(&upsert_layout()),
            existing_row(3, "Apollo", "02.06.2025 08:30", "gpt-old"),
        ],
    );
    let mut engine = upsert_engine(&sheets);
    engine.stage(&source_row(3, Some("Apollo")), &verdict(3), Origin::Cached);
    engine.flush().expect("flush");

    let rows = sheets.rows(&tab());
    let last = rows[1].len() - 1;
    assert_eq!(rows[1][last - 1], "02.06.2025 08:30");
    assert_eq!(rows[1][last], "gpt-old");
}

#[test]
fn cached_backfill_falls_back_to_row_number() {
    let layout = OutputLayout::new(false, false);
    let mut snapshot_row = vec![String::new(); layout.header().len()];
    snapshot_row[0] = "7".to_string();
    let last = snapshot_row.len() - 1;
    snapshot_row[last - 1] = "03.06.2025 11:00".to_string();
    snapshot_row[last] = "gpt-old".to_string();

    let sheets = MemorySheets::new();
    sheets.set_rows(&tab(), vec![header(&layout), snapshot_row]);
    let mut engine = ReconciliationEngine::prepare(
        &sheets,
        tab(),
        layout,
        WriteMode::AppendOverwrite,
        options(false),
    )
    .expect("prepare engine");
    engine.stage(&source_row(7, None), &verdict(7), Origin::Cached);
    engine.finish().expect("finish");

    let rows = sheets.rows(&tab());
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[1][last - 1], "03.06.2025 11:00");
    assert_eq!(rows[1][last], "gpt-old");
}

#[test]
fn append_mode_overwrites_first_then_appends() {
    let layout = OutputLayout::new(false, false);
    let sheets = MemorySheets::new();
    sheets.set_rows(&tab(), vec![vec!["stale".to_string()]; 5]);
    let mut engine = ReconciliationEngine::prepare(
        &sheets,
        tab(),
        layout,
        WriteMode::AppendOverwrite,
        options(false),
    )
    .expect("prepare engine");
    sheets.clear_calls();

    engine.stage(&source_row(2, None), &verdict(2), fresh());
    engine.stage(&source_row(3, None), &verdict(3), fresh());
    engine.flush().expect("flush");
    engine.stage(&source_row(4, None), &verdict(4), fresh());
    engine.flush().expect("flush");
    engine.finish().expect("finish");

    assert_eq!(
        sheets.calls(),
        vec![
            SheetCall::Overwrite("Audit".to_string(), 3),
            SheetCall::Append("Audit".to_string(), 1),
        ]
    );
    let rows = sheets.rows(&tab());
    let numbers: Vec<&str> = rows.iter().skip(1).map(|row| row[0].as_str()).collect();
    assert_eq!(numbers, vec!["2", "3", "4"]);
}

#[test]
fn empty_runs_leave_only_a_header() {
    let sheets = MemorySheets::new();
    let layout = OutputLayout::new(false, false);
    sheets.set_rows(&tab(), vec![header(&layout), vec!["old".to_string()]]);
    let mut engine = ReconciliationEngine::prepare(
        &sheets,
        tab(),
        layout.clone(),
        WriteMode::AppendOverwrite,
        options(false),
    )
    .expect("prepare engine");
    engine.finish().expect("finish");
    assert_eq!(sheets.rows(&tab()), vec![header(&layout)]);

    let sheets = MemorySheets::new();
    let mut engine = upsert_engine(&sheets);
    sheets.clear_calls();
    engine.finish().expect("finish");
    assert_eq!(
        sheets.calls(),
        vec![SheetCall::Update("Audit".to_string(), vec![1])]
    );
}

#[test]
fn dry_run_collects_rows_without_touching_the_sheet() {
    let sheets = MemorySheets::new();
    let mut engine = ReconciliationEngine::prepare(
        &sheets,
        tab(),
        upsert_layout(),
        WriteMode::UpsertByIdentifier,
        options(true),
    )
    .expect("prepare engine");
    engine.stage(&source_row(2, Some("Apollo")), &verdict(2), fresh());
    engine.flush().expect("flush");
    engine.finish().expect("finish");

    assert!(sheets.calls().is_empty());
    let table = engine.dry_run_table();
    assert_eq!(table.len(), 2);
    assert_eq!(table[0], header(&upsert_layout()));
}

#[test]
fn rerunning_the_same_verdicts_is_idempotent() {
    let sheets = MemorySheets::new();
    for _ in 0..2 {
        let mut engine = upsert_engine(&sheets);
        engine.stage(&source_row(2, Some("Apollo")), &verdict(2), fresh());
        engine.stage(&source_row(3, Some("Zeus")), &verdict(3), fresh());
        engine.finish().expect("finish");
    }
    assert_eq!(labels(&sheets), vec!["Apollo", "Zeus"]);
}

#[test]
fn recorded_check_date_reads_the_snapshot() {
    let sheets = MemorySheets::new();
    sheets.set_rows(
        &tab(),
        vec![
            header(&upsert_layout()),
            existing_row(2, "Apollo", "02.06.2025 08:30", "gpt-old"),
        ],
    );
    let engine = ReconciliationEngine::prepare(
        &sheets,
        tab(),
        upsert_layout(),
        WriteMode::UpsertByIdentifier,
        EngineOptions {
            read_history: true,
            ..options(true)
        },
    )
    .expect("prepare engine");
    assert_eq!(
        engine.recorded_check_date(&source_row(2, Some("apollo"))),
        Some("02.06.2025 08:30")
    );
    assert_eq!(engine.recorded_check_date(&source_row(9, Some("zeus"))), None);
    assert_eq!(engine.mode(), WriteMode::UpsertByIdentifier);
    // Dry runs read history but never repair the header.
    assert_eq!(sheets.calls(), vec![SheetCall::Fetch("Audit".to_string())]);
}
