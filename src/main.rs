use anyhow::{Context, Result};
use clap::Parser;
use std::process::ExitCode;
use std::sync::atomic::AtomicBool;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

mod cache;
mod cli;
mod config;
mod interrupt;
mod lm;
mod orchestrate;
mod prompt;
mod reconcile;
mod rows;
mod sheets;
mod util;
mod verdict;

use cache::ContentAddressedCache;
use lm::ProviderFallbackClient;
use orchestrate::{
    format_check_date, BatchOrchestrator, ForcePolicy, OrchestratorSettings, RunSummary,
};
use prompt::PromptContext;
use reconcile::{EngineOptions, OutputLayout, ReconciliationEngine, WriteMode};
use sheets::{GoogleSheetsClient, SheetTab, SheetTransport};

const SHEETS_TIMEOUT: Duration = Duration::from_secs(60);

fn main() -> ExitCode {
    let args = cli::Args::parse();
    init_tracing(args.verbose);
    let interrupted = interrupt::install();

    match run(&args, &interrupted) {
        Ok(summary) if summary.interrupted => {
            eprintln!("Interrupted");
            ExitCode::from(interrupt::EXIT_INTERRUPTED)
        }
        Ok(_) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("{err:#}");
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

/// Logs go to stderr so dry-run JSON on stdout stays clean.
fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn run(args: &cli::Args, interrupted: &AtomicBool) -> Result<RunSummary> {
    let config_path = util::expand_home(&args.config)?;
    let config = config::load_config(&config_path)?;
    let workers = args.workers.unwrap_or(config.workers);
    config::validate_workers(workers)?;

    let access_token = config.sheets.resolve_access_token()?;
    let sheets =
        GoogleSheetsClient::new(&config.sheets.api_base_url, access_token, SHEETS_TIMEOUT);
    let generator = ProviderFallbackClient::from_config(&config.llm)?;

    tracing::info!("fetching source rows");
    let source_tab = SheetTab::new(
        &config.sheets.source_spreadsheet_id,
        &config.sheets.source_sheet_name,
    );
    let values = sheets.fetch_rows(&source_tab).context("read source sheet")?;
    let mut table = rows::build_source_rows(
        &values,
        &config.columns,
        config.header_row,
        config.data_start_row,
    )?;
    if let Some(limit) = args.limit {
        table.rows.truncate(limit);
    }
    if table.rows.is_empty() {
        tracing::warn!("no data rows found in the source sheet");
        return Ok(RunSummary::default());
    }

    let cache_path = config.resolved_cache_path(&config_path)?;
    let cache = ContentAddressedCache::open(&cache_path)?;
    tracing::debug!(path = %cache_path.display(), "cache opened");

    let now = chrono::Local::now().naive_local();
    let layout = OutputLayout::new(table.has_identifier, table.has_manager);
    let mut engine = ReconciliationEngine::prepare(
        &sheets,
        SheetTab::new(
            &config.sheets.target_spreadsheet_id,
            &config.sheets.target_sheet_name,
        ),
        layout,
        WriteMode::for_source(table.has_identifier),
        EngineOptions {
            dry_run: args.dry_run,
            read_history: args.checkdate,
            now_label: format_check_date(now),
        },
    )?;
    tracing::info!(
        rows = table.rows.len(),
        mode = ?engine.mode(),
        workers,
        dry_run = args.dry_run,
        "starting validation"
    );

    let prompts = PromptContext::new(
        &config.rules_text,
        &config.allowed_statuses,
        &config.response_language,
    );
    let settings = OrchestratorSettings {
        source_id: config.sheets.source_spreadsheet_id.clone(),
        sheet_name: config.sheets.source_sheet_name.clone(),
        source_gid: config.sheets.source_sheet_gid,
        allowed_statuses: config.allowed_statuses.clone(),
        batch_size: config.batch_size,
        workers,
        rate_limit: config.rate_limit.clone(),
    };
    let mut policy = ForcePolicy::new(args.force, args.checkdate, now);
    let orchestrator = BatchOrchestrator::new(settings, &generator, &cache, &prompts, interrupted);
    let summary = orchestrator.run(&table, &mut engine, &mut policy)?;

    if args.dry_run {
        let output = serde_json::to_string_pretty(&engine.dry_run_table())
            .context("serialize dry-run rows")?;
        println!("{output}");
    }
    report(&summary);
    Ok(summary)
}

fn report(summary: &RunSummary) {
    if !summary.skipped_rows.is_empty() {
        tracing::warn!(
            count = summary.skipped_rows.len(),
            rows = ?summary.skipped_rows,
            "skipped rows without identifier"
        );
    }
    if !summary.failed_rows.is_empty() {
        tracing::warn!(
            count = summary.failed_rows.len(),
            rows = ?summary.failed_rows,
            "rows failed validation"
        );
    }
    tracing::info!(
        validated = summary.validated,
        cached = summary.cached,
        fresh = summary.fresh,
        interrupted = summary.interrupted,
        "run complete"
    );
}
