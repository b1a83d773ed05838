//! CLI argument parsing.
use clap::Parser;
use std::path::PathBuf;

/// Audit status rows with an LLM and write verdicts to a destination sheet.
#[derive(Parser, Debug)]
#[command(
    name = "status-audit",
    version,
    about = "Validate project status updates with an LLM",
    after_help = "Examples:\n  status-audit --config config.yaml\n  status-audit --config config.yaml --limit 20 --dry-run\n  status-audit --config config.yaml --checkdate --workers 4"
)]
pub struct Args {
    /// Path to the YAML configuration file
    #[arg(long, value_name = "PATH")]
    pub config: PathBuf,

    /// Process at most N source rows
    #[arg(long, value_name = "N")]
    pub limit: Option<usize>,

    /// Compute verdicts and print them as JSON instead of writing the destination
    #[arg(long)]
    pub dry_run: bool,

    /// Ignore cached verdicts for every row
    #[arg(long)]
    pub force: bool,

    /// Revalidate rows whose Check date is missing, unreadable, or (one per run) before this week
    #[arg(long)]
    pub checkdate: bool,

    /// Enable debug logging
    #[arg(long)]
    pub verbose: bool,

    /// Parallel LLM workers (overrides the config value)
    #[arg(long, value_name = "N")]
    pub workers: Option<usize>,
}
