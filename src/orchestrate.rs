//! Batch driver.
//!
//! Walks source rows in fixed-size batches. Each row is either skipped,
//! answered from the cache, or sent to the generator; the batch's verdicts are
//! then staged in row order and flushed to the destination as one unit.
mod policy;
mod pool;

pub use policy::{format_check_date, ForcePolicy};

use crate::cache::{CacheKey, ContentAddressedCache};
use crate::config::RateLimitConfig;
use crate::lm::{Generate, Generation, LmError};
use crate::prompt::PromptContext;
use crate::reconcile::{Origin, ReconciliationEngine};
use crate::rows::{SourceRow, SourceTable};
use crate::sheets::row_url;
use crate::util::{duration_ms, normalize_identifier};
use crate::verdict::build_verdict;
use anyhow::{Context, Result};
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

/// Run-wide settings that do not change between batches.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub source_id: String,
    pub sheet_name: String,
    pub source_gid: Option<i64>,
    pub allowed_statuses: Vec<String>,
    pub batch_size: usize,
    pub workers: usize,
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub validated: usize,
    pub cached: usize,
    pub fresh: usize,
    pub failed_rows: Vec<usize>,
    pub skipped_rows: Vec<usize>,
    pub interrupted: bool,
}

pub struct BatchOrchestrator<'a> {
    settings: OrchestratorSettings,
    generator: &'a dyn Generate,
    cache: &'a ContentAddressedCache,
    prompts: &'a PromptContext,
    interrupted: &'a AtomicBool,
}

struct Job<'r> {
    row: &'r SourceRow,
    key: CacheKey,
}

enum RowOutcome<'r> {
    Cached {
        row: &'r SourceRow,
        payload: Map<String, Value>,
    },
    Fresh {
        row: &'r SourceRow,
        generation: Generation,
    },
    Failed {
        row: &'r SourceRow,
        error: LmError,
    },
}

impl RowOutcome<'_> {
    fn row_number(&self) -> usize {
        match self {
            RowOutcome::Cached { row, .. }
            | RowOutcome::Fresh { row, .. }
            | RowOutcome::Failed { row, .. } => row.row_number,
        }
    }
}

impl<'a> BatchOrchestrator<'a> {
    pub fn new(
        settings: OrchestratorSettings,
        generator: &'a dyn Generate,
        cache: &'a ContentAddressedCache,
        prompts: &'a PromptContext,
        interrupted: &'a AtomicBool,
    ) -> Self {
        Self {
            settings,
            generator,
            cache,
            prompts,
            interrupted,
        }
    }

    pub fn run(
        &self,
        table: &SourceTable,
        engine: &mut ReconciliationEngine<'_>,
        policy: &mut ForcePolicy,
    ) -> Result<RunSummary> {
        let mut summary = RunSummary::default();
        let batch_size = self.settings.batch_size.max(1);
        for batch in table.rows.chunks(batch_size) {
            let (Some(first), Some(last)) = (batch.first(), batch.last()) else {
                continue;
            };
            tracing::info!(
                first = first.row_number,
                last = last.row_number,
                "validating rows"
            );

            let mut outcomes = Vec::with_capacity(batch.len());
            let mut jobs = Vec::new();
            for row in batch {
                let identifier = normalize_identifier(row.identifier.as_deref());
                if table.has_identifier && identifier.is_empty() {
                    tracing::warn!(row = row.row_number, "row has no identifier; skipping");
                    summary.skipped_rows.push(row.row_number);
                    continue;
                }
                let key = CacheKey::new(
                    &self.settings.source_id,
                    &self.settings.sheet_name,
                    row.row_number,
                    &row.status_text,
                    &row.comment_text,
                );
                if let Some(reason) = policy.decide(engine.recorded_check_date(row)) {
                    tracing::info!(row = row.row_number, %reason, "forcing revalidation");
                    jobs.push(Job { row, key });
                    continue;
                }
                match self.cache.get(&key) {
                    Ok(Some(payload)) => {
                        tracing::debug!(row = row.row_number, "using cached verdict");
                        outcomes.push(RowOutcome::Cached { row, payload });
                    }
                    Ok(None) => jobs.push(Job { row, key }),
                    Err(err) => {
                        tracing::warn!(
                            row = row.row_number,
                            error = %err,
                            "cache lookup failed; treating as miss"
                        );
                        jobs.push(Job { row, key });
                    }
                }
            }

            outcomes.extend(pool::run_jobs(jobs, self.settings.workers, |job| {
                self.generate_row(job)
            }));
            outcomes.sort_by_key(RowOutcome::row_number);

            for outcome in outcomes {
                self.stage(outcome, engine, &mut summary);
            }
            let stats = engine.flush().context("write batch to destination")?;
            tracing::debug!(updated = stats.updated, appended = stats.appended, "batch flushed");

            if self.interrupted.load(Ordering::SeqCst) {
                tracing::warn!(
                    last_row = last.row_number,
                    "interrupted; stopping after the flushed batch"
                );
                summary.interrupted = true;
                return Ok(summary);
            }
        }
        engine.finish().context("finalize destination")?;
        Ok(summary)
    }

    fn stage(
        &self,
        outcome: RowOutcome<'_>,
        engine: &mut ReconciliationEngine<'_>,
        summary: &mut RunSummary,
    ) {
        let (row, payload, origin) = match outcome {
            RowOutcome::Cached { row, payload } => {
                summary.cached += 1;
                (row, payload, Origin::Cached)
            }
            RowOutcome::Fresh { row, generation } => {
                summary.fresh += 1;
                (
                    row,
                    generation.payload,
                    Origin::Fresh {
                        model: generation.model,
                    },
                )
            }
            RowOutcome::Failed { row, error } => {
                tracing::error!(
                    row = row.row_number,
                    error = %error,
                    "validation failed; skipping row"
                );
                summary.failed_rows.push(row.row_number);
                return;
            }
        };
        let link = row_url(
            &self.settings.source_id,
            self.settings.source_gid,
            row.row_number,
        );
        let verdict = build_verdict(row, &payload, &self.settings.allowed_statuses, link);
        engine.stage(row, &verdict, origin);
        summary.validated += 1;
    }

    /// Generate a verdict for one row and store it in the cache.
    fn generate_row<'r>(&self, job: Job<'r>) -> RowOutcome<'r> {
        let row = job.row;
        match self.generate_with_backoff(row) {
            Ok(generation) => {
                if let Err(err) = self.cache.put(&job.key, &generation.payload) {
                    tracing::warn!(
                        row = row.row_number,
                        error = %err,
                        "failed to store verdict in cache"
                    );
                }
                tracing::debug!(
                    row = row.row_number,
                    provider = %generation.provider,
                    model = %generation.model,
                    "verdict generated"
                );
                RowOutcome::Fresh { row, generation }
            }
            Err(error) => RowOutcome::Failed { row, error },
        }
    }

    /// Calls that failed on transient errors (rate limits, 5xx, dropped
    /// connections) are retried with exponential backoff; this only blocks the
    /// calling worker.
    fn generate_with_backoff(&self, row: &SourceRow) -> Result<Generation, LmError> {
        let messages = self.prompts.messages(row);
        let max_attempts = self.settings.rate_limit.max_attempts.max(1);
        let mut delay = Duration::from_millis(self.settings.rate_limit.base_delay_ms);
        let mut attempt = 1;
        loop {
            match self
                .generator
                .generate(&messages, Some(self.prompts.cache_key()))
            {
                Ok(generation) => return Ok(generation),
                Err(err) if err.transient() && attempt < max_attempts => {
                    tracing::warn!(
                        row = row.row_number,
                        attempt,
                        max_attempts,
                        wait_ms = duration_ms(delay),
                        "transient provider failure; backing off"
                    );
                    thread::sleep(delay);
                    delay *= 2;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
#[path = "orchestrate_tests.rs"]
mod tests;
