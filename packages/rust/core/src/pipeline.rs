//! Per-category pipeline: crawl → parse → geocode → validate → persist.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

use confmap_crawler::ListingCrawler;
use confmap_geocoder::Geocoder;
use confmap_shared::{Category, ConfMapError, CrawlConfig, RawRow, Result};
use confmap_storage::{CrawlRunStats, Storage, WriteStats};

use crate::dedupe::retain_first_by_name;
use crate::geo::{GeoResolver, LayeredGeoCache};
use crate::parser::parse_rows;
use crate::validator::{ValidationStats, Validator, Verdict};

/// Shared handles every category task works with.
pub struct PipelineContext {
    pub storage: Arc<Storage>,
    pub resolver: GeoResolver,
    pub crawl: CrawlConfig,
}

impl PipelineContext {
    /// Build a context whose geocode cache is memory layered over storage.
    pub fn new(storage: Arc<Storage>, geocoder: Arc<dyn Geocoder>, crawl: CrawlConfig) -> Self {
        let cache = Arc::new(LayeredGeoCache::new(storage.clone()));
        Self {
            storage,
            resolver: GeoResolver::new(cache, geocoder),
            crawl,
        }
    }
}

/// Which part of the pipeline to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Crawl, then clean the freshly crawled rows.
    Full,
    /// Crawl and store raw rows only.
    Crawl,
    /// Clean the latest stored crawl.
    Clean,
}

/// Options for one batch over several categories.
#[derive(Debug, Clone, Copy)]
pub struct BatchOptions {
    pub stage: Stage,
    /// Categories processed at once.
    pub workers: usize,
    /// Remove stored duplicate names before writing.
    pub repair_duplicates: bool,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            stage: Stage::Full,
            workers: 1,
            repair_duplicates: false,
        }
    }
}

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when a category enters a new phase.
    fn phase(&self, category: &Category, name: &str);
    /// Called when a category finishes, successfully or not.
    fn category_done(&self, report: &CategoryReport);
    /// Called once the whole batch completes.
    fn done(&self, report: &BatchReport);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _category: &Category, _name: &str) {}
    fn category_done(&self, _report: &CategoryReport) {}
    fn done(&self, _report: &BatchReport) {}
}

/// What happened to one category.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CategoryReport {
    pub category: String,
    pub pages_fetched: u32,
    pub raw_rows: usize,
    pub candidates: usize,
    pub boundaries: usize,
    pub validation: ValidationStats,
    pub geo_errors: usize,
    pub in_batch_duplicates: usize,
    pub written: WriteStats,
    pub duplicates_removed: u64,
    /// Non-fatal problems, including the error that failed the category.
    pub errors: Vec<String>,
    pub failed: bool,
    pub elapsed: Duration,
}

impl CategoryReport {
    fn new(category: &Category) -> Self {
        Self {
            category: category.label().to_string(),
            ..Self::default()
        }
    }

    fn fail(&mut self, error: impl ToString) {
        self.failed = true;
        self.errors.push(error.to_string());
    }
}

/// Reports for every category in a batch, in input order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub categories: Vec<CategoryReport>,
    pub elapsed: Duration,
}

impl BatchReport {
    pub fn failed(&self) -> impl Iterator<Item = &CategoryReport> {
        self.categories.iter().filter(|c| c.failed)
    }

    pub fn total_inserted(&self) -> u64 {
        self.categories.iter().map(|c| c.written.inserted).sum()
    }
}

/// Process categories, `options.workers` at a time.
///
/// A category that fails is recorded in its report and the batch moves on.
/// A fatal error (see [`ConfMapError::is_fatal`]) stops the batch and is
/// returned.
#[instrument(skip_all, fields(categories = categories.len(), workers = options.workers))]
pub async fn run_batch(
    ctx: Arc<PipelineContext>,
    categories: Vec<Category>,
    options: BatchOptions,
    progress: Arc<dyn ProgressReporter>,
) -> Result<BatchReport> {
    let start = Instant::now();
    let total = categories.len();
    let mut reports: Vec<Option<CategoryReport>> = vec![None; total];

    info!(stage = ?options.stage, "starting batch");

    if options.workers <= 1 {
        for (index, category) in categories.iter().cloned().enumerate() {
            let report = spawn_category(ctx.clone(), category, options, progress.clone()).await?;
            reports[index] = Some(report);
        }
    } else {
        let semaphore = Arc::new(Semaphore::new(options.workers));
        let mut tasks = JoinSet::new();
        for (index, category) in categories.iter().cloned().enumerate() {
            let ctx = ctx.clone();
            let progress = progress.clone();
            let semaphore = semaphore.clone();
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                (index, spawn_category(ctx, category, options, progress).await)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, Ok(report))) => reports[index] = Some(report),
                Ok((_, Err(e))) => {
                    tasks.abort_all();
                    return Err(e);
                }
                // The slot stays empty and is reported below.
                Err(e) => warn!(error = %e, "batch task ended without a report"),
            }
        }
    }

    let report = BatchReport {
        categories: fill_missing_reports(reports, &categories, progress.as_ref()),
        elapsed: start.elapsed(),
    };

    info!(
        categories = report.categories.len(),
        failed = report.failed().count(),
        inserted = report.total_inserted(),
        elapsed_ms = report.elapsed.as_millis(),
        "batch complete"
    );
    progress.done(&report);
    Ok(report)
}

/// Run one category on its own task so a panic only fails that category.
async fn spawn_category(
    ctx: Arc<PipelineContext>,
    category: Category,
    options: BatchOptions,
    progress: Arc<dyn ProgressReporter>,
) -> Result<CategoryReport> {
    let task = {
        let category = category.clone();
        let progress = progress.clone();
        tokio::spawn(async move {
            process_category(&ctx, &category, &options, progress.as_ref()).await
        })
    };

    match task.await {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!(%category, error = %e, "category task panicked");
            Ok(task_failure(&category, e, progress.as_ref()))
        }
    }
}

fn task_failure(
    category: &Category,
    error: impl std::fmt::Display,
    progress: &dyn ProgressReporter,
) -> CategoryReport {
    let mut report = CategoryReport::new(category);
    report.fail(format!("task failed: {error}"));
    progress.category_done(&report);
    report
}

/// One report per category in input order; empty slots become failed reports.
fn fill_missing_reports(
    reports: Vec<Option<CategoryReport>>,
    categories: &[Category],
    progress: &dyn ProgressReporter,
) -> Vec<CategoryReport> {
    reports
        .into_iter()
        .zip(categories)
        .map(|(slot, category)| {
            slot.unwrap_or_else(|| task_failure(category, "no report produced", progress))
        })
        .collect()
}

/// Run the configured stages for one category.
///
/// Only fatal errors are returned; anything else marks the report failed.
#[instrument(skip_all, fields(category = %category))]
pub async fn process_category(
    ctx: &PipelineContext,
    category: &Category,
    options: &BatchOptions,
    progress: &dyn ProgressReporter,
) -> Result<CategoryReport> {
    let start = Instant::now();
    let mut report = CategoryReport::new(category);

    match run_stages(ctx, category, options, progress, &mut report).await {
        Ok(()) => {}
        Err(e) if e.is_fatal() => return Err(e),
        Err(e) => {
            warn!(error = %e, "category failed");
            report.fail(e);
        }
    }

    report.elapsed = start.elapsed();
    info!(
        pages = report.pages_fetched,
        rows = report.raw_rows,
        accepted = report.validation.accepted,
        no_location = report.validation.no_location,
        bad_dates = report.validation.bad_dates,
        inserted = report.written.inserted,
        skipped = report.written.skipped,
        failed = report.failed,
        "category complete"
    );
    progress.category_done(&report);
    Ok(report)
}

async fn run_stages(
    ctx: &PipelineContext,
    category: &Category,
    options: &BatchOptions,
    progress: &dyn ProgressReporter,
    report: &mut CategoryReport,
) -> Result<()> {
    if options.repair_duplicates {
        progress.phase(category, "Repairing duplicates");
        report.duplicates_removed = ctx.storage.drop_duplicate_names(category).await?;
    }
    ctx.storage.ensure_category_tables(category).await?;

    match options.stage {
        Stage::Full => {
            progress.phase(category, "Crawling");
            let rows = crawl_category(ctx, category, report).await?;
            progress.phase(category, "Cleaning");
            clean_rows(ctx, category, &rows, report).await
        }
        Stage::Crawl => {
            progress.phase(category, "Crawling");
            crawl_category(ctx, category, report).await.map(|_| ())
        }
        Stage::Clean => {
            progress.phase(category, "Cleaning");
            clean_category(ctx, category, report).await
        }
    }
}

/// Crawl a category and store its rows under a new crawl run.
///
/// A failed crawl is recorded as a failed run with no rows.
async fn crawl_category(
    ctx: &PipelineContext,
    category: &Category,
    report: &mut CategoryReport,
) -> Result<Vec<RawRow>> {
    let crawler = ListingCrawler::new(ctx.crawl.clone())?;
    let run_id = ctx.storage.begin_crawl_run(category).await?;

    match crawler.crawl(category).await {
        Ok(result) => {
            ctx.storage
                .append_raw_rows(category, &run_id, &result.rows)
                .await?;
            ctx.storage
                .finish_crawl_run(
                    &run_id,
                    &CrawlRunStats {
                        pages_fetched: result.pages_fetched,
                        rows: result.rows.len(),
                        error: None,
                    },
                )
                .await?;
            report.pages_fetched = result.pages_fetched;
            report.raw_rows = result.rows.len();
            Ok(result.rows)
        }
        Err(e) => {
            ctx.storage
                .finish_crawl_run(
                    &run_id,
                    &CrawlRunStats {
                        pages_fetched: 0,
                        rows: 0,
                        error: Some(e.to_string()),
                    },
                )
                .await?;
            Err(e)
        }
    }
}

/// Clean the rows of the category's latest completed crawl.
pub async fn clean_category(
    ctx: &PipelineContext,
    category: &Category,
    report: &mut CategoryReport,
) -> Result<()> {
    let rows = ctx.storage.latest_raw_rows(category).await?;
    if rows.is_empty() {
        info!("no completed crawl to clean");
    }
    report.raw_rows = rows.len();
    clean_rows(ctx, category, &rows, report).await
}

/// Parse, geocode, validate, and persist one category's raw rows.
pub async fn clean_rows(
    ctx: &PipelineContext,
    category: &Category,
    rows: &[RawRow],
    report: &mut CategoryReport,
) -> Result<()> {
    let parsed = parse_rows(rows);
    report.candidates = parsed.records.len();
    report.boundaries = parsed.boundaries;

    if let Some(position) = parsed.truncated_at {
        let err = ConfMapError::TruncatedSequence {
            category: category.label().to_string(),
            position,
        };
        warn!(error = %err, kept = parsed.records.len(), "row sequence ended mid-record");
        report.errors.push(err.to_string());
    }

    let mut validator = Validator::new();
    let mut accepted = Vec::new();
    for mut record in parsed.records {
        match ctx.resolver.resolve(&record.location).await {
            Ok(coords) => record.coordinates = coords,
            Err(e @ ConfMapError::GeoLookup { .. }) => {
                warn!(error = %e, "geocoding failed");
                report.geo_errors += 1;
            }
            Err(e) => return Err(e),
        }

        match validator.check(record) {
            Verdict::Accepted(conf) => accepted.push(conf),
            Verdict::Rejected(reason) => debug!(%reason, "record rejected"),
        }
    }
    report.validation = validator.stats();

    let (accepted, dropped) = retain_first_by_name(accepted);
    report.in_batch_duplicates = dropped;
    report.written = ctx.storage.insert_conferences(category, &accepted).await?;
    Ok(())
}
