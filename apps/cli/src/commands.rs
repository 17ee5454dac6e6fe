//! CLI command definitions, routing, and tracing setup.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use confmap_core::dedupe::repair_duplicates;
use confmap_core::pipeline::{
    BatchOptions, BatchReport, CategoryReport, PipelineContext, ProgressReporter, Stage,
    run_batch,
};
use confmap_geocoder::NominatimGeocoder;
use confmap_shared::{
    AppConfig, Category, CrawlConfig, DatabaseConfig, GeocoderConfig, init_config, load_config,
    load_config_from,
};
use confmap_storage::Storage;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// confmap: crawl, geocode and store academic conference listings.
#[derive(Parser)]
#[command(
    name = "confmap",
    version,
    about = "Crawl conference listings into a geocoded, per-category catalog.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file (defaults to ~/.confmap/confmap.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Database file or libsql:// URL, overriding [database].url.
    #[arg(long, env = "CONFMAP_DATABASE", global = true)]
    pub database: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Category selection shared by the pipeline commands.
#[derive(Args, Debug)]
pub(crate) struct CategoryArgs {
    /// Category label to process (repeatable). Defaults to every category.
    #[arg(short, long = "category")]
    pub categories: Vec<String>,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Crawl and clean categories, then store accepted conferences.
    Run {
        #[command(flatten)]
        select: CategoryArgs,

        /// Categories processed concurrently.
        #[arg(short, long)]
        workers: Option<u32>,

        /// Maximum listing pages per category.
        #[arg(long)]
        max_pages: Option<u32>,

        /// Remove stored duplicate names before writing.
        #[arg(long)]
        repair_duplicates: bool,

        /// Print the batch report as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Crawl categories and store raw rows only.
    Crawl {
        #[command(flatten)]
        select: CategoryArgs,

        /// Categories processed concurrently.
        #[arg(short, long)]
        workers: Option<u32>,

        /// Maximum listing pages per category.
        #[arg(long)]
        max_pages: Option<u32>,
    },

    /// Clean the latest stored crawl of each category.
    Clean {
        #[command(flatten)]
        select: CategoryArgs,

        /// Categories processed concurrently.
        #[arg(short, long)]
        workers: Option<u32>,
    },

    /// Remove duplicate conference names from cleaned tables.
    Dedupe {
        #[command(flatten)]
        select: CategoryArgs,
    },

    /// List categories that have a cleaned table.
    Categories,

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "confmap=info",
        1 => "confmap=debug",
        _ => "confmap=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };
    if let Some(database) = &cli.database {
        config.database.url = database.clone();
    }

    match cli.command {
        Command::Run {
            select,
            workers,
            max_pages,
            repair_duplicates,
            json,
        } => {
            if let Some(n) = max_pages {
                config.crawl.max_pages = n;
            }
            let options = BatchOptions {
                stage: Stage::Full,
                workers: resolve_workers(&config, workers),
                repair_duplicates: repair_duplicates || config.pipeline.repair_duplicates,
            };
            cmd_pipeline(config, &select, options, json).await
        }
        Command::Crawl {
            select,
            workers,
            max_pages,
        } => {
            if let Some(n) = max_pages {
                config.crawl.max_pages = n;
            }
            let options = BatchOptions {
                stage: Stage::Crawl,
                workers: resolve_workers(&config, workers),
                repair_duplicates: false,
            };
            cmd_pipeline(config, &select, options, false).await
        }
        Command::Clean { select, workers } => {
            let options = BatchOptions {
                stage: Stage::Clean,
                workers: resolve_workers(&config, workers),
                repair_duplicates: config.pipeline.repair_duplicates,
            };
            cmd_pipeline(config, &select, options, false).await
        }
        Command::Dedupe { select } => cmd_dedupe(config, &select).await,
        Command::Categories => cmd_categories(config).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show(&config).await,
        },
    }
}

fn resolve_workers(config: &AppConfig, flag: Option<u32>) -> usize {
    flag.unwrap_or(config.pipeline.workers) as usize
}

/// Connect to storage and make sure every configured category is known.
async fn open_storage(config: &AppConfig) -> Result<Storage> {
    config.validate()?;
    let storage = Storage::connect(&DatabaseConfig::from_app(config)?).await?;
    let added = storage.seed_categories(&config.category_list()?).await?;
    if added > 0 {
        info!(added, "seeded categories");
    }
    Ok(storage)
}

/// Resolve `--category` flags against the stored category list.
async fn select_categories(storage: &Storage, select: &CategoryArgs) -> Result<Vec<Category>> {
    let known = storage.list_categories().await?;
    if select.categories.is_empty() {
        return Ok(known);
    }

    select
        .categories
        .iter()
        .map(|wanted| {
            known
                .iter()
                .find(|c| c.label().eq_ignore_ascii_case(wanted.trim()))
                .cloned()
                .ok_or_else(|| eyre!("unknown category '{wanted}'; see `confmap config show`"))
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_pipeline(
    config: AppConfig,
    select: &CategoryArgs,
    options: BatchOptions,
    json: bool,
) -> Result<()> {
    if options.workers == 0 {
        return Err(eyre!("--workers must be at least 1"));
    }

    let storage = Arc::new(open_storage(&config).await?);
    let categories = select_categories(&storage, select).await?;
    let geocoder = Arc::new(NominatimGeocoder::new(&GeocoderConfig::from(&config))?);
    let ctx = Arc::new(PipelineContext::new(
        storage,
        geocoder,
        CrawlConfig::from(&config),
    ));

    info!(
        categories = categories.len(),
        stage = ?options.stage,
        workers = options.workers,
        "starting pipeline"
    );

    let reporter = Arc::new(CliProgress::new());
    let report = run_batch(ctx, categories, options, reporter).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_summary(&report);
    }
    Ok(())
}

async fn cmd_dedupe(config: AppConfig, select: &CategoryArgs) -> Result<()> {
    let storage = open_storage(&config).await?;
    let categories = select_categories(&storage, select).await?;
    let removed = repair_duplicates(&storage, &categories).await?;

    println!();
    for (category, count) in &removed {
        if *count > 0 {
            println!("  {:<28} {count} removed", category.label());
        }
    }
    let total: u64 = removed.iter().map(|(_, n)| n).sum();
    println!("  {total} duplicate rows removed across {} categories", removed.len());
    println!();
    Ok(())
}

async fn cmd_categories(config: AppConfig) -> Result<()> {
    let storage = open_storage(&config).await?;
    for slug in storage.list_cleaned_categories().await? {
        println!("{}", slug.replace('_', " "));
    }
    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show(config: &AppConfig) -> Result<()> {
    let toml_str = toml::to_string_pretty(config)?;
    println!("{toml_str}");
    Ok(())
}

fn print_summary(report: &BatchReport) {
    println!();
    println!(
        "  {:<28} {:>5} {:>6} {:>8} {:>7} {:>9} {:>8} {:>7}  status",
        "category", "pages", "rows", "accepted", "no_loc", "bad_dates", "inserted", "skipped"
    );
    for c in &report.categories {
        let status = if c.failed {
            c.errors.last().map(String::as_str).unwrap_or("failed")
        } else if c.errors.is_empty() {
            "ok"
        } else {
            "ok (with warnings)"
        };
        println!(
            "  {:<28} {:>5} {:>6} {:>8} {:>7} {:>9} {:>8} {:>7}  {status}",
            c.category,
            c.pages_fetched,
            c.raw_rows,
            c.validation.accepted,
            c.validation.no_location,
            c.validation.bad_dates,
            c.written.inserted,
            c.written.skipped,
        );
    }
    println!();
    println!(
        "  {} categories, {} failed, {} inserted in {:.1}s",
        report.categories.len(),
        report.failed().count(),
        report.total_inserted(),
        report.elapsed.as_secs_f64()
    );
    println!();
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .expect("static progress template")
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, category: &Category, name: &str) {
        self.spinner.set_message(format!("{name} {category}"));
    }

    fn category_done(&self, report: &CategoryReport) {
        let mark = if report.failed { "✗" } else { "✓" };
        self.spinner.println(format!(
            "{mark} {} ({} accepted, {} inserted)",
            report.category, report.validation.accepted, report.written.inserted
        ));
    }

    fn done(&self, _report: &BatchReport) {
        self.spinner.finish_and_clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_run_flags() {
        let cli = Cli::try_parse_from([
            "confmap",
            "run",
            "--category",
            "robotics",
            "-c",
            "machine learning",
            "--workers",
            "4",
            "--repair-duplicates",
        ])
        .unwrap();

        match cli.command {
            Command::Run {
                select,
                workers,
                repair_duplicates,
                ..
            } => {
                assert_eq!(select.categories, vec!["robotics", "machine learning"]);
                assert_eq!(workers, Some(4));
                assert!(repair_duplicates);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli =
            Cli::try_parse_from(["confmap", "categories", "--database", "/tmp/x.db", "-vv"])
                .unwrap();
        assert_eq!(cli.database.as_deref(), Some("/tmp/x.db"));
        assert_eq!(cli.verbose, 2);
    }

    #[tokio::test]
    async fn unknown_category_is_rejected() {
        let path = std::env::temp_dir().join(format!("confmap_cli_{}.db", uuid::Uuid::now_v7()));
        let storage = Storage::open(&path).await.unwrap();
        storage
            .seed_categories(&[Category::new("robotics").unwrap()])
            .await
            .unwrap();

        let picked = select_categories(
            &storage,
            &CategoryArgs {
                categories: vec!["Robotics".into()],
            },
        )
        .await
        .unwrap();
        assert_eq!(picked[0].label(), "robotics");

        let err = select_categories(
            &storage,
            &CategoryArgs {
                categories: vec!["robotics; drop table".into()],
            },
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("unknown category"));
    }
}
