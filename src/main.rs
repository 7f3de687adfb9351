//! listing-harvester command line.
//!
//! Runs a checkpointed scrape over a target directory, or inspects and clears
//! the checkpoint of a previous run.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Local;
use clap::Parser;
use serde_json::json;

use listing_harvester::config::HarvestConfig;
use listing_harvester::orchestrator::{
    CheckpointManager, DefaultFetcherFactory, HarvestResult, Orchestrator, RunMode, RunSummary,
    ScrapePlan, TargetDirectory, TargetSelection,
};
use listing_harvester::{
    FetchStrategy, ListingExtractor, ListingType, ListingUpsertService, RateLimiter,
    RedbListingStore, ReqwestTransport, TieredProxyPool, default_launcher,
};

/// Workers above this count make browser mode resource-hungry.
const BROWSER_WORKER_WARNING: usize = 3;

#[derive(Parser, Debug)]
#[command(name = "listing-harvester")]
#[command(about = "Checkpointed real-estate listing harvester")]
#[command(version)]
struct Cli {
    /// TOML configuration file
    #[arg(long, env = "HARVEST_CONFIG")]
    config: Option<PathBuf>,

    /// Target directory (.json or .toml)
    #[arg(long, default_value = "data/targets.json")]
    targets_file: PathBuf,

    /// Comma-separated target names (e.g. "Roma,Milano")
    #[arg(long, value_delimiter = ',')]
    targets: Vec<String>,

    /// Scrape every target in the directory
    #[arg(long)]
    all: bool,

    /// Process targets across a worker pool
    #[arg(long)]
    parallel: bool,

    /// Number of parallel workers
    #[arg(long, default_value_t = 10)]
    workers: usize,

    /// Maximum listings kept per target
    #[arg(long, default_value_t = 100)]
    max_listings_per_target: usize,

    /// Limit the number of targets after selection
    #[arg(long)]
    limit: Option<usize>,

    /// Fetch strategy: browser or http
    #[arg(long, default_value = "browser")]
    mode: FetchStrategy,

    /// Listing type: sale or rent (defaults to the configured type)
    #[arg(long)]
    listing_type: Option<ListingType>,

    /// Run the browser visibly (useful for solving challenges by hand)
    #[arg(long)]
    no_headless: bool,

    /// Skip targets completed by a previous run
    #[arg(long)]
    resume: bool,

    /// Only process targets that failed in a previous run
    #[arg(long)]
    retry_failed: bool,

    /// Discard the existing checkpoint before starting
    #[arg(long)]
    clear_checkpoint: bool,

    /// Checkpoint file (overrides the configured path)
    #[arg(long)]
    checkpoint_file: Option<PathBuf>,

    /// Print checkpoint status and exit
    #[arg(long)]
    checkpoint_status: bool,
}

impl Cli {
    fn run_mode(&self) -> RunMode {
        if self.retry_failed {
            RunMode::RetryFailed
        } else if self.resume {
            RunMode::Resume
        } else {
            RunMode::Fresh
        }
    }

    fn selection(&self) -> TargetSelection {
        if self.all {
            TargetSelection::All
        } else if !self.targets.is_empty() {
            TargetSelection::Names(self.targets.clone())
        } else {
            TargetSelection::default()
        }
    }
}

fn init_logging(level: &str) {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] {} - {}",
                Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();
}

fn load_config(cli: &Cli) -> HarvestResult<HarvestConfig> {
    let mut config = match &cli.config {
        Some(path) => HarvestConfig::load(path)?,
        None => HarvestConfig::default(),
    };
    if let Some(path) = &cli.checkpoint_file {
        config.checkpoint.path = path.clone();
    }
    if let Some(listing_type) = cli.listing_type {
        config.scraping.listing_type = listing_type;
    }
    if cli.no_headless {
        config.browser.headless = false;
    }
    Ok(config)
}

fn print_checkpoint_status(checkpoint: &CheckpointManager) {
    let summary = checkpoint.summary();
    log::info!("=== CHECKPOINT STATUS ===");
    log::info!("Started: {}", summary.started_at);
    log::info!("Last updated: {}", summary.updated_at);
    log::info!("Completed targets: {}", summary.completed_count);
    log::info!("Failed targets: {}", summary.failed_count);
    if let Some(target) = &summary.in_progress {
        log::info!("In progress at last save: {target}");
    }
    log::info!("Total scraped: {}", summary.total_scraped);
    log::info!("Total created: {}", summary.total_created);
    log::info!("Total updated: {}", summary.total_updated);
    log::info!("Total delisted: {}", summary.total_delisted);
    if summary.failed_count > 0 {
        let mut failed: Vec<String> = checkpoint.failed().into_iter().collect();
        failed.sort();
        log::info!("Failed targets: {}", failed.join(", "));
    }
}

fn print_run_summary(summary: &RunSummary, checkpoint: &CheckpointManager) {
    log::info!("{}", "=".repeat(50));
    log::info!("SCRAPE SUMMARY");
    log::info!("{}", "=".repeat(50));
    log::info!("Targets processed this run: {}", summary.processed);
    log::info!("  - Successful: {}", summary.successful);
    log::info!("  - No listings found: {}", summary.no_listings);
    log::info!("  - Failed: {}", summary.failed);
    log::info!("Listings scraped: {}", summary.totals.scraped);
    log::info!("  - New listings created: {}", summary.totals.created);
    log::info!("  - Existing listings updated: {}", summary.totals.updated);
    log::info!("  - Listings marked delisted: {}", summary.totals.delisted);
    log::info!("  - Errors: {}", summary.totals.errors);

    let cumulative = checkpoint.summary();
    log::info!("=== CUMULATIVE PROGRESS (from checkpoint) ===");
    log::info!("Total completed targets: {}", cumulative.completed_count);
    log::info!("Total failed targets: {}", cumulative.failed_count);
    log::info!("Total listings scraped: {}", cumulative.total_scraped);
    log::info!("Total new listings: {}", cumulative.total_created);
    log::info!("Total updated listings: {}", cumulative.total_updated);

    if let Some(rate) = summary.success_rate() {
        log::info!("This run success rate: {rate:.1}%");
    }
    if !summary.failed_targets.is_empty() {
        log::info!("Failed targets this run:");
        for (target_id, error) in &summary.failed_targets {
            log::info!("  - {target_id}: {error}");
        }
        log::info!("Tip: use --retry-failed to retry these targets");
    }
}

async fn run(cli: Cli) -> HarvestResult<()> {
    let config = load_config(&cli)?;
    let checkpoint = Arc::new(CheckpointManager::open(config.resolve_path(&config.checkpoint.path)));

    if cli.checkpoint_status {
        print_checkpoint_status(&checkpoint);
        return Ok(());
    }

    if cli.clear_checkpoint {
        checkpoint.clear()?;
        if cli.targets.is_empty() && !cli.all {
            return Ok(());
        }
    }

    log::info!("starting listing harvester");
    let directory = TargetDirectory::load(config.resolve_path(&cli.targets_file))?;
    let selected = directory.select(&cli.selection(), cli.limit);
    if selected.is_empty() {
        log::error!("no targets selected");
        return Ok(());
    }

    let mode = cli.run_mode();
    let targets = mode.filter(selected, &checkpoint);
    if mode == RunMode::Fresh {
        checkpoint.start_new_run(json!({
            "targets": cli.targets,
            "all": cli.all,
            "parallel": cli.parallel,
            "workers": cli.workers,
            "max_listings_per_target": cli.max_listings_per_target,
            "limit": cli.limit,
            "mode": cli.mode.as_str(),
            "listing_type": config.scraping.listing_type.as_str(),
        }))?;
    } else if targets.is_empty() {
        log::info!("all targets already processed; use --clear-checkpoint to start fresh");
        return Ok(());
    }

    let pool = Arc::new(TieredProxyPool::from_files(
        config
            .proxy
            .primary_file
            .as_deref()
            .map(|path| config.resolve_path(path))
            .as_deref(),
        config
            .proxy
            .backup_file
            .as_deref()
            .map(|path| config.resolve_path(path))
            .as_deref(),
        config.proxy.max_consecutive_primary_failures,
    )?);
    if pool.is_empty() {
        log::warn!("no proxies configured; requests go out directly");
    }

    let limiter = Arc::new(RateLimiter::new(config.rate_limits.requests_per_second));
    let store = Arc::new(RedbListingStore::open(config.resolve_path(&config.store.path))?);
    let extractor = ListingExtractor::from_settings(&config.scraping, &config.anti_detection)?;
    let factory = DefaultFetcherFactory::new(
        config.clone(),
        cli.mode,
        pool.clone(),
        limiter,
        Arc::new(ReqwestTransport::new()),
        default_launcher(),
    );

    log::info!(
        "using fetch strategy {} (headless={})",
        cli.mode.as_str(),
        config.browser.headless
    );

    let orchestrator = Orchestrator::new(
        extractor,
        ListingUpsertService::new(store),
        checkpoint.clone(),
        Arc::new(factory),
        ScrapePlan::from_config(&config, cli.max_listings_per_target),
    )
    .with_seed(config.random_seed);

    let results = if cli.parallel {
        if cli.mode == FetchStrategy::Browser && cli.workers > BROWSER_WORKER_WARNING {
            log::warn!(
                "browser mode with {} parallel workers is resource-intensive; consider --workers {BROWSER_WORKER_WARNING} or less",
                cli.workers
            );
        }
        orchestrator.run_parallel(targets, cli.workers).await
    } else {
        orchestrator.run_sequential(targets).await
    };

    print_run_summary(&RunSummary::from_results(&results), &checkpoint);
    let health = pool.health_report();
    log::info!(
        "proxy pool: demoted={}, backup blacklisted {}/{}",
        health.demoted,
        health.backup_blacklisted,
        health.backup_total
    );
    Ok(())
}

#[tokio::main]
async fn main() -> HarvestResult<()> {
    let cli = Cli::parse();
    let level = match &cli.config {
        Some(path) => HarvestConfig::load(path)
            .map(|config| config.logging.level)
            .unwrap_or_else(|_| "info".into()),
        None => "info".into(),
    };
    init_logging(&level);
    run(cli).await
}
