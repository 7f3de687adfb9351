//! Checkpointed, resumable run orchestration.
//!
//! A run walks a list of [`Target`]s, either one at a time or across a
//! bounded worker pool. Each target moves `pending -> in-progress ->
//! {completed | failed}` in the [`CheckpointManager`]; a failed target never
//! aborts the batch.

pub mod checkpoint;
pub mod scrape;
pub mod targets;

use async_trait::async_trait;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::browser::{BrowserError, BrowserFetcher, BrowserLauncher};
use crate::config::{ConfigError, HarvestConfig};
use crate::extract::ListingExtractor;
use crate::fetch::{FetchError, FetchStrategy, HttpTransport, PageFetcher, RequestPipeline};
use crate::modules::events::EventDispatcher;
use crate::modules::pacing::RateLimiter;
use crate::modules::proxy::{ProxyError, TieredProxyPool};
use crate::modules::spoofing::IdentityGenerator;
use crate::store::{ListingUpsertService, StoreError};

pub use checkpoint::{
    CheckpointError, CheckpointManager, CheckpointResult, CheckpointState, CheckpointSummary,
    TargetCounters,
};
pub use scrape::{ScrapePlan, scrape_target};
pub use targets::{DirectoryResult, Target, TargetDirectory, TargetError, TargetSelection};

pub type HarvestResult<T> = Result<T, HarvestError>;

#[derive(Debug, Error)]
pub enum HarvestError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Proxy(#[from] ProxyError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Browser(#[from] BrowserError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
    #[error(transparent)]
    Targets(#[from] TargetError),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
}

/// Which targets of the selected list a run actually processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunMode {
    /// Reset the checkpoint and process every target.
    #[default]
    Fresh,
    /// Skip targets already completed.
    Resume,
    /// Only targets recorded as failed, including one interrupted mid-run.
    RetryFailed,
}

impl RunMode {
    pub fn filter(&self, targets: Vec<Target>, checkpoint: &CheckpointManager) -> Vec<Target> {
        let before = targets.len();
        match self {
            RunMode::Fresh => targets,
            RunMode::Resume => {
                let completed = checkpoint.completed();
                let remaining: Vec<Target> = targets
                    .into_iter()
                    .filter(|target| !completed.contains(&target.id))
                    .collect();
                log::info!(
                    "resuming: {} already completed, {} remaining",
                    before - remaining.len(),
                    remaining.len()
                );
                remaining
            }
            RunMode::RetryFailed => {
                if let Err(err) = checkpoint.recover_interrupted() {
                    log::error!("failed to checkpoint interrupted target: {err}");
                }
                let failed = checkpoint.failed();
                let retry: Vec<Target> = targets
                    .into_iter()
                    .filter(|target| failed.contains(&target.id))
                    .collect();
                log::info!("retrying {} previously failed targets", retry.len());
                retry
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetStatus {
    Success,
    NoListings,
    Error,
}

impl fmt::Display for TargetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetStatus::Success => f.write_str("success"),
            TargetStatus::NoListings => f.write_str("no_listings"),
            TargetStatus::Error => f.write_str("error"),
        }
    }
}

/// Outcome of one target within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetResult {
    pub target_id: String,
    pub name: String,
    pub status: TargetStatus,
    #[serde(flatten)]
    pub counters: TargetCounters,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TargetResult {
    fn failed(target: &Target, error: String) -> Self {
        Self {
            target_id: target.id.clone(),
            name: target.name.clone(),
            status: TargetStatus::Error,
            counters: TargetCounters::default(),
            error: Some(error),
        }
    }
}

/// Totals over the targets processed in this run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub processed: usize,
    pub successful: usize,
    pub no_listings: usize,
    pub failed: usize,
    pub totals: TargetCounters,
    pub failed_targets: Vec<(String, String)>,
}

impl RunSummary {
    pub fn from_results(results: &[TargetResult]) -> Self {
        let mut summary = RunSummary {
            processed: results.len(),
            ..Default::default()
        };
        for result in results {
            match result.status {
                TargetStatus::Success => summary.successful += 1,
                TargetStatus::NoListings => summary.no_listings += 1,
                TargetStatus::Error => {
                    summary.failed += 1;
                    summary.failed_targets.push((
                        result.target_id.clone(),
                        result.error.clone().unwrap_or_else(|| "unknown error".into()),
                    ));
                }
            }
            summary.totals.scraped += result.counters.scraped;
            summary.totals.created += result.counters.created;
            summary.totals.updated += result.counters.updated;
            summary.totals.delisted += result.counters.delisted;
            summary.totals.errors += result.counters.errors;
        }
        summary
    }

    /// Percentage of processed targets that completed (with or without listings).
    pub fn success_rate(&self) -> Option<f64> {
        if self.processed == 0 {
            return None;
        }
        Some((self.successful + self.no_listings) as f64 / self.processed as f64 * 100.0)
    }
}

/// Builds one fetcher per target. Implementations must be shareable across workers.
#[async_trait]
pub trait FetcherFactory: Send + Sync {
    async fn create(&self, seed: u64) -> HarvestResult<Box<dyn PageFetcher>>;
}

/// Factory for the configured fetch strategy around one shared proxy pool.
pub struct DefaultFetcherFactory {
    config: HarvestConfig,
    strategy: FetchStrategy,
    pool: Arc<TieredProxyPool>,
    limiter: Arc<RateLimiter>,
    transport: Arc<dyn HttpTransport>,
    launcher: Arc<dyn BrowserLauncher>,
    events: Arc<EventDispatcher>,
}

impl DefaultFetcherFactory {
    pub fn new(
        config: HarvestConfig,
        strategy: FetchStrategy,
        pool: Arc<TieredProxyPool>,
        limiter: Arc<RateLimiter>,
        transport: Arc<dyn HttpTransport>,
        launcher: Arc<dyn BrowserLauncher>,
    ) -> Self {
        Self {
            config,
            strategy,
            pool,
            limiter,
            transport,
            launcher,
            events: Arc::new(EventDispatcher::with_logging()),
        }
    }

    pub fn with_events(mut self, events: Arc<EventDispatcher>) -> Self {
        self.events = events;
        self
    }

    pub fn strategy(&self) -> FetchStrategy {
        self.strategy
    }
}

#[async_trait]
impl FetcherFactory for DefaultFetcherFactory {
    async fn create(&self, seed: u64) -> HarvestResult<Box<dyn PageFetcher>> {
        let rng = StdRng::seed_from_u64(seed);
        let fetcher: Box<dyn PageFetcher> = match self.strategy {
            FetchStrategy::Http => Box::new(
                RequestPipeline::from_config(
                    &self.config,
                    self.transport.clone(),
                    self.pool.clone(),
                    self.limiter.clone(),
                )
                .with_events(self.events.clone())
                .with_rng(rng),
            ),
            FetchStrategy::Browser => Box::new(
                BrowserFetcher::new(
                    self.launcher.clone(),
                    self.pool.clone(),
                    self.limiter.clone(),
                    self.config.browser.clone(),
                )
                .with_identities(IdentityGenerator::new(&self.config.anti_detection))
                .with_events(self.events.clone())
                .with_rng(rng),
            ),
        };
        Ok(fetcher)
    }
}

/// Drives targets through scrape, ingest and delisting with checkpointing.
#[derive(Clone)]
pub struct Orchestrator {
    extractor: ListingExtractor,
    upsert: ListingUpsertService,
    checkpoint: Arc<CheckpointManager>,
    factory: Arc<dyn FetcherFactory>,
    plan: ScrapePlan,
    seed: Option<u64>,
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("extractor", &self.extractor)
            .field("checkpoint", &self.checkpoint.path())
            .field("plan", &self.plan)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    pub fn new(
        extractor: ListingExtractor,
        upsert: ListingUpsertService,
        checkpoint: Arc<CheckpointManager>,
        factory: Arc<dyn FetcherFactory>,
        plan: ScrapePlan,
    ) -> Self {
        Self {
            extractor,
            upsert,
            checkpoint,
            factory,
            plan,
            seed: None,
        }
    }

    /// Derive every worker RNG from `seed` instead of entropy.
    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    pub fn checkpoint(&self) -> &Arc<CheckpointManager> {
        &self.checkpoint
    }

    fn worker_seed(&self, index: usize) -> u64 {
        match self.seed {
            Some(seed) => seed.wrapping_add(index as u64),
            None => rand::random(),
        }
    }

    /// Process `targets` one after another.
    pub async fn run_sequential(&self, targets: Vec<Target>) -> Vec<TargetResult> {
        log::info!("running sequential scraper over {} targets", targets.len());
        let total = targets.len();
        let mut results = Vec::with_capacity(total);
        for (index, target) in targets.iter().enumerate() {
            let result = self.process_target(target, self.worker_seed(index)).await;
            log::info!(
                "[{}/{total}] {} -> {}",
                index + 1,
                target.name,
                result.status
            );
            results.push(result);
        }
        results
    }

    /// Process `targets` across at most `workers` concurrent tasks.
    pub async fn run_parallel(&self, targets: Vec<Target>, workers: usize) -> Vec<TargetResult> {
        let workers = workers.max(1);
        log::info!(
            "running parallel scraper over {} targets with {workers} workers",
            targets.len()
        );
        let total = targets.len();
        let permits = Arc::new(Semaphore::new(workers));
        let mut tasks = JoinSet::new();

        for (index, target) in targets.into_iter().enumerate() {
            let orchestrator = self.clone();
            let permits = permits.clone();
            let seed = self.worker_seed(index);
            tasks.spawn(async move {
                let _permit = match permits.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(err) => {
                        return TargetResult::failed(&target, err.to_string());
                    }
                };
                let worker = orchestrator.clone();
                let task_target = target.clone();
                match tokio::spawn(async move { worker.process_target(&task_target, seed).await }).await {
                    Ok(result) => result,
                    Err(err) => {
                        log::error!("worker for {} panicked: {err}", target.id);
                        let message = format!("worker panicked: {err}");
                        if let Err(err) = orchestrator.checkpoint.mark_failed(&target.id, &message) {
                            log::error!("failed to checkpoint failure of {}: {err}", target.id);
                        }
                        TargetResult::failed(&target, message)
                    }
                }
            });
        }

        let mut results = Vec::with_capacity(total);
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => {
                    log::info!(
                        "[{}/{total}] {} -> {}",
                        results.len() + 1,
                        result.name,
                        result.status
                    );
                    results.push(result);
                }
                Err(err) => log::error!("worker task panicked: {err}"),
            }
        }
        results
    }

    /// Run one target end to end. Errors are recorded in the checkpoint and
    /// reported in the result, never propagated.
    pub async fn process_target(&self, target: &Target, seed: u64) -> TargetResult {
        if let Err(err) = self.checkpoint.mark_started(&target.id) {
            log::error!("failed to checkpoint start of {}: {err}", target.id);
        }

        match self.harvest(target, seed).await {
            Ok(result) => {
                if let Err(err) = self.checkpoint.mark_completed(&target.id, &result.counters) {
                    log::error!("failed to checkpoint completion of {}: {err}", target.id);
                }
                result
            }
            Err(err) => {
                log::error!("error scraping {}: {err}", target.name);
                let message = err.to_string();
                if let Err(err) = self.checkpoint.mark_failed(&target.id, &message) {
                    log::error!("failed to checkpoint failure of {}: {err}", target.id);
                }
                TargetResult::failed(target, message)
            }
        }
    }

    async fn harvest(&self, target: &Target, seed: u64) -> HarvestResult<TargetResult> {
        let mut fetcher = self.factory.create(seed).await?;
        let mut rng = StdRng::seed_from_u64(seed);
        let scraped = scrape_target(fetcher.as_mut(), &self.extractor, target, &self.plan, &mut rng).await;
        fetcher.close().await;
        let listings = scraped?;

        let mut result = TargetResult {
            target_id: target.id.clone(),
            name: target.name.clone(),
            status: TargetStatus::NoListings,
            counters: TargetCounters::default(),
            error: None,
        };
        if listings.is_empty() {
            return Ok(result);
        }

        let stats = self.upsert.ingest_batch(&listings);
        let active: HashSet<String> = listings
            .iter()
            .map(|listing| listing.external_id.clone())
            .collect();
        let platform = &listings[0].platform;
        let delisted = self.upsert.mark_delisted(&target.id, platform, &active)?;

        result.status = TargetStatus::Success;
        result.counters = TargetCounters {
            scraped: listings.len() as u64,
            created: stats.created as u64,
            updated: stats.updated as u64,
            delisted: delisted as u64,
            errors: stats.errors as u64,
        };
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(id: &str, status: TargetStatus, scraped: u64) -> TargetResult {
        TargetResult {
            target_id: id.into(),
            name: id.into(),
            status,
            counters: TargetCounters {
                scraped,
                ..Default::default()
            },
            error: (status == TargetStatus::Error).then(|| "exhausted".to_string()),
        }
    }

    #[test]
    fn run_modes_filter_against_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let checkpoint = CheckpointManager::open(dir.path().join("cp.json"));
        checkpoint.mark_completed("T1", &TargetCounters::default()).unwrap();
        checkpoint.mark_completed("T3", &TargetCounters::default()).unwrap();
        checkpoint.mark_failed("T4", "timeout").unwrap();

        let targets: Vec<Target> = ["T1", "T2", "T3", "T4"]
            .into_iter()
            .map(|id| Target::new(id, id))
            .collect();

        let ids = |targets: Vec<Target>| targets.into_iter().map(|t| t.id).collect::<Vec<_>>();
        assert_eq!(ids(RunMode::Resume.filter(targets.clone(), &checkpoint)), ["T2", "T4"]);
        assert_eq!(ids(RunMode::RetryFailed.filter(targets.clone(), &checkpoint)), ["T4"]);
        assert_eq!(ids(RunMode::Fresh.filter(targets, &checkpoint)).len(), 4);
    }

    #[test]
    fn summary_counts_no_listings_as_success() {
        let summary = RunSummary::from_results(&[
            result("A", TargetStatus::Success, 10),
            result("B", TargetStatus::NoListings, 0),
            result("C", TargetStatus::Error, 0),
            result("D", TargetStatus::Success, 5),
        ]);
        assert_eq!(summary.successful, 2);
        assert_eq!(summary.no_listings, 1);
        assert_eq!(summary.failed_targets, vec![("C".to_string(), "exhausted".to_string())]);
        assert_eq!(summary.totals.scraped, 15);
        assert_eq!(summary.success_rate(), Some(75.0));
        assert_eq!(RunSummary::default().success_rate(), None);
    }

    #[test]
    fn target_result_serializes_flat() {
        let json = serde_json::to_value(result("A", TargetStatus::NoListings, 0)).unwrap();
        assert_eq!(json["status"], "no_listings");
        assert_eq!(json["scraped"], 0);
        assert!(json.get("error").is_none());
    }
}
