//! # listing-harvester
//!
//! Resilient acquisition of real-estate listings from a bot-resistant site,
//! with a local store of active and delisted listings kept current.
//!
//! The crate is organised around a single [`PageFetcher`] capability with two
//! strategies (plain HTTP via [`RequestPipeline`], headless Chrome via
//! [`BrowserFetcher`]) sharing one [`TieredProxyPool`]. The [`Orchestrator`]
//! drives thousands of independent targets through scrape, upsert and
//! delisting, checkpointing each transition so long runs can resume.
//!
//! ## Features
//!
//! - Primary/backup proxy tiers with demotion and blacklisting
//! - Rate limiting, human-like delays and exponential retry backoff
//! - Challenge detection with automatic and manual resolution in the browser
//! - Cascading card discovery that degrades field by field
//! - Resumable, crash-tolerant checkpoints
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use listing_harvester::{
//!     CheckpointManager, DefaultFetcherFactory, FetchStrategy, HarvestConfig, ListingExtractor,
//!     ListingUpsertService, MemoryListingStore, Orchestrator, RateLimiter, ReqwestTransport,
//!     ScrapePlan, Target, TieredProxyPool, default_launcher,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = HarvestConfig::default();
//!     let extractor = ListingExtractor::from_settings(&config.scraping, &config.anti_detection)?;
//!     let factory = DefaultFetcherFactory::new(
//!         config.clone(),
//!         FetchStrategy::Http,
//!         Arc::new(TieredProxyPool::empty()),
//!         Arc::new(RateLimiter::new(config.rate_limits.requests_per_second)),
//!         Arc::new(ReqwestTransport::new()),
//!         default_launcher(),
//!     );
//!     let orchestrator = Orchestrator::new(
//!         extractor,
//!         ListingUpsertService::new(Arc::new(MemoryListingStore::new())),
//!         Arc::new(CheckpointManager::open(&config.checkpoint.path)),
//!         Arc::new(factory),
//!         ScrapePlan::from_config(&config, 100),
//!     );
//!     let results = orchestrator.run_sequential(vec![Target::new("058091", "Roma")]).await;
//!     println!("{} targets processed", results.len());
//!     Ok(())
//! }
//! ```

pub mod browser;
pub mod challenges;
pub mod config;
pub mod extract;
pub mod fetch;
pub mod modules;
pub mod orchestrator;
pub mod store;

pub use crate::browser::{
    BehaviorSimulator, BrowserError, BrowserFetcher, BrowserLauncher, BrowserResult,
    BrowserSession, LaunchOptions, NavigationState, StoredCookie, UnavailableLauncher,
    default_launcher,
};

pub use crate::challenges::detectors::{ChallengeDetection, ChallengeDetector, ChallengeKind};

pub use crate::config::{ConfigError, ConfigResult, HarvestConfig, ListingType};

pub use crate::extract::{
    CardStrategy, ExtractedListing, ListingDetail, ListingExtractor, parse_italian_date,
};

pub use crate::fetch::{
    FetchError, FetchOutcome, FetchResult, FetchStatus, FetchStrategy, HttpTransport,
    PageFetcher, RequestPipeline, ReqwestTransport,
};

pub use crate::modules::{
    EventDispatcher, EventHandler, FetchEvent, HumanDelay, IdentityGenerator, LoggingHandler,
    ProxyEntry, ProxyHealthReport, ProxyTier, RateLimiter, RetryBackoff, TieredProxyPool,
};

pub use crate::orchestrator::{
    CheckpointManager, DefaultFetcherFactory, FetcherFactory, HarvestError, HarvestResult,
    Orchestrator, RunMode, RunSummary, ScrapePlan, Target, TargetDirectory, TargetResult,
    TargetSelection, TargetStatus,
};

pub use crate::store::{
    IngestStats, ListingStore, ListingUpsertService, MemoryListingStore, PersistedListing,
    RedbListingStore, StoreError, StoreResult,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
