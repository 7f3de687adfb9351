//! Persisted listing state.
//!
//! The store itself is a narrow keyed collection; all lifecycle rules
//! (create, refresh, reactivate, delist) live in [`ListingUpsertService`].

pub mod memory;
pub mod redb_store;
pub mod upsert;

use chrono::{DateTime, Local, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

use crate::config::ListingType;

pub use memory::MemoryListingStore;
pub use redb_store::RedbListingStore;
pub use upsert::{IngestStats, ListingUpsertService, UpsertOutcome};

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),
    #[error("failed to encode listing: {0}")]
    Encoding(#[from] serde_json::Error),
    #[error("cannot prepare store directory {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("listing {0} already exists")]
    Duplicate(String),
    #[error("listing {0} not found")]
    NotFound(String),
}

/// A listing as kept between runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedListing {
    pub external_id: String,
    pub platform: String,
    pub listing_type: ListingType,
    pub target_id: String,
    pub url: String,
    pub title: String,
    pub price: Option<f64>,
    pub size_sqm: Option<u32>,
    pub price_per_sqm: Option<f64>,
    pub date_posted: NaiveDate,
    pub date_removed: Option<NaiveDate>,
    pub is_active: bool,
    pub days_on_market: i64,
    pub views: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Keyed listing collection. Implementations must be shareable across workers.
pub trait ListingStore: Send + Sync {
    fn get(&self, external_id: &str) -> StoreResult<Option<PersistedListing>>;

    /// Fails with [`StoreError::Duplicate`] when the id is already present.
    fn insert(&self, listing: PersistedListing) -> StoreResult<()>;

    /// Fails with [`StoreError::NotFound`] when the id is absent.
    fn update(&self, listing: PersistedListing) -> StoreResult<()>;

    fn active_for_target(&self, target_id: &str, platform: &str) -> StoreResult<Vec<PersistedListing>>;

    fn count_active(&self, target_id: &str, platform: &str) -> StoreResult<usize> {
        Ok(self.active_for_target(target_id, platform)?.len())
    }
}

/// Source of "now" for lifecycle dates.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    fn today(&self) -> NaiveDate;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn today(&self) -> NaiveDate {
        Local::now().date_naive()
    }
}

/// Clock pinned to one instant; used by tests and replays.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock {
    now: DateTime<Utc>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self { now }
    }

    pub fn at_date(date: NaiveDate) -> Self {
        let now = date
            .and_hms_opt(12, 0, 0)
            .map(|naive| naive.and_utc())
            .unwrap_or_else(Utc::now);
        Self { now }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.now
    }

    fn today(&self) -> NaiveDate {
        self.now.date_naive()
    }
}
