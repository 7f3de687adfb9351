//! Listing lifecycle reconciliation.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use super::{Clock, ListingStore, PersistedListing, StoreError, StoreResult, SystemClock};
use crate::extract::{ExtractedListing, price_per_sqm};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
}

impl fmt::Display for UpsertOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpsertOutcome::Created => f.write_str("created"),
            UpsertOutcome::Updated => f.write_str("updated"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestStats {
    pub created: usize,
    pub updated: usize,
    pub errors: usize,
}

/// Reconciles extracted listings against the store, keyed by external id.
#[derive(Clone)]
pub struct ListingUpsertService {
    store: Arc<dyn ListingStore>,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for ListingUpsertService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListingUpsertService").finish_non_exhaustive()
    }
}

impl ListingUpsertService {
    pub fn new(store: Arc<dyn ListingStore>) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(&self) -> &Arc<dyn ListingStore> {
        &self.store
    }

    pub fn upsert(&self, record: &ExtractedListing) -> StoreResult<UpsertOutcome> {
        match self.store.get(&record.external_id)? {
            Some(existing) => {
                self.update_existing(existing, record)?;
                Ok(UpsertOutcome::Updated)
            }
            None => match self.create(record) {
                Ok(()) => Ok(UpsertOutcome::Created),
                // another worker inserted the same id since the lookup
                Err(StoreError::Duplicate(_)) => {
                    let existing = self
                        .store
                        .get(&record.external_id)?
                        .ok_or_else(|| StoreError::NotFound(record.external_id.clone()))?;
                    self.update_existing(existing, record)?;
                    Ok(UpsertOutcome::Updated)
                }
                Err(err) => Err(err),
            },
        }
    }

    fn create(&self, record: &ExtractedListing) -> StoreResult<()> {
        let now = self.clock.now();
        let listing = PersistedListing {
            external_id: record.external_id.clone(),
            platform: record.platform.clone(),
            listing_type: record.listing_type,
            target_id: record.target_id.clone(),
            url: record.url.clone(),
            title: record.title.clone(),
            price: record.price,
            size_sqm: record.size_sqm,
            price_per_sqm: record.price_per_sqm,
            date_posted: record.date_posted.unwrap_or_else(|| self.clock.today()),
            date_removed: None,
            is_active: true,
            days_on_market: 0,
            views: record.views.unwrap_or(0),
            created_at: now,
            updated_at: now,
        };
        self.store.insert(listing)?;
        log::info!("created listing {}", record.external_id);
        Ok(())
    }

    fn update_existing(&self, mut existing: PersistedListing, record: &ExtractedListing) -> StoreResult<()> {
        if let Some(size) = record.size_sqm {
            existing.size_sqm = Some(size);
        }
        if record.title != existing.title && !record.title.is_empty() {
            existing.title = record.title.clone();
        }

        if let Some(price) = record.price
            && existing.price != Some(price)
        {
            log::info!(
                "price changed for {}: {:?} -> {price}",
                existing.external_id,
                existing.price
            );
            existing.price = Some(price);
        }
        if existing.size_sqm.is_some_and(|size| size > 0) {
            existing.price_per_sqm = price_per_sqm(existing.price, existing.size_sqm);
        }

        if let Some(views) = record.views {
            existing.views = views;
        }

        let today = self.clock.today();
        existing.days_on_market = (today - existing.date_posted).num_days().max(0);

        if !existing.is_active {
            log::info!("reactivating listing {}", existing.external_id);
            existing.is_active = true;
            existing.date_removed = None;
        }

        existing.updated_at = self.clock.now();
        let id = existing.external_id.clone();
        self.store.update(existing)?;
        log::debug!("updated listing {id}");
        Ok(())
    }

    /// Upsert every record; individual failures are counted, not propagated.
    pub fn ingest_batch(&self, records: &[ExtractedListing]) -> IngestStats {
        let mut stats = IngestStats::default();
        for record in records {
            match self.upsert(record) {
                Ok(UpsertOutcome::Created) => stats.created += 1,
                Ok(UpsertOutcome::Updated) => stats.updated += 1,
                Err(err) => {
                    stats.errors += 1;
                    log::error!("error ingesting listing {}: {err}", record.external_id);
                }
            }
        }
        log::info!(
            "batch ingest complete: {} created, {} updated, {} errors",
            stats.created,
            stats.updated,
            stats.errors
        );
        stats
    }

    /// Deactivate every active listing of `target_id` missing from `active_ids`.
    /// Returns how many listings were delisted.
    pub fn mark_delisted(
        &self,
        target_id: &str,
        platform: &str,
        active_ids: &HashSet<String>,
    ) -> StoreResult<usize> {
        let today = self.clock.today();
        let now = self.clock.now();
        let mut count = 0;
        for mut listing in self.store.active_for_target(target_id, platform)? {
            if active_ids.contains(&listing.external_id) {
                continue;
            }
            listing.is_active = false;
            listing.date_removed = Some(today);
            listing.days_on_market = (today - listing.date_posted).num_days().max(0);
            listing.updated_at = now;
            self.store.update(listing)?;
            count += 1;
        }
        if count > 0 {
            log::info!("marked {count} listings as delisted for target {target_id}");
        }
        Ok(count)
    }

    pub fn active_count(&self, target_id: &str, platform: &str) -> StoreResult<usize> {
        self.store.count_active(target_id, platform)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ListingType;
    use crate::store::{FixedClock, MemoryListingStore};
    use chrono::{Days, NaiveDate};

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 10).unwrap()
    }

    fn service_at(date: NaiveDate, store: Arc<MemoryListingStore>) -> ListingUpsertService {
        ListingUpsertService::new(store).with_clock(Arc::new(FixedClock::at_date(date)))
    }

    fn record(id: &str, price: f64, size: u32) -> ExtractedListing {
        ExtractedListing {
            external_id: id.into(),
            platform: "casa_it".into(),
            listing_type: ListingType::Sale,
            target_id: "058091".into(),
            url: format!("https://www.casa.it/immobili/{id}/"),
            title: "Trilocale luminoso".into(),
            price: Some(price),
            size_sqm: Some(size),
            price_per_sqm: price_per_sqm(Some(price), Some(size)),
            date_posted: None,
            views: None,
        }
    }

    /// Hides the first lookup, as if another worker inserted concurrently.
    struct RacingStore {
        inner: MemoryListingStore,
        stale_reads: std::sync::atomic::AtomicUsize,
    }

    impl ListingStore for RacingStore {
        fn get(&self, external_id: &str) -> StoreResult<Option<PersistedListing>> {
            use std::sync::atomic::Ordering;
            if self
                .stale_reads
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
                .is_ok()
            {
                return Ok(None);
            }
            self.inner.get(external_id)
        }

        fn insert(&self, listing: PersistedListing) -> StoreResult<()> {
            self.inner.insert(listing)
        }

        fn update(&self, listing: PersistedListing) -> StoreResult<()> {
            self.inner.update(listing)
        }

        fn active_for_target(&self, target_id: &str, platform: &str) -> StoreResult<Vec<PersistedListing>> {
            self.inner.active_for_target(target_id, platform)
        }
    }

    #[test]
    fn concurrent_insert_falls_back_to_update() {
        let store = Arc::new(RacingStore {
            inner: MemoryListingStore::new(),
            stale_reads: std::sync::atomic::AtomicUsize::new(0),
        });
        let service = ListingUpsertService::new(store.clone())
            .with_clock(Arc::new(FixedClock::at_date(today())));

        assert_eq!(service.upsert(&record("R", 200_000.0, 80)).unwrap(), UpsertOutcome::Created);
        store.stale_reads.store(1, std::sync::atomic::Ordering::SeqCst);
        assert_eq!(service.upsert(&record("R", 190_000.0, 80)).unwrap(), UpsertOutcome::Updated);
        assert_eq!(store.inner.get("R").unwrap().unwrap().price, Some(190_000.0));
    }

    #[test]
    fn second_upsert_updates_in_place() {
        let store = Arc::new(MemoryListingStore::new());
        let service = service_at(today(), store.clone());

        assert_eq!(service.upsert(&record("A", 200_000.0, 80)).unwrap(), UpsertOutcome::Created);
        assert_eq!(service.upsert(&record("A", 180_000.0, 90)).unwrap(), UpsertOutcome::Updated);

        let stored = store.get("A").unwrap().unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(stored.price, Some(180_000.0));
        assert_eq!(stored.size_sqm, Some(90));
        assert_eq!(stored.price_per_sqm, Some(2000.0));
        assert_eq!(stored.days_on_market, 0);
    }

    #[test]
    fn delists_exactly_the_missing_ids() {
        let store = Arc::new(MemoryListingStore::new());
        let posted = today() - Days::new(20);
        let service = service_at(posted, store.clone());
        let stats = service.ingest_batch(&[
            record("A", 100_000.0, 50),
            record("B", 110_000.0, 55),
            record("C", 120_000.0, 60),
        ]);
        assert_eq!(stats, IngestStats { created: 3, updated: 0, errors: 0 });

        let later = service_at(today(), store.clone());
        let active: HashSet<String> = ["A", "C"].into_iter().map(String::from).collect();
        assert_eq!(later.mark_delisted("058091", "casa_it", &active).unwrap(), 1);

        let b = store.get("B").unwrap().unwrap();
        assert!(!b.is_active);
        assert_eq!(b.date_removed, Some(today()));
        assert_eq!(b.days_on_market, 20);
        assert!(store.get("A").unwrap().unwrap().is_active);
        assert!(store.get("C").unwrap().unwrap().is_active);
        assert_eq!(later.active_count("058091", "casa_it").unwrap(), 2);
    }

    #[test]
    fn reappearing_listing_is_reactivated() {
        let store = Arc::new(MemoryListingStore::new());
        let service = service_at(today(), store.clone());
        service.upsert(&record("A", 100_000.0, 50)).unwrap();
        service.mark_delisted("058091", "casa_it", &HashSet::new()).unwrap();
        assert_eq!(service.active_count("058091", "casa_it").unwrap(), 0);

        service.upsert(&record("A", 100_000.0, 50)).unwrap();
        let stored = store.get("A").unwrap().unwrap();
        assert!(stored.is_active);
        assert_eq!(stored.date_removed, None);
    }
}
