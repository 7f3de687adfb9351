use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use super::{ListingStore, PersistedListing, StoreError, StoreResult};

/// In-process store for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryListingStore {
    inner: RwLock<HashMap<String, PersistedListing>>,
}

impl MemoryListingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ListingStore for MemoryListingStore {
    fn get(&self, external_id: &str) -> StoreResult<Option<PersistedListing>> {
        let map = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        Ok(map.get(external_id).cloned())
    }

    fn insert(&self, listing: PersistedListing) -> StoreResult<()> {
        let mut map = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if map.contains_key(&listing.external_id) {
            return Err(StoreError::Duplicate(listing.external_id));
        }
        map.insert(listing.external_id.clone(), listing);
        Ok(())
    }

    fn update(&self, listing: PersistedListing) -> StoreResult<()> {
        let mut map = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        match map.get_mut(&listing.external_id) {
            Some(slot) => {
                *slot = listing;
                Ok(())
            }
            None => Err(StoreError::NotFound(listing.external_id)),
        }
    }

    fn active_for_target(&self, target_id: &str, platform: &str) -> StoreResult<Vec<PersistedListing>> {
        let map = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let mut listings: Vec<_> = map
            .values()
            .filter(|listing| listing.is_active && listing.target_id == target_id && listing.platform == platform)
            .cloned()
            .collect();
        listings.sort_by(|a, b| a.external_id.cmp(&b.external_id));
        Ok(listings)
    }
}
