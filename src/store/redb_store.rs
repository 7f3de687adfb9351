//! redb-backed listing store.
//!
//! One table keyed by external id; values are JSON-encoded
//! [`PersistedListing`]s. Every call runs in its own transaction.

use redb::{Database, ReadableTable, TableDefinition};
use std::fs;
use std::path::{Path, PathBuf};

use super::{ListingStore, PersistedListing, StoreError, StoreResult};

const LISTINGS: TableDefinition<&str, &[u8]> = TableDefinition::new("listings");

fn db_err<E: Into<redb::Error>>(err: E) -> StoreError {
    StoreError::Database(err.into().to_string())
}

pub struct RedbListingStore {
    db: Database,
    path: PathBuf,
}

impl std::fmt::Debug for RedbListingStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbListingStore").field("path", &self.path).finish()
    }
}

impl RedbListingStore {
    /// Open (or create) the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let db = Database::create(&path).map_err(db_err)?;
        let txn = db.begin_write().map_err(db_err)?;
        {
            txn.open_table(LISTINGS).map_err(db_err)?;
        }
        txn.commit().map_err(db_err)?;

        log::info!("opened listing store at {}", path.display());
        Ok(Self { db, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write(&self, listing: &PersistedListing, must_exist: bool) -> StoreResult<()> {
        let encoded = serde_json::to_vec(listing)?;
        let txn = self.db.begin_write().map_err(db_err)?;
        {
            let mut table = txn.open_table(LISTINGS).map_err(db_err)?;
            let exists = table
                .get(listing.external_id.as_str())
                .map_err(db_err)?
                .is_some();
            match (exists, must_exist) {
                (true, false) => return Err(StoreError::Duplicate(listing.external_id.clone())),
                (false, true) => return Err(StoreError::NotFound(listing.external_id.clone())),
                _ => {}
            }
            table
                .insert(listing.external_id.as_str(), encoded.as_slice())
                .map_err(db_err)?;
        }
        txn.commit().map_err(db_err)?;
        Ok(())
    }
}

impl ListingStore for RedbListingStore {
    fn get(&self, external_id: &str) -> StoreResult<Option<PersistedListing>> {
        let txn = self.db.begin_read().map_err(db_err)?;
        let table = txn.open_table(LISTINGS).map_err(db_err)?;
        let Some(value) = table.get(external_id).map_err(db_err)? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_slice(value.value())?))
    }

    fn insert(&self, listing: PersistedListing) -> StoreResult<()> {
        self.write(&listing, false)
    }

    fn update(&self, listing: PersistedListing) -> StoreResult<()> {
        self.write(&listing, true)
    }

    fn active_for_target(&self, target_id: &str, platform: &str) -> StoreResult<Vec<PersistedListing>> {
        let txn = self.db.begin_read().map_err(db_err)?;
        let table = txn.open_table(LISTINGS).map_err(db_err)?;
        let mut listings = Vec::new();
        for entry in table.iter().map_err(db_err)? {
            let (_, value) = entry.map_err(db_err)?;
            let listing: PersistedListing = serde_json::from_slice(value.value())?;
            if listing.is_active && listing.target_id == target_id && listing.platform == platform {
                listings.push(listing);
            }
        }
        Ok(listings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ListingType;
    use chrono::{NaiveDate, Utc};

    fn listing(id: &str, target: &str) -> PersistedListing {
        PersistedListing {
            external_id: id.into(),
            platform: "casa_it".into(),
            listing_type: ListingType::Sale,
            target_id: target.into(),
            url: format!("https://www.casa.it/immobili/{id}/"),
            title: "Bilocale".into(),
            price: Some(150_000.0),
            size_sqm: Some(60),
            price_per_sqm: Some(2500.0),
            date_posted: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            date_removed: None,
            is_active: true,
            days_on_market: 0,
            views: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("listings.redb");
        {
            let store = RedbListingStore::open(&path).unwrap();
            store.insert(listing("casa_it_1", "roma")).unwrap();
            store.insert(listing("casa_it_2", "milano")).unwrap();
            assert!(matches!(
                store.insert(listing("casa_it_1", "roma")),
                Err(StoreError::Duplicate(_))
            ));
        }

        let store = RedbListingStore::open(&path).unwrap();
        assert_eq!(store.get("casa_it_1").unwrap().unwrap().target_id, "roma");
        assert_eq!(store.count_active("roma", "casa_it").unwrap(), 1);

        let mut updated = listing("casa_it_1", "roma");
        updated.is_active = false;
        store.update(updated).unwrap();
        assert_eq!(store.count_active("roma", "casa_it").unwrap(), 0);
        assert!(matches!(
            store.update(listing("casa_it_9", "roma")),
            Err(StoreError::NotFound(_))
        ));
    }
}
