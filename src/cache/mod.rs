//! Best-effort local persistence of ingested pages and the continent mapping.
//!
//! A page snapshot for session key `s` is stored as:
//!
//! - `s_0`, `s_1`, ... one JSON array of raw records per page, in page order
//! - `s_plan` the page size and record volume the pages were fetched with
//! - `s_length` the page count, written last, once the stream completed
//!
//! A snapshot without its length key is incomplete and never served. One
//! fetched with a different plan is treated as missing.

mod storage;

pub use storage::{DirStorage, MemoryStorage, Storage, DEFAULT_QUOTA_BYTES};

use crate::error::StorageError;
use crate::record::RawCityRecord;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Cache handle shared between the resolver and successive pipelines
pub type SharedCache = Arc<Mutex<PersistenceCache>>;

/// Paging a snapshot was fetched with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PagePlan {
    pub page_size: usize,
    pub total_volume: usize,
}

pub struct PersistenceCache {
    storage: Box<dyn Storage>,
}

impl PersistenceCache {
    pub fn new(storage: Box<dyn Storage>) -> Self {
        Self { storage }
    }

    pub fn shared(self) -> SharedCache {
        Arc::new(Mutex::new(self))
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.storage.read(key)
    }

    /// Store a value. On failure the previous value stays in place.
    pub fn put(&mut self, key: &str, payload: &[u8]) -> Result<(), StorageError> {
        self.storage.write(key, payload)
    }

    pub fn remove(&mut self, key: &str) -> Result<(), StorageError> {
        self.storage.remove(key)
    }

    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let mut bytes = self.get(key)?;
        match simd_json::serde::from_slice(&mut bytes) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key, error = %e, "Ignoring undecodable cache entry");
                None
            }
        }
    }

    pub fn put_json<T: Serialize>(&mut self, key: &str, value: &T) -> Result<(), StorageError> {
        let bytes = simd_json::serde::to_vec(value)?;
        self.put(key, &bytes)
    }

    /// Pages of a complete snapshot fetched with `plan`, or `None` if there
    /// is no such snapshot
    pub fn load_snapshot(&self, session: &str, plan: PagePlan) -> Option<Vec<Vec<RawCityRecord>>> {
        let count: usize = self.get_json(&length_key(session))?;
        if count == 0 {
            return None;
        }
        let stored: PagePlan = self.get_json(&plan_key(session))?;
        if stored != plan {
            debug!(session, ?stored, ?plan, "Snapshot was fetched with another page plan");
            return None;
        }

        let mut pages = Vec::with_capacity(count);
        for i in 0..count {
            match self.get_json::<Vec<RawCityRecord>>(&page_key(session, i)) {
                Some(page) => pages.push(page),
                None => {
                    debug!(session, page = i, "Snapshot is missing a page");
                    return None;
                }
            }
        }
        debug!(session, pages = count, "Loaded complete snapshot");
        Some(pages)
    }

    /// Write one page (`slot` is 0-based)
    pub fn store_page(
        &mut self,
        session: &str,
        slot: usize,
        page: &[RawCityRecord],
    ) -> Result<(), StorageError> {
        self.put_json(&page_key(session, slot), &page)
    }

    /// Mark the first `pages` pages as a complete snapshot fetched with `plan`
    pub fn commit_snapshot(&mut self, session: &str, pages: usize, plan: PagePlan) -> Result<(), StorageError> {
        self.put_json(&plan_key(session), &plan)?;
        self.put_json(&length_key(session), &pages)
    }

    /// Remove the length and plan keys and the first `pages` page keys
    pub fn discard_snapshot(&mut self, session: &str, pages: usize) {
        let keys = [length_key(session), plan_key(session)]
            .into_iter()
            .chain((0..pages).map(|i| page_key(session, i)));
        for key in keys {
            if let Err(e) = self.storage.remove(&key) {
                warn!(key, error = %e, "Could not remove cache entry");
            }
        }
    }
}

fn page_key(session: &str, slot: usize) -> String {
    format!("{}_{}", session, slot)
}

fn length_key(session: &str) -> String {
    format!("{}_length", session)
}

fn plan_key(session: &str) -> String {
    format!("{}_plan", session)
}
