//! This module contains the MemoryCacheManager struct.

use crate::clock::Clock;
use crate::error::CacheError;
use crate::models::{ProductKey, VulnerabilityRecord};
use crate::vulnerabilities::cache_managers::{CacheEntry, CacheManager};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use log::trace;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Represents a cache manager which keeps the data in memory, for the
/// lifetime of the process.
pub struct MemoryCacheManager {
    entries: RwLock<HashMap<String, CacheEntry>>,
    clock: Arc<dyn Clock>,
    window: Duration,
}

impl MemoryCacheManager {
    pub fn new(clock: Arc<dyn Clock>, window: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            clock,
            window,
        }
    }

    /// Stores an entry with an explicit refresh time. Used to import data
    /// refreshed elsewhere.
    pub fn insert_entry(&self, product: &ProductKey, records: Vec<VulnerabilityRecord>, at: DateTime<Utc>) {
        let entry = CacheEntry::new(product, records, at);
        self.write().insert(entry.product_key.clone(), entry);
    }

    /// Number of product keys stored.
    pub fn len(&self) -> usize {
        self.read_lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_lock().is_empty()
    }

    // The lock is never held across an await point, a poisoned lock still
    // holds consistent data.
    fn read_lock(&self) -> RwLockReadGuard<'_, HashMap<String, CacheEntry>> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, CacheEntry>> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl CacheManager for MemoryCacheManager {
    async fn lookup(&self, product: &ProductKey) -> Result<Option<CacheEntry>, CacheError> {
        trace!("Running MemoryCacheManager::lookup() for {}", product);
        Ok(self.read_lock().get(&product.cache_key()).cloned())
    }

    async fn upsert(
        &self,
        product: &ProductKey,
        records: Vec<VulnerabilityRecord>,
    ) -> Result<(), CacheError> {
        trace!("Running MemoryCacheManager::upsert() for {}", product);
        self.insert_entry(product, records, self.clock.now());
        Ok(())
    }

    async fn record(&self, cve_id: &str) -> Result<Option<VulnerabilityRecord>, CacheError> {
        Ok(self
            .read_lock()
            .values()
            .flat_map(|entry| entry.records.iter())
            .find(|record| record.id == cve_id)
            .cloned())
    }

    fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    fn freshness_window(&self) -> Duration {
        self.window
    }
}
