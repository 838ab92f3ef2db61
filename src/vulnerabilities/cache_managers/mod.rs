/// The module cache_managers defines the vulnerabilities cache managers.
pub mod files;
pub mod memory;

use crate::clock::Clock;
use crate::error::CacheError;
use crate::models::{ProductKey, VulnerabilityRecord};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The vulnerabilities stored for one product key.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CacheEntry {
    /// Example: apache:http_server:2.4.49
    pub product_key: String,
    pub records: Vec<VulnerabilityRecord>,
    pub last_refreshed_at: DateTime<Utc>,
}

impl CacheEntry {
    /// Creates an entry refreshed at `now`. Records sharing a CVE id are
    /// merged, the last one wins.
    pub fn new(product: &ProductKey, records: Vec<VulnerabilityRecord>, now: DateTime<Utc>) -> Self {
        Self {
            product_key: product.cache_key(),
            records: dedup_records(records),
            last_refreshed_at: now,
        }
    }

    /// Whether the entry is younger than the freshness window.
    pub fn is_fresh(&self, now: DateTime<Utc>, window: Duration) -> bool {
        now - self.last_refreshed_at < window
    }
}

/// Removes duplicated CVE ids. A duplicate replaces the previous record
/// in place, so the order of first appearance is kept.
pub fn dedup_records(records: Vec<VulnerabilityRecord>) -> Vec<VulnerabilityRecord> {
    let mut positions: HashMap<String, usize> = HashMap::with_capacity(records.len());
    let mut merged: Vec<VulnerabilityRecord> = Vec::with_capacity(records.len());
    for record in records {
        match positions.get(&record.id) {
            Some(&position) => merged[position] = record,
            None => {
                positions.insert(record.id.clone(), merged.len());
                merged.push(record);
            }
        }
    }
    merged
}

/// A common interface between all cache managers.
///
/// Implementations are shared between tasks: every operation is atomic
/// for a given product key, and operations on different keys don't wait
/// on each other's I/O.
#[async_trait]
pub trait CacheManager: Send + Sync {
    /// Returns the entry stored for a product key, if any.
    async fn lookup(&self, product: &ProductKey) -> Result<Option<CacheEntry>, CacheError>;

    /// Replaces the records of a product key and marks it as refreshed now.
    async fn upsert(
        &self,
        product: &ProductKey,
        records: Vec<VulnerabilityRecord>,
    ) -> Result<(), CacheError>;

    /// Looks for a CVE among all the stored product keys.
    async fn record(&self, cve_id: &str) -> Result<Option<VulnerabilityRecord>, CacheError>;

    /// The clock used to date the refreshes.
    fn clock(&self) -> &dyn Clock;

    /// How long an entry stays fresh.
    fn freshness_window(&self) -> Duration;

    /// Reads the records of a product key. Empty if nothing is stored.
    async fn read(&self, product: &ProductKey) -> Result<Vec<VulnerabilityRecord>, CacheError> {
        Ok(self
            .lookup(product)
            .await?
            .map(|entry| entry.records)
            .unwrap_or_default())
    }

    /// Whether a fresh entry exists for the product key.
    async fn is_fresh(&self, product: &ProductKey) -> Result<bool, CacheError> {
        let entry = self.lookup(product).await?;
        let now = self.clock().now();
        Ok(entry.is_some_and(|e| e.is_fresh(now, self.freshness_window())))
    }
}
