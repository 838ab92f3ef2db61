//! This module contains the FileCacheManager struct.

use crate::clock::Clock;
use crate::error::CacheError;
use crate::models::{ProductKey, VulnerabilityRecord};
use crate::vulnerabilities::cache_managers::{CacheEntry, CacheManager};
use async_trait::async_trait;
use chrono::Duration;
use log::{debug, trace, warn};
use std::env;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::fs;

/// Used to give each temporary file a distinct name.
static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Represents a cache manager which stores the data in files.
///
/// The cache has the following structure:
/// cves/
///   \__<cpe_vendor>/
///        \__<cpe_product>
///              \__<version>.json
///
/// Each JSON file contains a [`CacheEntry`]: the CVEs of the product and
/// the time of the last refresh. Files are written to a temporary file
/// then renamed, so a reader sees either the previous or the new entry.
pub struct FileCacheManager {
    root_dir: PathBuf,
    clock: Arc<dyn Clock>,
    window: Duration,
}

impl FileCacheManager {
    pub fn new(root_dir: PathBuf, clock: Arc<dyn Clock>, window: Duration) -> Self {
        Self {
            root_dir,
            clock,
            window,
        }
    }

    /// The default location: a "cves" directory next to the executable,
    /// or in the current working directory if it can't be found.
    pub fn default_root() -> PathBuf {
        if let Ok(mut p) = env::current_exe() {
            p.pop();
            p.join("cves")
        } else {
            PathBuf::new().join("cves")
        }
    }

    fn entry_path(&self, product: &ProductKey) -> PathBuf {
        self.root_dir
            .join(&product.vendor)
            .join(&product.product)
            .join(format!("{}.json", product.version))
    }

    async fn read_entry(path: &Path) -> Result<Option<CacheEntry>, CacheError> {
        match fs::read(path).await {
            Ok(content) => Ok(Some(serde_json::from_slice(&content)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Lists the files of the cache, at the <vendor>/<product>/<version>.json depth.
    async fn entry_files(&self) -> Result<Vec<PathBuf>, CacheError> {
        let mut files = Vec::new();
        let mut level = vec![self.root_dir.clone()];
        for _depth in 0..2 {
            let mut next = Vec::new();
            for dir in level {
                let mut read_dir = match fs::read_dir(&dir).await {
                    Ok(r) => r,
                    Err(e) if e.kind() == ErrorKind::NotFound => continue,
                    Err(e) => return Err(e.into()),
                };
                while let Some(item) = read_dir.next_entry().await? {
                    if item.file_type().await?.is_dir() {
                        next.push(item.path());
                    }
                }
            }
            level = next;
        }
        for dir in level {
            let mut read_dir = fs::read_dir(&dir).await?;
            while let Some(item) = read_dir.next_entry().await? {
                let path = item.path();
                if path.extension().is_some_and(|ext| ext == "json") {
                    files.push(path);
                }
            }
        }
        files.sort();
        Ok(files)
    }
}

#[async_trait]
impl CacheManager for FileCacheManager {
    async fn lookup(&self, product: &ProductKey) -> Result<Option<CacheEntry>, CacheError> {
        trace!("Running FileCacheManager::lookup() for {}", product);
        let path = self.entry_path(product);
        let entry = Self::read_entry(&path).await?;
        if let Some(e) = entry.as_ref() {
            if e.product_key != product.cache_key() {
                return Err(CacheError::Corrupted {
                    product: product.cache_key(),
                    message: format!("{} holds {}", path.to_string_lossy(), e.product_key),
                });
            }
        }
        Ok(entry)
    }

    async fn upsert(
        &self,
        product: &ProductKey,
        records: Vec<VulnerabilityRecord>,
    ) -> Result<(), CacheError> {
        trace!("Running FileCacheManager::upsert() for {}", product);
        let entry = CacheEntry::new(product, records, self.clock.now());
        let json = serde_json::to_vec(&entry)?;

        let filename = self.entry_path(product);
        if let Some(dirname) = filename.parent() {
            fs::create_dir_all(dirname).await?;
        }

        let tmp_filename = filename.with_extension(format!(
            "json.{}-{}.tmp",
            std::process::id(),
            TMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        fs::write(&tmp_filename, &json).await?;
        if let Err(e) = fs::rename(&tmp_filename, &filename).await {
            warn!(
                "Unable to move {} to {}",
                tmp_filename.to_string_lossy(),
                filename.to_string_lossy()
            );
            let _ = fs::remove_file(&tmp_filename).await;
            return Err(e.into());
        }
        debug!(
            "Stored {} CVEs in {}",
            entry.records.len(),
            filename.to_string_lossy()
        );
        Ok(())
    }

    async fn record(&self, cve_id: &str) -> Result<Option<VulnerabilityRecord>, CacheError> {
        for path in self.entry_files().await? {
            match Self::read_entry(&path).await {
                Ok(Some(entry)) => {
                    if let Some(record) = entry.records.into_iter().find(|r| r.id == cve_id) {
                        return Ok(Some(record));
                    }
                }
                Ok(None) => {}
                Err(e) => warn!("Skipping unreadable cache file {}: {}", path.to_string_lossy(), e),
            }
        }
        Ok(None)
    }

    fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    fn freshness_window(&self) -> Duration {
        self.window
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::models::fixtures::record;
    use crate::models::CpePart;
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    fn setup() -> (TempDir, Arc<ManualClock>, FileCacheManager) {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 5, 5, 10, 0, 0).unwrap(),
        ));
        let cache = FileCacheManager::new(dir.path().to_path_buf(), clock.clone(), Duration::days(7));
        (dir, clock, cache)
    }

    fn apache() -> ProductKey {
        ProductKey::new(CpePart::Application, "apache", "http_server", "2.4.49")
    }

    #[tokio::test]
    async fn stores_entries_in_the_vendor_product_tree() {
        let (dir, _clock, cache) = setup();
        cache
            .upsert(&apache(), vec![record("CVE-2021-41773", "apache:http_server:2.4.49", Some(7.5))])
            .await
            .unwrap();
        let path = dir.path().join("apache").join("http_server").join("2.4.49.json");
        assert!(path.exists());

        let records = cache.read(&apache()).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "CVE-2021-41773");
        assert_eq!(records[0].cvss_score, Some(7.5));
    }

    #[tokio::test]
    async fn missing_entry_reads_empty() {
        let (_dir, _clock, cache) = setup();
        assert!(cache.lookup(&apache()).await.unwrap().is_none());
        assert!(cache.read(&apache()).await.unwrap().is_empty());
        assert!(!cache.is_fresh(&apache()).await.unwrap());
    }

    #[tokio::test]
    async fn freshness_survives_a_new_manager() {
        let (dir, clock, cache) = setup();
        cache.upsert(&apache(), Vec::new()).await.unwrap();
        assert!(cache.is_fresh(&apache()).await.unwrap());

        let reopened = FileCacheManager::new(dir.path().to_path_buf(), clock.clone(), Duration::days(7));
        assert!(reopened.is_fresh(&apache()).await.unwrap());
        clock.advance(Duration::days(7));
        assert!(!reopened.is_fresh(&apache()).await.unwrap());
    }

    #[tokio::test]
    async fn duplicated_ids_are_merged() {
        let (_dir, _clock, cache) = setup();
        let records = vec![
            record("CVE-2021-41773", "apache:http_server:2.4.49", Some(7.5)),
            record("CVE-2021-41773", "apache:http_server:2.4.49", Some(9.8)),
        ];
        cache.upsert(&apache(), records).await.unwrap();
        let stored = cache.read(&apache()).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].cvss_score, Some(9.8));
    }

    #[tokio::test]
    async fn invalid_file_is_an_error() {
        let (dir, _clock, cache) = setup();
        let path = dir.path().join("apache").join("http_server");
        std::fs::create_dir_all(&path).unwrap();
        std::fs::write(path.join("2.4.49.json"), b"not json").unwrap();
        assert!(matches!(
            cache.lookup(&apache()).await,
            Err(CacheError::Serialization(_))
        ));
    }

    #[tokio::test]
    async fn finds_a_record_across_products() {
        let (_dir, _clock, cache) = setup();
        let openssh = ProductKey::new(CpePart::Application, "openssh", "openssh", "8.2p1");
        cache
            .upsert(&apache(), vec![record("CVE-2021-41773", "apache:http_server:2.4.49", Some(7.5))])
            .await
            .unwrap();
        cache
            .upsert(&openssh, vec![record("CVE-2020-15778", "openssh:openssh:8.2p1", Some(7.8))])
            .await
            .unwrap();
        let found = cache.record("CVE-2020-15778").await.unwrap().unwrap();
        assert_eq!(found.product_key, "openssh:openssh:8.2p1");
        assert!(cache.record("CVE-1999-0001").await.unwrap().is_none());
    }
}
