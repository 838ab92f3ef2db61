//! The correlation engine.
//!
//! Each (host, service) pair goes through the same steps: the banner is
//! parsed, the vulnerabilities of the product are read from the cache or
//! refreshed from the feed, then classified and filtered. Pairs are
//! processed concurrently, refreshes of a same product are not.

pub mod cancel;
pub mod locks;

pub use cancel::Cancellation;

use crate::aggregation::risk;
use crate::checkers::BannerChecker;
use crate::config::AnalyzerConfig;
use crate::error::FeedError;
use crate::models::{Finding, Network, NetworkHost, ProductKey, VulnerabilityRecord};
use crate::vulnerabilities::cache_managers::{dedup_records, CacheEntry, CacheManager};
use crate::vulnerabilities::fetchers::VulnFetcher;
use futures::stream::{self, StreamExt};
use locks::KeyedLocks;
use log::{debug, error, info, trace, warn};
use serde::Serialize;
use std::sync::Arc;

/// How the vulnerabilities of a service were obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ServiceStatus {
    /// No product could be derived from the banner
    Skipped,
    /// Refreshed from the feed during this run
    Fresh,
    /// Read from a fresh cache entry
    Cached,
    /// The feed failed, an outdated cache entry was used instead
    Stale,
    /// The feed failed and nothing was cached. The service could not be checked.
    Unchecked,
}

impl ServiceStatus {
    /// Whether the service could not be assessed with up-to-date data.
    pub fn is_degraded(&self) -> bool {
        matches!(self, ServiceStatus::Stale | ServiceStatus::Unchecked)
    }
}

/// The outcome of a (host, service) pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceAssessment {
    pub ip: String,
    pub service: String,
    pub product_key: Option<String>,
    pub status: ServiceStatus,
    /// The number of vulnerabilities left after filtering
    pub vulnerabilities: usize,
    /// Why the feed could not be used, if it couldn't
    pub error: Option<String>,
}

/// The vulnerabilities known for a product and where they come from.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub status: ServiceStatus,
    pub records: Vec<VulnerabilityRecord>,
    pub error: Option<String>,
}

/// The result of the analysis of a network.
#[derive(Debug, Clone, Default)]
pub struct Analysis {
    /// Findings in emission order: hosts and services in input order,
    /// highest score first within a service
    pub findings: Vec<Finding>,
    /// One entry per (host, service) pair, in input order
    pub assessments: Vec<ServiceAssessment>,
    /// The number of findings dropped by the max_results cap
    pub truncated: usize,
}

impl Analysis {
    /// Whether some services were assessed with outdated data or not at all.
    pub fn degraded(&self) -> bool {
        self.assessments.iter().any(|a| a.status.is_degraded())
    }

    pub fn unchecked(&self) -> impl Iterator<Item = &ServiceAssessment> {
        self.assessments
            .iter()
            .filter(|a| a.status == ServiceStatus::Unchecked)
    }
}

/// The state of one (host, service) pair once its records are filtered.
struct ServiceOutcome<'a> {
    host: &'a NetworkHost,
    service: &'a str,
    product: Option<ProductKey>,
    resolution: Resolution,
}

pub struct Correlator {
    checker: BannerChecker,
    fetcher: Arc<dyn VulnFetcher>,
    cache: Arc<dyn CacheManager>,
    config: AnalyzerConfig,
    locks: KeyedLocks,
}

impl Correlator {
    pub fn new(
        fetcher: Arc<dyn VulnFetcher>,
        cache: Arc<dyn CacheManager>,
        config: AnalyzerConfig,
    ) -> Self {
        Self {
            checker: BannerChecker::new(),
            fetcher,
            cache,
            config,
            locks: KeyedLocks::new(),
        }
    }

    /// Analyzes every service of every host of the network.
    ///
    /// Never fails: feed and cache errors are downgraded to stale data or
    /// unchecked services, see [`ServiceStatus`].
    pub async fn analyze(&self, network: &Network, cancel: &Cancellation) -> Analysis {
        info!(
            "Analyzing {} hosts of {}",
            network.hosts.len(),
            network.location
        );
        let jobs: Vec<(&NetworkHost, &str)> = network
            .hosts
            .iter()
            .flat_map(|host| host.services.iter().map(move |s| (host, s.as_str())))
            .collect();

        // buffered() yields in input order whatever the completion order
        let outcomes: Vec<ServiceOutcome> = stream::iter(jobs)
            .map(|(host, service)| self.assess_service(host, service, cancel))
            .buffered(self.config.concurrency.max(1))
            .collect()
            .await;

        let analysis = self.assemble(outcomes);
        info!(
            "{} findings ({} dropped by the cap), degraded: {}",
            analysis.findings.len(),
            analysis.truncated,
            analysis.degraded()
        );
        analysis
    }

    /// Returns the vulnerabilities of a product above the minimum score,
    /// highest score first.
    pub async fn product_vulnerabilities(
        &self,
        product: &ProductKey,
        cancel: &Cancellation,
    ) -> Resolution {
        let mut resolution = self.resolve(product, cancel).await;
        resolution.records = self.filter(resolution.records);
        resolution
    }

    /// Looks for a CVE in the cache.
    pub async fn vulnerability_details(&self, cve_id: &str) -> Option<VulnerabilityRecord> {
        match self.cache.record(cve_id).await {
            Ok(record) => record,
            Err(e) => {
                warn!("Unable to read {} from the cache: {}", cve_id, e);
                None
            }
        }
    }

    async fn assess_service<'a>(
        &self,
        host: &'a NetworkHost,
        service: &'a str,
        cancel: &Cancellation,
    ) -> ServiceOutcome<'a> {
        trace!("Assessing {} on {}", service, host.ip);
        let descriptor = self.checker.parse(service);
        let Some(product) = descriptor.product_key else {
            debug!("No product recognized in {:?} on {}, skipping", service, host.ip);
            return ServiceOutcome {
                host,
                service,
                product: None,
                resolution: Resolution {
                    status: ServiceStatus::Skipped,
                    records: Vec::new(),
                    error: None,
                },
            };
        };
        let resolution = self.product_vulnerabilities(&product, cancel).await;
        ServiceOutcome {
            host,
            service,
            product: Some(product),
            resolution,
        }
    }

    /// Gets the records of a product from the cache, or from the feed when
    /// the cache has no fresh entry. At most one task resolves a given
    /// product at a time: the others wait, then find the fresh entry.
    async fn resolve(&self, product: &ProductKey, cancel: &Cancellation) -> Resolution {
        let _guard = self.locks.lock(&product.cache_key()).await;

        let cached = match self.cache.lookup(product).await {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Cache read failed for {}, querying the feed: {}", product, e);
                None
            }
        };
        let now = self.cache.clock().now();
        if let Some(entry) = cached.as_ref() {
            if entry.is_fresh(now, self.cache.freshness_window()) {
                debug!("Fresh cache entry for {}", product);
                return Resolution {
                    status: ServiceStatus::Cached,
                    records: entry.records.clone(),
                    error: None,
                };
            }
        }

        if cancel.is_cancelled() {
            warn!("Analysis cancelled, {} is not fetched", product);
            return Self::fall_back(product, cached, "analysis cancelled".to_string());
        }

        match self.fetcher.fetch(product).await {
            Ok(records) => {
                let records = dedup_records(records);
                debug!("{} CVEs fetched for {}", records.len(), product);
                if let Err(e) = self.cache.upsert(product, records.clone()).await {
                    warn!("Unable to cache the CVEs of {}: {}", product, e);
                }
                Resolution {
                    status: ServiceStatus::Fresh,
                    records,
                    error: None,
                }
            }
            Err(e) => {
                match &e {
                    FeedError::Unavailable { .. } => warn!("{}", e),
                    FeedError::Transport { .. } | FeedError::Response { .. } => error!("{}", e),
                }
                Self::fall_back(product, cached, e.to_string())
            }
        }
    }

    fn fall_back(product: &ProductKey, cached: Option<CacheEntry>, reason: String) -> Resolution {
        match cached {
            Some(entry) => {
                warn!(
                    "Using stale CVEs of {}, last refreshed at {}",
                    product, entry.last_refreshed_at
                );
                Resolution {
                    status: ServiceStatus::Stale,
                    records: entry.records,
                    error: Some(reason),
                }
            }
            None => {
                warn!("{} could not be checked", product);
                Resolution {
                    status: ServiceStatus::Unchecked,
                    records: Vec::new(),
                    error: Some(reason),
                }
            }
        }
    }

    /// Drops the records below the minimum score and sorts the others by
    /// descending score. Equal scores keep their order.
    fn filter(&self, records: Vec<VulnerabilityRecord>) -> Vec<VulnerabilityRecord> {
        let mut records: Vec<VulnerabilityRecord> = records
            .into_iter()
            .filter(|r| r.score_or_zero() >= self.config.min_cvss_score)
            .collect();
        records.sort_by(|a, b| b.rank_score().total_cmp(&a.rank_score()));
        records
    }

    /// Turns the outcomes into findings, keeping the `max_results` best
    /// scores of the run. Kept findings stay in emission order.
    fn assemble(&self, outcomes: Vec<ServiceOutcome>) -> Analysis {
        let candidates: Vec<(&ServiceOutcome, &VulnerabilityRecord)> = outcomes
            .iter()
            .flat_map(|o| o.resolution.records.iter().map(move |r| (o, r)))
            .collect();

        let mut kept: Vec<usize> = (0..candidates.len()).collect();
        kept.sort_by(|&a, &b| {
            candidates[b]
                .1
                .rank_score()
                .total_cmp(&candidates[a].1.rank_score())
                .then(a.cmp(&b))
        });
        kept.truncate(self.config.max_results);
        kept.sort_unstable();

        let findings: Vec<Finding> = kept
            .iter()
            .map(|&index| {
                let (outcome, record) = candidates[index];
                let Some(product) = outcome.product.as_ref() else {
                    panic!("{} was found for {} without a product", record.id, outcome.service);
                };
                Finding::new(
                    outcome.host,
                    outcome.service,
                    record,
                    risk::recommendations(record, product),
                )
            })
            .collect();
        assert!(findings.len() <= self.config.max_results);

        let assessments = outcomes
            .iter()
            .map(|o| ServiceAssessment {
                ip: o.host.ip.clone(),
                service: o.service.to_string(),
                product_key: o.product.as_ref().map(|p| p.cache_key()),
                status: o.resolution.status,
                vulnerabilities: o.resolution.records.len(),
                error: o.resolution.error.clone(),
            })
            .collect();

        Analysis {
            truncated: candidates.len() - findings.len(),
            findings,
            assessments,
        }
    }
}
