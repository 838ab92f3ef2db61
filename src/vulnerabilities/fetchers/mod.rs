/// The module fetchers defines the vulnerabilities fetchers.
pub mod nvd;

use crate::error::FeedError;
use crate::models::{ProductKey, VulnerabilityRecord};
use async_trait::async_trait;

/// A common interface between all vulnerabilities fetchers.
#[async_trait]
pub trait VulnFetcher: Send + Sync {
    /// Fetches the vulnerabilities of a product.
    ///
    /// A product without known vulnerabilities yields an empty list, not
    /// an error.
    async fn fetch(&self, product: &ProductKey) -> Result<Vec<VulnerabilityRecord>, FeedError>;
}
