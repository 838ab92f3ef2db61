//! Settings of an analysis run.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// The default NVD CVE API endpoint.
pub const NVD_API_URL: &str = "https://services.nvd.nist.gov/rest/json/cves/2.0";

/// Represents the configuration of the analyzer
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// Vulnerabilities scored below this value are dropped
    pub min_cvss_score: f32,
    /// Maximum number of findings for the whole run
    pub max_results: usize,
    /// How long a cache entry stays fresh
    pub freshness_window_days: u32,
    /// Number of services correlated at the same time
    pub concurrency: usize,
    pub feed: FeedConfig,
}

/// Represents the configuration of the feed client
#[derive(Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct FeedConfig {
    /// The NVD API key, sent in the apiKey header
    pub api_key: Option<String>,
    pub url: String,
    /// Total number of attempts when the feed throttles
    pub max_attempts: u32,
    /// Delay before the first retry, doubled on each attempt
    #[serde(with = "millis")]
    pub backoff_base: Duration,
    /// Timeout of each HTTP call
    #[serde(with = "millis")]
    pub request_timeout: Duration,
    pub results_per_page: u32,
    /// Minimum delay between two requests. When unset, it depends on
    /// whether an API key is used.
    #[serde(with = "opt_millis")]
    pub request_delay: Option<Duration>,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            min_cvss_score: 0.0,
            max_results: 100,
            freshness_window_days: 7,
            concurrency: 4,
            feed: FeedConfig::default(),
        }
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            url: NVD_API_URL.to_string(),
            max_attempts: 3,
            backoff_base: Duration::from_secs(1),
            request_timeout: Duration::from_secs(30),
            results_per_page: 2000,
            request_delay: None,
        }
    }
}

/// The NVD allows 5 requests per 30 seconds without a key, 50 with one.
const KEYLESS_REQUEST_DELAY: Duration = Duration::from_secs(6);
const KEYED_REQUEST_DELAY: Duration = Duration::from_millis(600);

impl FeedConfig {
    /// The delay enforced between two requests to the feed.
    pub fn request_interval(&self) -> Duration {
        match (self.request_delay, self.api_key.is_some()) {
            (Some(delay), _) => delay,
            (None, true) => KEYED_REQUEST_DELAY,
            (None, false) => KEYLESS_REQUEST_DELAY,
        }
    }
}

// The API key must not end up in logs.
impl std::fmt::Debug for FeedConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("url", &self.url)
            .field("max_attempts", &self.max_attempts)
            .field("backoff_base", &self.backoff_base)
            .field("request_timeout", &self.request_timeout)
            .field("results_per_page", &self.results_per_page)
            .field("request_delay", &self.request_delay)
            .finish()
    }
}

impl AnalyzerConfig {
    /// The freshness window as a duration.
    pub fn freshness_window(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.freshness_window_days))
    }

    /// Checks that every value is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=10.0).contains(&self.min_cvss_score) {
            return Err(invalid(
                "min_cvss_score",
                format!("{} is not between 0.0 and 10.0", self.min_cvss_score),
            ));
        }
        if self.max_results == 0 {
            return Err(invalid("max_results", "must be greater than 0".to_string()));
        }
        if self.freshness_window_days == 0 {
            return Err(invalid(
                "freshness_window_days",
                "must be greater than 0".to_string(),
            ));
        }
        if self.concurrency == 0 {
            return Err(invalid("concurrency", "must be greater than 0".to_string()));
        }
        if self.feed.max_attempts == 0 {
            return Err(invalid("max_attempts", "must be greater than 0".to_string()));
        }
        if self.feed.results_per_page == 0 || self.feed.results_per_page > 2000 {
            return Err(invalid(
                "results_per_page",
                format!("{} is not between 1 and 2000", self.feed.results_per_page),
            ));
        }
        Ok(())
    }
}

fn invalid(key: &'static str, message: String) -> ConfigError {
    ConfigError::Invalid { key, message }
}

/// (De)serializes a Duration as a number of milliseconds.
mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Same as [`millis`] for an optional Duration.
mod opt_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(value) => serializer.serialize_some(&(value.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(deserializer).map(|value| value.map(Duration::from_millis))
    }
}
