//! This module implements a vulnerability fetcher which downloads
//! the CVEs from the NVD.
//! https://nvd.nist.gov/developers/vulnerabilities

use crate::config::FeedConfig;
use crate::error::FeedError;
use crate::models::{ProductKey, VulnerabilityRecord};
use crate::vulnerabilities::fetchers::VulnFetcher;
use async_trait::async_trait;
use chrono::NaiveDateTime;
use log::{debug, error, info, trace, warn};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Format of the NVD timestamps.
/// Example: 2018-01-18T23:29:00.213
const NVD_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// This structs represents the NVD vulnerabilities fetcher.
pub struct NVDFetcher {
    client: Client,
    config: FeedConfig,
    /// When the last request was sent, shared by concurrent fetches
    last_request: Mutex<Option<Instant>>,
}

/// The outcome of one page request.
enum Page {
    Found(APIResponse),
    /// The NVD answered 404: nothing matches the CPE name.
    NotFound,
}

impl NVDFetcher {
    /// Creates a new NVDFetcher.
    /// The per-call timeout of the configuration is applied to every request.
    pub fn new(config: FeedConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!("vulnmap/", env!("CARGO_PKG_VERSION")))
            .build()?;
        if let Some(key) = config.api_key.as_ref() {
            debug!("Using NVD API key {}...", key.chars().take(8).collect::<String>());
        } else {
            warn!("No NVD API key provided, the NVD will throttle requests heavily");
        }
        debug!("At least {:?} between two NVD requests", config.request_interval());
        Ok(Self {
            client,
            config,
            last_request: Mutex::new(None),
        })
    }

    /// Waits until the request interval has elapsed since the last request.
    /// The lock is held while waiting so requests leave one at a time.
    async fn pace(&self) {
        let mut last_request = self.last_request.lock().await;
        if let Some(last) = *last_request {
            let next = last + self.config.request_interval();
            let now = Instant::now();
            if next > now {
                trace!("Waiting {:?} before the next NVD request", next - now);
                tokio::time::sleep_until(next).await;
            }
        }
        *last_request = Some(Instant::now());
    }

    /// The delay to wait after the given attempt (starting at 0) was throttled.
    fn backoff_delay(&self, attempt: u32) -> Duration {
        self.config
            .backoff_base
            .saturating_mul(1u32 << attempt.min(16))
    }

    /// Fetches one page of results, retrying while the NVD throttles.
    async fn fetch_page(&self, product: &ProductKey, start_index: u32) -> Result<Page, FeedError> {
        trace!("Running NVDFetcher::fetch_page()");
        let cpe_name = product.cpe_name();
        let max_attempts = self.config.max_attempts;

        for attempt in 0..max_attempts {
            debug!(
                "Requesting NVD for {} (start index {}, attempt {}/{})",
                cpe_name,
                start_index,
                attempt + 1,
                max_attempts
            );
            let mut request = self.client.get(&self.config.url).query(&[
                ("cpeName", cpe_name.clone()),
                ("resultsPerPage", self.config.results_per_page.to_string()),
                ("startIndex", start_index.to_string()),
            ]);
            if let Some(key) = self.config.api_key.as_ref() {
                request = request.header("apiKey", key);
            }

            self.pace().await;
            let response = request.send().await.map_err(|e| {
                error!("Error while communicating with NVD. {:?}", e);
                FeedError::Transport {
                    product: product.cache_key(),
                    message: e.to_string(),
                }
            })?;

            let status = response.status();
            if status == StatusCode::NOT_FOUND {
                return Ok(Page::NotFound);
            }
            if status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::FORBIDDEN {
                if attempt + 1 < max_attempts {
                    let delay = self.backoff_delay(attempt);
                    warn!(
                        "NVD throttled the request for {} ({}), retrying in {:?}",
                        cpe_name, status, delay
                    );
                    tokio::time::sleep(delay).await;
                }
                continue;
            }
            if !status.is_success() {
                error!("Invalid HTTP response code: {}", status);
                return Err(FeedError::Transport {
                    product: product.cache_key(),
                    message: format!("unexpected HTTP status {}", status),
                });
            }

            let body = response.text().await.map_err(|e| FeedError::Transport {
                product: product.cache_key(),
                message: e.to_string(),
            })?;
            let api_response: APIResponse = serde_json::from_str(&body).map_err(|e| {
                error!("Invalid JSON returned by NVD API. {}", e);
                FeedError::Response {
                    product: product.cache_key(),
                    message: e.to_string(),
                }
            })?;
            return Ok(Page::Found(api_response));
        }

        error!(
            "NVD still throttling after {} attempts for {}",
            max_attempts, cpe_name
        );
        Err(FeedError::Unavailable {
            product: product.cache_key(),
            attempts: max_attempts,
        })
    }
}

#[async_trait]
impl VulnFetcher for NVDFetcher {
    /// Fetches all the pages of CVEs matching the product.
    async fn fetch(&self, product: &ProductKey) -> Result<Vec<VulnerabilityRecord>, FeedError> {
        trace!("Running NVDFetcher::fetch()");
        let mut records = Vec::new();
        let mut start_index: u32 = 0;

        loop {
            let page = match self.fetch_page(product, start_index).await? {
                Page::Found(page) => page,
                Page::NotFound => {
                    info!("No vulnerabilities known by the NVD for {}", product);
                    break;
                }
            };

            let received = page.vulnerabilities.len() as u32;
            for vulnerability in page.vulnerabilities {
                records.push(vulnerability.cve.into_record(product)?);
            }
            start_index += received;
            if received == 0 || start_index >= page.total_results {
                break;
            }
        }

        info!("Fetched {} vulnerabilities for {}", records.len(), product);
        Ok(records)
    }
}

/// Represents the main JSON object returned by the NVD CVE API.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct APIResponse {
    /// The number of results by page.
    #[serde(default)]
    pub results_per_page: u32,
    /// The start index.
    #[serde(default)]
    pub start_index: u32,
    /// The number of results matching the query, over all pages.
    #[serde(default)]
    pub total_results: u32,
    /// The list of vulnerabilities.
    #[serde(default)]
    pub vulnerabilities: Vec<Vulnerability>,
}

/// Represents a vulnerability returned as part of the APIResponse.
#[derive(Debug, Deserialize)]
pub struct Vulnerability {
    /// The CVE.
    pub cve: CVE,
}

/// Represents a CVE as returned as part of the Vulnerability.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CVE {
    /// The CVE identifier.
    /// Example: CVE-2012-6708
    pub id: String,
    /// When the CVE was published.
    /// Example: 2018-01-18T23:29:00.213
    pub published: String,
    /// When the CVE was modified.
    /// Example: 2023-11-07T02:13:33.290
    pub last_modified: String,
    /// The descriptions of the CVE.
    /// Example: [{"lang": "en", "value": "jQuery before 1.9.0 is vulnerable to [...]"}]
    #[serde(default)]
    pub descriptions: Vec<CVEDescription>,
    /// The metrics related to the CVE.
    #[serde(default)]
    pub metrics: CVEMetrics,
    #[serde(default)]
    pub references: Vec<CVEReference>,
    /// Passed through as is.
    #[serde(default)]
    pub configurations: serde_json::Value,
}

impl CVE {
    /// Converts the NVD representation to a [`VulnerabilityRecord`].
    pub fn into_record(self, product: &ProductKey) -> Result<VulnerabilityRecord, FeedError> {
        let malformed = |message: String| FeedError::Response {
            product: product.cache_key(),
            message,
        };

        let published_at = parse_nvd_time(&self.published)
            .ok_or_else(|| malformed(format!("{}: invalid published date {}", self.id, self.published)))?;
        let last_modified_at = parse_nvd_time(&self.last_modified).ok_or_else(|| {
            malformed(format!(
                "{}: invalid last modified date {}",
                self.id, self.last_modified
            ))
        })?;

        let (cvss_score, cvss_vector) = match self.metrics.preferred() {
            Some(data) => {
                if !(0.0..=10.0).contains(&data.base_score) {
                    return Err(malformed(format!(
                        "{}: CVSS score {} out of range",
                        self.id, data.base_score
                    )));
                }
                (Some(data.base_score), Some(data.vector_string.clone()))
            }
            None => (None, None),
        };

        // Prefer the English description
        let description = self
            .descriptions
            .iter()
            .find(|d| d.lang == "en")
            .or_else(|| self.descriptions.first())
            .map(|d| d.value.clone())
            .unwrap_or_default();

        let mut references: Vec<String> = Vec::with_capacity(self.references.len());
        for reference in self.references {
            if !references.contains(&reference.url) {
                references.push(reference.url);
            }
        }

        Ok(VulnerabilityRecord {
            id: self.id,
            product_key: product.cache_key(),
            description,
            published_at,
            last_modified_at,
            cvss_score,
            cvss_vector,
            references,
            raw_configurations: self.configurations,
        })
    }
}

fn parse_nvd_time(value: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value, NVD_TIME_FORMAT).ok()
}

/// Represents a description as part of a CVE.
#[derive(Debug, Deserialize)]
pub struct CVEDescription {
    /// The language of the description.
    /// Example: en
    pub lang: String,
    /// The content of the description.
    /// Example: jQuery before 1.9.0 is vulnerable to [...]
    pub value: String,
}

/// Represents a reference as part of a CVE.
#[derive(Debug, Deserialize)]
pub struct CVEReference {
    /// Example: https://httpd.apache.org/security/vulnerabilities_24.html
    pub url: String,
}

/// Represents the metrics as part of a CVE.
#[derive(Debug, Default, Deserialize)]
pub struct CVEMetrics {
    /// The data about CVSS 3.1
    #[serde(rename = "cvssMetricV31", default)]
    pub cvss_metric_v31: Vec<CVSSMetric>,
    /// The data about CVSS 3.0
    #[serde(rename = "cvssMetricV30", default)]
    pub cvss_metric_v30: Vec<CVSSMetric>,
    /// The data about CVSS 2
    #[serde(rename = "cvssMetricV2", default)]
    pub cvss_metric_v2: Vec<CVSSMetric>,
}

impl CVEMetrics {
    /// Returns the data of the newest CVSS version present.
    /// An empty list falls back to the previous version.
    pub fn preferred(&self) -> Option<&CVSSData> {
        [
            &self.cvss_metric_v31,
            &self.cvss_metric_v30,
            &self.cvss_metric_v2,
        ]
        .into_iter()
        .find(|metrics| !metrics.is_empty())
        .map(|metrics| {
            // The NVD's own metric is flagged as Primary
            metrics
                .iter()
                .find(|m| m.metric_type.as_deref() == Some("Primary"))
                .unwrap_or(&metrics[0])
        })
        .map(|metric| &metric.cvss_data)
    }
}

/// Represents a CVSS metric.
#[derive(Debug, Deserialize)]
pub struct CVSSMetric {
    /// The source of the metric.
    /// Example: nvd@nist.gov
    pub source: Option<String>,
    /// The type of metric.
    /// Example: Primary
    #[serde(rename = "type")]
    pub metric_type: Option<String>,
    /// The CVSS data
    #[serde(rename = "cvssData")]
    pub cvss_data: CVSSData,
}

/// Represents the part of the CVSS data used here. It is the same for
/// all CVSS versions.
#[derive(Debug, Deserialize)]
pub struct CVSSData {
    /// The version of CVSS.
    /// Example: 3.1
    pub version: Option<String>,
    /// The vector string.
    #[serde(rename = "vectorString")]
    pub vector_string: String,
    /// The base score.
    #[serde(rename = "baseScore")]
    pub base_score: f32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CpePart, Severity};
    use serde_json::{json, Value};
    use wiremock::matchers::{header, method, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn apache() -> ProductKey {
        ProductKey::new(CpePart::Application, "apache", "http_server", "2.4.49")
    }

    fn config(server: &MockServer) -> FeedConfig {
        FeedConfig {
            api_key: Some("test-key".to_string()),
            url: server.uri(),
            max_attempts: 3,
            backoff_base: Duration::from_millis(1),
            request_timeout: Duration::from_secs(5),
            results_per_page: 2000,
            request_delay: Some(Duration::ZERO),
        }
    }

    fn metric(version: &str, score: f32) -> Value {
        json!({
            "source": "nvd@nist.gov",
            "type": "Primary",
            "cvssData": {
                "version": version,
                "vectorString": format!("CVSS:{}/AV:N", version),
                "baseScore": score
            }
        })
    }

    fn cve(id: &str, metrics: Value) -> Value {
        json!({
            "cve": {
                "id": id,
                "sourceIdentifier": "security@apache.org",
                "published": "2021-10-05T09:15:07.593",
                "lastModified": "2023-11-07T03:39:36.747",
                "vulnStatus": "Analyzed",
                "descriptions": [
                    {"lang": "es", "value": "Una falla"},
                    {"lang": "en", "value": "A path traversal attack allows remote code execution."}
                ],
                "metrics": metrics,
                "references": [
                    {"url": "https://httpd.apache.org/security/vulnerabilities_24.html"},
                    {"url": "https://httpd.apache.org/security/vulnerabilities_24.html"}
                ],
                "configurations": [{"nodes": [{"operator": "OR", "negate": false, "cpeMatch": []}]}]
            }
        })
    }

    fn page(vulnerabilities: Vec<Value>, total: usize) -> Value {
        json!({
            "resultsPerPage": vulnerabilities.len(),
            "startIndex": 0,
            "totalResults": total,
            "format": "NVD_CVE",
            "version": "2.0",
            "timestamp": "2024-05-05T10:00:00.000",
            "vulnerabilities": vulnerabilities
        })
    }

    #[tokio::test]
    async fn fetches_and_converts_records() {
        let server = MockServer::start().await;
        let body = page(
            vec![cve(
                "CVE-2021-41773",
                json!({"cvssMetricV31": [metric("3.1", 7.5)], "cvssMetricV2": [metric("2.0", 4.3)]}),
            )],
            1,
        );
        Mock::given(method("GET"))
            .and(query_param(
                "cpeName",
                "cpe:2.3:a:apache:http_server:2.4.49:*:*:*:*:*:*:*",
            ))
            .and(header("apiKey", "test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .expect(1)
            .mount(&server)
            .await;

        let fetcher = NVDFetcher::new(config(&server)).unwrap();
        let records = fetcher.fetch(&apache()).await.unwrap();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.id, "CVE-2021-41773");
        assert_eq!(record.product_key, "apache:http_server:2.4.49");
        assert_eq!(record.cvss_score, Some(7.5));
        assert_eq!(record.cvss_vector.as_deref(), Some("CVSS:3.1/AV:N"));
        assert_eq!(record.severity(), Severity::High);
        assert!(record.description.starts_with("A path traversal"));
        assert_eq!(record.references.len(), 1);
        assert!(record.raw_configurations.is_array());
    }

    #[tokio::test]
    async fn falls_back_to_older_cvss_versions() {
        let server = MockServer::start().await;
        let body = page(
            vec![
                cve(
                    "CVE-0001",
                    json!({"cvssMetricV31": [], "cvssMetricV30": [metric("3.0", 9.8)]}),
                ),
                cve("CVE-0002", json!({"cvssMetricV2": [metric("2.0", 5.0)]})),
                cve("CVE-0003", json!({})),
            ],
            3,
        );
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&server)
            .await;

        let fetcher = NVDFetcher::new(config(&server)).unwrap();
        let records = fetcher.fetch(&apache()).await.unwrap();
        assert_eq!(records[0].cvss_score, Some(9.8));
        assert_eq!(records[0].severity(), Severity::Critical);
        assert_eq!(records[1].cvss_score, Some(5.0));
        assert_eq!(records[1].cvss_vector.as_deref(), Some("CVSS:2.0/AV:N"));
        assert_eq!(records[2].cvss_score, None);
        assert_eq!(records[2].severity(), Severity::Unknown);
    }

    #[tokio::test]
    async fn not_found_is_an_empty_result() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let fetcher = NVDFetcher::new(config(&server)).unwrap();
        assert!(fetcher.fetch(&apache()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn persistent_throttling_makes_the_feed_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429))
            .expect(3)
            .mount(&server)
            .await;

        let fetcher = NVDFetcher::new(config(&server)).unwrap();
        let error = fetcher.fetch(&apache()).await.unwrap_err();
        assert_eq!(
            error,
            FeedError::Unavailable {
                product: "apache:http_server:2.4.49".to_string(),
                attempts: 3
            }
        );
    }

    #[tokio::test]
    async fn retries_after_throttling() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(page(
                vec![cve("CVE-2021-41773", json!({"cvssMetricV31": [metric("3.1", 7.5)]}))],
                1,
            )))
            .expect(1)
            .mount(&server)
            .await;

        let fetcher = NVDFetcher::new(config(&server)).unwrap();
        let records = fetcher.fetch(&apache()).await.unwrap();
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn server_errors_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let fetcher = NVDFetcher::new(config(&server)).unwrap();
        let error = fetcher.fetch(&apache()).await.unwrap_err();
        assert!(matches!(error, FeedError::Transport { .. }));
    }

    #[tokio::test]
    async fn malformed_payload_is_a_response_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
            .mount(&server)
            .await;

        let fetcher = NVDFetcher::new(config(&server)).unwrap();
        let error = fetcher.fetch(&apache()).await.unwrap_err();
        assert!(matches!(error, FeedError::Response { .. }));
    }

    #[tokio::test]
    async fn out_of_range_score_is_a_response_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(page(
                vec![cve("CVE-0001", json!({"cvssMetricV31": [metric("3.1", 42.0)]}))],
                1,
            )))
            .mount(&server)
            .await;

        let fetcher = NVDFetcher::new(config(&server)).unwrap();
        assert!(matches!(
            fetcher.fetch(&apache()).await,
            Err(FeedError::Response { .. })
        ));
    }

    #[tokio::test]
    async fn follows_pagination() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("startIndex", "0"))
            .respond_with(ResponseTemplate::new(200).set_body_json(page(
                vec![cve("CVE-0001", json!({"cvssMetricV31": [metric("3.1", 9.8)]}))],
                2,
            )))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(query_param("startIndex", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(page(
                vec![cve("CVE-0002", json!({"cvssMetricV31": [metric("3.1", 5.3)]}))],
                2,
            )))
            .expect(1)
            .mount(&server)
            .await;

        let mut config = config(&server);
        config.results_per_page = 1;
        let fetcher = NVDFetcher::new(config).unwrap();
        let records = fetcher.fetch(&apache()).await.unwrap();
        let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["CVE-0001", "CVE-0002"]);
    }

    #[tokio::test]
    async fn pages_are_spaced_by_the_request_delay() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("startIndex", "0"))
            .respond_with(ResponseTemplate::new(200).set_body_json(page(
                vec![cve("CVE-0001", json!({"cvssMetricV31": [metric("3.1", 9.8)]}))],
                2,
            )))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(query_param("startIndex", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(page(
                vec![cve("CVE-0002", json!({"cvssMetricV31": [metric("3.1", 5.3)]}))],
                2,
            )))
            .mount(&server)
            .await;

        let mut config = config(&server);
        config.results_per_page = 1;
        config.request_delay = Some(Duration::from_millis(200));
        let fetcher = NVDFetcher::new(config).unwrap();
        let start = Instant::now();
        assert_eq!(fetcher.fetch(&apache()).await.unwrap().len(), 2);
        assert!(start.elapsed() >= Duration::from_millis(200));
    }

    #[tokio::test]
    async fn concurrent_fetches_share_the_request_delay() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(3)
            .mount(&server)
            .await;

        let mut config = config(&server);
        config.request_delay = Some(Duration::from_millis(150));
        let fetcher = NVDFetcher::new(config).unwrap();
        let nginx = ProductKey::new(CpePart::Application, "nginx", "nginx", "1.18.0");
        let openssh = ProductKey::new(CpePart::Application, "openssh", "openssh", "8.2p1");
        let apache = apache();
        let start = Instant::now();
        let (a, b, c) = tokio::join!(
            fetcher.fetch(&apache),
            fetcher.fetch(&nginx),
            fetcher.fetch(&openssh)
        );
        assert!(a.is_ok() && b.is_ok() && c.is_ok());
        // Three requests, two intervals
        assert!(start.elapsed() >= Duration::from_millis(300));
    }

    #[test]
    fn backoff_doubles() {
        let fetcher = NVDFetcher::new(FeedConfig::default()).unwrap();
        assert_eq!(fetcher.backoff_delay(0), Duration::from_secs(1));
        assert_eq!(fetcher.backoff_delay(1), Duration::from_secs(2));
        assert_eq!(fetcher.backoff_delay(2), Duration::from_secs(4));
    }
}
