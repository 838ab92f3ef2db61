//! This module contains the main structure and logic for the whole
//! application.

use crate::aggregation::Report;
use crate::clock::{Clock, SystemClock};
use crate::config::AnalyzerConfig;
use crate::correlation::{Cancellation, Correlator};
use crate::error::{AppError, ConfigError, InputError};
use crate::models::VulnerabilityRecord;
use crate::readers::network::NetworkReader;
use crate::vulnerabilities::cache_managers::files::FileCacheManager;
use crate::vulnerabilities::cache_managers::memory::MemoryCacheManager;
use crate::vulnerabilities::cache_managers::CacheManager;
use crate::vulnerabilities::fetchers::nvd::NVDFetcher;
use crate::vulnerabilities::fetchers::VulnFetcher;
use crate::vulnerabilities::CacheType;
use crate::writers::{Writer, Writers};

use clap::{ArgAction, Parser};
use log::{debug, info, trace, warn, LevelFilter};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Represents the application
pub struct Application {
    /// The arguments given on the command line.
    argv: Args,
    correlator: Correlator,
    clock: Arc<dyn Clock>,
}

impl Application {
    /// Creates a new application from the command line arguments.
    /// The configuration is loaded and checked, the feed client and the
    /// cache are built. Nothing is read from the network yet.
    pub fn new(argv: Args) -> Result<Self, AppError> {
        trace!("In Application::new()");
        let config = argv.analyzer_config()?;
        debug!("Configuration: {:?}", config);
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let fetcher: Arc<dyn VulnFetcher> = Arc::new(
            NVDFetcher::new(config.feed.clone()).map_err(|e| AppError::Client(e.to_string()))?,
        );

        let cache: Arc<dyn CacheManager> = match argv.cache {
            CacheType::Files => {
                let root_dir = argv
                    .cache_dir
                    .clone()
                    .unwrap_or_else(FileCacheManager::default_root);
                info!("Caching vulnerabilities in {}", root_dir.to_string_lossy());
                Arc::new(FileCacheManager::new(
                    root_dir,
                    clock.clone(),
                    config.freshness_window(),
                ))
            }
            CacheType::Memory => Arc::new(MemoryCacheManager::new(
                clock.clone(),
                config.freshness_window(),
            )),
        };

        Ok(Self::with_components(argv, config, fetcher, cache, clock))
    }

    /// Creates an application around existing components.
    pub fn with_components(
        argv: Args,
        config: AnalyzerConfig,
        fetcher: Arc<dyn VulnFetcher>,
        cache: Arc<dyn CacheManager>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Application {
            argv,
            correlator: Correlator::new(fetcher, cache, config),
            clock,
        }
    }

    /// Reads the network and builds the report.
    pub async fn analyze(&self) -> Result<Report, AppError> {
        trace!("Running Application::analyze()");
        let input = self.argv.input.as_deref().ok_or(InputError::Missing)?;
        let network = NetworkReader::new(input).read().await?;
        let cancel = match self.argv.deadline {
            Some(seconds) => {
                debug!("Feed requests stop after {} seconds", seconds);
                Cancellation::with_timeout(Duration::from_secs(seconds))
            }
            None => Cancellation::new(),
        };

        let analysis = self.correlator.analyze(&network, &cancel).await;
        if analysis.degraded() {
            warn!(
                "{} services could not be checked with up-to-date data",
                analysis
                    .assessments
                    .iter()
                    .filter(|a| a.status.is_degraded())
                    .count()
            );
        }
        Ok(Report::new(&network, analysis, self.clock.now()))
    }

    /// Looks for a CVE fetched by a previous run.
    pub async fn details(&self, cve_id: &str) -> Result<VulnerabilityRecord, AppError> {
        self.correlator
            .vulnerability_details(cve_id)
            .await
            .ok_or_else(|| AppError::UnknownCve(cve_id.to_string()))
    }

    /// Runs the global application and writes the result on STDOUT:
    /// the cached CVE asked with --cve, or the report of the network.
    pub async fn run(&self) -> Result<(), AppError> {
        let stdout = io::stdout();
        let mut out = stdout.lock();

        if let Some(cve_id) = self.argv.cve.as_deref() {
            let record = self.details(cve_id).await?;
            serde_json::to_writer_pretty(&mut out, &record).map_err(io::Error::from)?;
            writeln!(out)?;
            out.flush()?;
            return Ok(());
        }

        let report = self.analyze().await?;
        info!("Analysis finished, writing output");
        let writer = self.argv.writer.writer();
        Writer::write(writer.as_ref(), &report, &mut out)?;
        out.flush()?;
        Ok(())
    }
}

/// Represents the CLI arguments accepted by vulnmap
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// The JSON file describing the scanned network
    #[arg(short, long, value_name = "FILE", required_unless_present = "cve")]
    pub input: Option<PathBuf>,
    /// Prints a CVE from the cache instead of analyzing a network
    #[arg(long, value_name = "CVE_ID")]
    pub cve: Option<String>,
    /// A JSON file holding the analyzer configuration.
    /// The options given on the command line take precedence.
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,
    /// The NVD API key
    #[arg(long, value_name = "API_KEY", env = "NVD_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,
    /// Vulnerabilities scored below are ignored (0.0 to 10.0)
    #[arg(long, value_name = "SCORE")]
    pub min_cvss: Option<f32>,
    /// The maximum number of vulnerabilities reported
    #[arg(long, value_name = "COUNT")]
    pub max_results: Option<usize>,
    /// Cached vulnerabilities older than this are refreshed
    #[arg(long, value_name = "DAYS")]
    pub freshness_days: Option<u32>,
    /// The number of attempts when the feed throttles
    #[arg(long, value_name = "COUNT")]
    pub retries: Option<u32>,
    /// Timeout of each feed request
    #[arg(long, value_name = "SECONDS")]
    pub timeout: Option<u64>,
    /// Minimum delay between two feed requests.
    /// Defaults to 6000 without API key, 600 with one.
    #[arg(long, value_name = "MILLISECONDS")]
    pub request_delay: Option<u64>,
    /// The number of services analyzed at the same time
    #[arg(long, value_name = "COUNT")]
    pub concurrency: Option<usize>,
    /// No feed request is sent after this delay
    #[arg(long, value_name = "SECONDS")]
    pub deadline: Option<u64>,
    /// Where the vulnerabilities are cached
    #[arg(long, value_name = "CACHE", default_value = "files")]
    pub cache: CacheType,
    /// The directory of the files cache
    #[arg(long, value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,
    /// The writer to use
    #[arg(short, long, value_name = "WRITER", default_value = "textstdout")]
    pub writer: Writers,
    /// Increases the verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}

impl Args {
    /// The log level matching the verbosity.
    pub fn log_level(&self) -> LevelFilter {
        match self.verbose {
            0 => LevelFilter::Warn,
            1 => LevelFilter::Info,
            2 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    }

    /// Builds the configuration: defaults, then the configuration file,
    /// then the command line options.
    pub fn analyzer_config(&self) -> Result<AnalyzerConfig, ConfigError> {
        let mut config = match self.config.as_deref() {
            Some(path) => load_config(path)?,
            None => AnalyzerConfig::default(),
        };

        if let Some(min_cvss) = self.min_cvss {
            config.min_cvss_score = min_cvss;
        }
        if let Some(max_results) = self.max_results {
            config.max_results = max_results;
        }
        if let Some(days) = self.freshness_days {
            config.freshness_window_days = days;
        }
        if let Some(concurrency) = self.concurrency {
            config.concurrency = concurrency;
        }
        if let Some(retries) = self.retries {
            config.feed.max_attempts = retries;
        }
        if let Some(timeout) = self.timeout {
            config.feed.request_timeout = Duration::from_secs(timeout);
        }
        if let Some(delay) = self.request_delay {
            config.feed.request_delay = Some(Duration::from_millis(delay));
        }
        if self.api_key.is_some() {
            config.feed.api_key = self.api_key.clone();
        }

        config.validate()?;
        Ok(config)
    }
}

fn load_config(path: &Path) -> Result<AnalyzerConfig, ConfigError> {
    let file_error = |message: String| ConfigError::File {
        path: path.to_string_lossy().to_string(),
        message,
    };
    let content = std::fs::read_to_string(path).map_err(|e| file_error(e.to_string()))?;
    serde_json::from_str(&content).map_err(|e| file_error(e.to_string()))
}
