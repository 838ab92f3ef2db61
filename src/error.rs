//! Errors raised by the correlation pipeline.
//!
//! Only the feed and the cache can fail for external reasons. Both are
//! recoverable: the [`crate::correlation::Correlator`] degrades instead of
//! aborting the run. Input and configuration errors stop the application
//! before any analysis starts.

use thiserror::Error;

/// Errors returned by a [`crate::vulnerabilities::fetchers::VulnFetcher`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FeedError {
    /// The feed kept throttling the requests until the retry ceiling was
    /// reached. The product must be considered temporarily unresolved.
    #[error("feed unavailable for {product} after {attempts} attempts")]
    Unavailable { product: String, attempts: u32 },

    /// The feed could not be reached, or answered with an unexpected status.
    #[error("transport error while fetching {product}: {message}")]
    Transport { product: String, message: String },

    /// The feed answered but the payload could not be understood.
    #[error("malformed feed response for {product}: {message}")]
    Response { product: String, message: String },
}

/// Errors returned by a [`crate::vulnerabilities::cache_managers::CacheManager`].
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored entry does not belong to the product it was read for.
    #[error("corrupted cache entry for {product}: {message}")]
    Corrupted { product: String, message: String },
}

/// Errors raised while reading the network description.
#[derive(Error, Debug)]
pub enum InputError {
    #[error("unable to read the network description: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid network description: {0}")]
    Json(#[from] serde_json::Error),

    #[error("host {0} appears more than once in the network description")]
    DuplicateHost(String),

    #[error("no network description given")]
    Missing,
}

/// Errors raised by an invalid configuration.
#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("invalid configuration value for {key}: {message}")]
    Invalid { key: &'static str, message: String },

    #[error("unable to load the configuration file {path}: {message}")]
    File { path: String, message: String },
}

/// Top-level error of the application.
#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Input(#[from] InputError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("unable to build the feed client: {0}")]
    Client(String),

    #[error("{0} is not in the cache, analyze a network exposing it first")]
    UnknownCve(String),

    #[error("unable to write the report: {0}")]
    Output(#[from] std::io::Error),
}
