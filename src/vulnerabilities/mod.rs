//! Getting the CVEs of a product.
//!
//! A fetcher downloads them from the NVD. A cache manager keeps them with
//! the time of their last refresh, so a product is only fetched again once
//! its entry is older than the freshness window.

pub mod cache_managers;
pub mod fetchers;

use clap::{builder::PossibleValue, ValueEnum};

/// Where the fetched CVEs are kept between two lookups.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum CacheType {
    /// One JSON file per product, kept across runs
    Files,
    /// Lost when the process exits
    Memory,
}

impl ValueEnum for CacheType {
    fn value_variants<'a>() -> &'a [Self] {
        &[CacheType::Files, CacheType::Memory]
    }

    fn to_possible_value(&self) -> Option<PossibleValue> {
        Some(match self {
            CacheType::Files => PossibleValue::new("files").help("JSON files under --cache-dir"),
            CacheType::Memory => PossibleValue::new("memory").help("In-process, for a single run"),
        })
    }
}
