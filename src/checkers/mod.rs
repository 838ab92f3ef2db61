//! This module declares the banner checker.
//! The checker reads a service banner (e.g. "OpenSSH 8.2p1") and derives
//! the product identifier used to look up vulnerabilities.

pub mod products;

use crate::models::ServiceDescriptor;
use log::trace;
use products::{ProductRule, PRODUCT_RULES};
use regex::Regex;

/// The banner checker
pub struct BannerChecker {
    /// The regex used to find the version in a banner
    version_regex: Regex,
    /// The rules used to recognize the product
    rules: &'static [ProductRule],
}

impl BannerChecker {
    /// Creates a new BannerChecker.
    /// By doing so, the regex is compiled once and the checker can be
    /// reused.
    pub fn new() -> Self {
        // Examples: 2.4.49, 8.2p1, 1.8.0_291, 10.0.17763
        let version_regex =
            Regex::new(r"\d+\.\d+(?:\.\d+)*(?:[_-]?[a-zA-Z0-9]+)?").expect("Invalid version regex");
        Self {
            version_regex,
            rules: &PRODUCT_RULES,
        }
    }

    /// Extracts the first version found in a banner.
    pub fn parse_version(&self, banner: &str) -> Option<String> {
        self.version_regex
            .find(banner)
            .map(|m| m.as_str().to_string())
    }

    /// Returns the first rule matching the banner, in table order.
    pub fn recognize(&self, banner: &str) -> Option<&ProductRule> {
        let lowercase_banner = banner.to_lowercase();
        self.rules.iter().find(|rule| rule.matches(&lowercase_banner))
    }

    /// Parses a banner.
    ///
    /// Never fails: when the version or the product can't be found, the
    /// descriptor simply has no product key.
    pub fn parse(&self, banner: &str) -> ServiceDescriptor {
        trace!("Running BannerChecker::parse() on {}", banner);
        let version = self.parse_version(banner);
        let product_key = version
            .as_deref()
            .and_then(|v| self.recognize(banner).map(|rule| rule.key(v)));
        trace!("Banner {} -> {:?}", banner, product_key);
        ServiceDescriptor {
            raw_banner: banner.to_string(),
            product_key,
            version,
        }
    }
}

impl Default for BannerChecker {
    fn default() -> Self {
        Self::new()
    }
}
