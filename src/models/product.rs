//! Product identifiers derived from service banners.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The CPE part of a product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum CpePart {
    /// Application
    #[serde(rename = "a")]
    Application,
    /// Operating system
    #[serde(rename = "o")]
    OperatingSystem,
}

impl CpePart {
    /// The letter used in a CPE 2.3 name.
    pub fn as_str(&self) -> &'static str {
        match self {
            CpePart::Application => "a",
            CpePart::OperatingSystem => "o",
        }
    }
}

/// A normalized (vendor, product, version) identifier.
///
/// It is the key under which vulnerabilities are fetched and cached.
/// A `ProductKey` always carries a version: without one, no lookup is
/// attempted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct ProductKey {
    pub part: CpePart,
    /// Example: apache
    pub vendor: String,
    /// Example: http_server
    pub product: String,
    /// Example: 2.4.49
    pub version: String,
}

impl ProductKey {
    pub fn new(part: CpePart, vendor: &str, product: &str, version: &str) -> Self {
        Self {
            part,
            vendor: vendor.to_string(),
            product: product.to_string(),
            version: version.to_string(),
        }
    }

    /// The vendor:product pair, without version.
    /// Example: apache:http_server
    pub fn family(&self) -> String {
        format!("{}:{}", self.vendor, self.product)
    }

    /// The key used by caches.
    /// Example: apache:http_server:2.4.49
    pub fn cache_key(&self) -> String {
        format!("{}:{}:{}", self.vendor, self.product, self.version)
    }

    /// The CPE 2.3 name sent to the feed.
    /// Example: cpe:2.3:a:apache:http_server:2.4.49:*:*:*:*:*:*:*
    pub fn cpe_name(&self) -> String {
        format!(
            "cpe:2.3:{}:{}:{}:{}:*:*:*:*:*:*:*",
            self.part.as_str(),
            self.vendor,
            self.product,
            self.version
        )
    }
}

impl fmt::Display for ProductKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.cache_key())
    }
}

/// What the parser understood from a banner.
///
/// It is derived on demand and never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    /// The banner as reported by the scanner
    pub raw_banner: String,
    /// The product identifier. Absent when the product is not recognized
    /// or when no version was found.
    pub product_key: Option<ProductKey>,
    /// The version found in the banner, if any
    pub version: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_keys() {
        let key = ProductKey::new(CpePart::Application, "apache", "http_server", "2.4.49");
        assert_eq!(key.family(), "apache:http_server");
        assert_eq!(key.cache_key(), "apache:http_server:2.4.49");
        assert_eq!(key.to_string(), "apache:http_server:2.4.49");
        assert_eq!(
            key.cpe_name(),
            "cpe:2.3:a:apache:http_server:2.4.49:*:*:*:*:*:*:*"
        );
    }

    #[test]
    fn operating_systems_use_the_o_part() {
        let key = ProductKey::new(CpePart::OperatingSystem, "microsoft", "windows", "10.0.17763");
        assert!(key.cpe_name().starts_with("cpe:2.3:o:microsoft:windows:"));
    }
}
