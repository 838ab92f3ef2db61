//! The product families recognized in service banners.

use crate::models::{CpePart, ProductKey};

/// Associates a keyword found in a banner to a product.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProductRule {
    /// Lowercase keyword searched in the lowercased banner
    pub keyword: &'static str,
    pub part: CpePart,
    pub vendor: &'static str,
    pub product: &'static str,
}

impl ProductRule {
    const fn app(keyword: &'static str, vendor: &'static str, product: &'static str) -> Self {
        Self {
            keyword,
            part: CpePart::Application,
            vendor,
            product,
        }
    }

    const fn os(keyword: &'static str, vendor: &'static str, product: &'static str) -> Self {
        Self {
            keyword,
            part: CpePart::OperatingSystem,
            vendor,
            product,
        }
    }

    /// Checks whether the rule applies to a banner.
    /// The banner MUST already be lowercased.
    pub fn matches(&self, lowercase_banner: &str) -> bool {
        lowercase_banner.contains(self.keyword)
    }

    /// Builds the product key for the given version.
    pub fn key(&self, version: &str) -> ProductKey {
        ProductKey::new(self.part, self.vendor, self.product, version)
    }
}

/// The rules, evaluated in order. The first matching rule wins, so a banner
/// such as "Apache Tomcat" resolves to the Apache HTTP server.
pub const PRODUCT_RULES: [ProductRule; 10] = [
    ProductRule::os("windows", "microsoft", "windows"),
    ProductRule::app("apache", "apache", "http_server"),
    ProductRule::app("openssl", "openssl", "openssl"),
    ProductRule::app("openssh", "openssh", "openssh"),
    ProductRule::app("mysql", "mysql", "mysql"),
    ProductRule::app("php", "php", "php"),
    ProductRule::app("wordpress", "wordpress", "wordpress"),
    ProductRule::app("tomcat", "apache", "tomcat"),
    ProductRule::app("java", "oracle", "jre"),
    ProductRule::app("nginx", "nginx", "nginx"),
];
