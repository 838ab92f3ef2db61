//! Vulnerability records and their severity.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The severity of a vulnerability, derived from its CVSS score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
pub enum Severity {
    /// No CVSS score available
    Unknown,
    Low,
    Medium,
    High,
    Critical,
}

/// Lower bounds of each severity, checked in order.
/// A score below the last bound is Low.
const SEVERITY_THRESHOLDS: [(f32, Severity); 3] = [
    (9.0, Severity::Critical),
    (7.0, Severity::High),
    (4.0, Severity::Medium),
];

impl Severity {
    /// Every severity, from the most to the least severe.
    pub const ALL: [Severity; 5] = [
        Severity::Critical,
        Severity::High,
        Severity::Medium,
        Severity::Low,
        Severity::Unknown,
    ];

    /// Converts a CVSS score to a severity.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use vulnmap::models::Severity;
    /// assert_eq!(Severity::from_cvss(Some(9.0)), Severity::Critical);
    /// assert_eq!(Severity::from_cvss(None), Severity::Unknown);
    /// ```
    pub fn from_cvss(score: Option<f32>) -> Self {
        let Some(score) = score else {
            return Severity::Unknown;
        };
        SEVERITY_THRESHOLDS
            .iter()
            .find(|(bound, _)| score >= *bound)
            .map(|(_, severity)| *severity)
            .unwrap_or(Severity::Low)
    }

    /// Whether the severity requires a priority treatment.
    pub fn is_critical_or_high(&self) -> bool {
        matches!(self, Severity::Critical | Severity::High)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "Critical",
            Severity::High => "High",
            Severity::Medium => "Medium",
            Severity::Low => "Low",
            Severity::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Represents a CVE as known by this program.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct VulnerabilityRecord {
    /// The CVE identifier.
    /// Example: CVE-2021-41773
    pub id: String,
    /// The product key it was retrieved under.
    /// Example: apache:http_server:2.4.49
    pub product_key: String,
    /// The English description
    pub description: String,
    pub published_at: NaiveDateTime,
    pub last_modified_at: NaiveDateTime,
    /// The base score of the newest CVSS version available
    pub cvss_score: Option<f32>,
    /// The vector string matching cvss_score
    pub cvss_vector: Option<String>,
    /// URLs of advisories, patches, etc.
    pub references: Vec<String>,
    /// The configurations as returned by the feed. Kept as is.
    #[serde(default)]
    pub raw_configurations: serde_json::Value,
}

impl VulnerabilityRecord {
    /// The severity, always computed from the score.
    pub fn severity(&self) -> Severity {
        Severity::from_cvss(self.cvss_score)
    }

    /// The score used for filtering. An absent score counts as 0.
    pub fn score_or_zero(&self) -> f32 {
        self.cvss_score.unwrap_or(0.0)
    }

    /// The score used for ranking. An absent score ranks below any score.
    pub fn rank_score(&self) -> f32 {
        self.cvss_score.unwrap_or(-1.0)
    }
}
