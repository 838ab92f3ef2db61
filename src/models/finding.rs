//! Findings handed over to the report writers.

use super::network::NetworkHost;
use super::vulnerability::{Severity, VulnerabilityRecord};
use chrono::NaiveDateTime;
use serde::Serialize;

/// Represents a vulnerability found on a service of a host.
///
/// There is one finding per (host, service, CVE) that survived filtering.
/// Findings are assembled at the end of a run and never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Finding {
    /// The IP of the host
    pub ip: String,
    /// The open ports of the host
    pub ports: Vec<u16>,
    /// The banner of the affected service
    pub service: String,
    /// The product key the CVE was found for
    pub product_key: String,
    pub cve_id: String,
    pub severity: Severity,
    /// The CVSS base score, if any
    pub cvss: Option<f32>,
    pub cvss_vector: Option<String>,
    pub description: String,
    pub published_at: NaiveDateTime,
    pub last_modified_at: NaiveDateTime,
    pub references: Vec<String>,
    /// Remediation advice, most important first
    pub recommendations: Vec<String>,
}

impl Finding {
    /// Creates a new finding from the record it was derived from.
    pub fn new(
        host: &NetworkHost,
        service: &str,
        record: &VulnerabilityRecord,
        recommendations: Vec<String>,
    ) -> Self {
        Finding {
            ip: host.ip.clone(),
            ports: host.ports.clone(),
            service: service.to_string(),
            product_key: record.product_key.clone(),
            cve_id: record.id.clone(),
            severity: record.severity(),
            cvss: record.cvss_score,
            cvss_vector: record.cvss_vector.clone(),
            description: record.description.clone(),
            published_at: record.published_at,
            last_modified_at: record.last_modified_at,
            references: record.references.clone(),
            recommendations,
        }
    }

    /// The score used for ranking. An absent score ranks below any score.
    pub fn rank_score(&self) -> f32 {
        self.cvss.unwrap_or(-1.0)
    }

    /// The score as shown in reports.
    pub fn cvss_text(&self) -> String {
        match self.cvss {
            Some(score) => format!("{:.1}", score),
            None => "N/A".to_string(),
        }
    }
}
