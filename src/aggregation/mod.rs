//! Aggregates the findings of a run into the report handed to the writers.

pub mod risk;

use crate::correlation::{Analysis, ServiceAssessment, ServiceStatus};
use crate::models::{Finding, HostStatus, Network, Severity};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::cmp::Ordering;

/// How many findings are shown in the summary.
pub const TOP_CRITICAL_COUNT: usize = 3;
/// How many findings are described in the conclusions.
pub const CONCLUSION_COUNT: usize = 5;
/// The minimum score of a finding described in the conclusions.
pub const CONCLUSION_MIN_CVSS: f32 = 7.0;

/// The number of findings per severity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SeverityHistogram {
    #[serde(rename = "Critical")]
    pub critical: usize,
    #[serde(rename = "High")]
    pub high: usize,
    #[serde(rename = "Medium")]
    pub medium: usize,
    #[serde(rename = "Low")]
    pub low: usize,
    #[serde(rename = "Unknown")]
    pub unknown: usize,
}

impl SeverityHistogram {
    pub fn from_findings<'a>(findings: impl IntoIterator<Item = &'a Finding>) -> Self {
        let mut histogram = Self::default();
        for finding in findings {
            *histogram.bucket(finding.severity) += 1;
        }
        histogram
    }

    fn bucket(&mut self, severity: Severity) -> &mut usize {
        match severity {
            Severity::Critical => &mut self.critical,
            Severity::High => &mut self.high,
            Severity::Medium => &mut self.medium,
            Severity::Low => &mut self.low,
            Severity::Unknown => &mut self.unknown,
        }
    }

    pub fn count(&self, severity: Severity) -> usize {
        match severity {
            Severity::Critical => self.critical,
            Severity::High => self.high,
            Severity::Medium => self.medium,
            Severity::Low => self.low,
            Severity::Unknown => self.unknown,
        }
    }

    pub fn total(&self) -> usize {
        Severity::ALL.iter().map(|s| self.count(*s)).sum()
    }
}

/// A line of the remediation table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RemediationItem {
    pub cve_id: String,
    pub ip: String,
    pub service: String,
    pub severity: Severity,
    pub cvss: Option<f32>,
    pub recommendations: Vec<String>,
}

/// A short description of the risk of a serious finding.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Conclusion {
    pub cve_id: String,
    pub ip: String,
    pub service: String,
    pub cvss: Option<f32>,
    pub risk: String,
}

/// The findings of one host.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HostSummary {
    pub ip: String,
    pub status: HostStatus,
    pub ports: Vec<u16>,
    pub histogram: SeverityHistogram,
    pub findings: usize,
    /// Services which could not be checked
    pub unchecked_services: Vec<String>,
    /// Services checked against outdated cached data
    pub stale_services: Vec<String>,
}

/// Orders by descending score. A finding without score comes last.
fn by_score_desc(a: &Finding, b: &Finding) -> Ordering {
    b.rank_score().total_cmp(&a.rank_score())
}

/// The Critical and High findings with the highest scores. Findings with
/// the same score keep their order.
pub fn top_critical(findings: &[Finding], count: usize) -> Vec<Finding> {
    let mut critical: Vec<Finding> = findings
        .iter()
        .filter(|f| f.severity.is_critical_or_high())
        .cloned()
        .collect();
    critical.sort_by(by_score_desc);
    critical.truncate(count);
    critical
}

/// Every finding, by descending score, then by IP, then by CVE id.
pub fn remediation_plan(findings: &[Finding]) -> Vec<RemediationItem> {
    let mut sorted: Vec<&Finding> = findings.iter().collect();
    sorted.sort_by(|a, b| {
        by_score_desc(a, b)
            .then_with(|| a.ip.cmp(&b.ip))
            .then_with(|| a.cve_id.cmp(&b.cve_id))
    });
    sorted
        .into_iter()
        .map(|f| RemediationItem {
            cve_id: f.cve_id.clone(),
            ip: f.ip.clone(),
            service: f.service.clone(),
            severity: f.severity,
            cvss: f.cvss,
            recommendations: f.recommendations.clone(),
        })
        .collect()
}

pub fn conclusions(findings: &[Finding]) -> Vec<Conclusion> {
    let mut serious: Vec<&Finding> = findings
        .iter()
        .filter(|f| f.severity.is_critical_or_high() && f.cvss.unwrap_or(0.0) >= CONCLUSION_MIN_CVSS)
        .collect();
    serious.sort_by(|a, b| by_score_desc(a, b));
    serious
        .into_iter()
        .take(CONCLUSION_COUNT)
        .map(|f| Conclusion {
            cve_id: f.cve_id.clone(),
            ip: f.ip.clone(),
            service: f.service.clone(),
            cvss: f.cvss,
            risk: risk::risk_description(&f.description, f.cvss),
        })
        .collect()
}

/// One summary per host of the network, in input order.
pub fn host_summaries(
    network: &Network,
    findings: &[Finding],
    assessments: &[ServiceAssessment],
) -> Vec<HostSummary> {
    network
        .hosts
        .iter()
        .map(|host| {
            let histogram = SeverityHistogram::from_findings(findings.iter().filter(|f| f.ip == host.ip));
            let services_with = |status: ServiceStatus| -> Vec<String> {
                assessments
                    .iter()
                    .filter(|a| a.ip == host.ip && a.status == status)
                    .map(|a| a.service.clone())
                    .collect()
            };
            HostSummary {
                ip: host.ip.clone(),
                status: host.status,
                ports: host.ports.clone(),
                findings: histogram.total(),
                histogram,
                unchecked_services: services_with(ServiceStatus::Unchecked),
                stale_services: services_with(ServiceStatus::Stale),
            }
        })
        .collect()
}

/// Everything the writers need to render the result of a run.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub location: String,
    pub generated_at: DateTime<Utc>,
    pub active_hosts: usize,
    pub total_findings: usize,
    pub histogram: SeverityHistogram,
    pub top_critical: Vec<Finding>,
    pub conclusions: Vec<Conclusion>,
    pub remediation: Vec<RemediationItem>,
    pub hosts: Vec<HostSummary>,
    pub findings: Vec<Finding>,
    pub assessments: Vec<ServiceAssessment>,
    /// Findings dropped by the max_results cap
    pub truncated: usize,
    /// Some services were assessed with stale data or not at all
    pub degraded: bool,
}

impl Report {
    pub fn new(network: &Network, analysis: Analysis, generated_at: DateTime<Utc>) -> Self {
        let degraded = analysis.degraded();
        let Analysis {
            findings,
            assessments,
            truncated,
        } = analysis;
        let histogram = SeverityHistogram::from_findings(&findings);
        Report {
            location: network.location.clone(),
            generated_at,
            active_hosts: network.active_hosts(),
            total_findings: findings.len(),
            histogram,
            top_critical: top_critical(&findings, TOP_CRITICAL_COUNT),
            conclusions: conclusions(&findings),
            remediation: remediation_plan(&findings),
            hosts: host_summaries(network, &findings, &assessments),
            findings,
            assessments,
            truncated,
            degraded,
        }
    }

    /// The services which could not be assessed with fresh data.
    pub fn degraded_services(&self) -> impl Iterator<Item = &ServiceAssessment> {
        self.assessments.iter().filter(|a| a.status.is_degraded())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::{finding, host};
    use chrono::TimeZone;

    fn findings() -> Vec<Finding> {
        vec![
            finding("192.168.1.20", "CVE-B", Some(7.5)),
            finding("192.168.1.10", "CVE-C", Some(9.8)),
            finding("192.168.1.10", "CVE-A", Some(7.5)),
            finding("192.168.1.10", "CVE-D", None),
            finding("192.168.1.30", "CVE-E", Some(4.3)),
            finding("192.168.1.30", "CVE-F", Some(8.8)),
        ]
    }

    fn ids<T, F: Fn(&T) -> &str>(items: &[T], id: F) -> Vec<&str> {
        items.iter().map(id).collect()
    }

    #[test]
    fn histogram_counts_every_bucket() {
        let histogram = SeverityHistogram::from_findings(&findings());
        assert_eq!(histogram.count(Severity::Critical), 1);
        assert_eq!(histogram.count(Severity::High), 3);
        assert_eq!(histogram.count(Severity::Medium), 1);
        assert_eq!(histogram.count(Severity::Low), 0);
        assert_eq!(histogram.count(Severity::Unknown), 1);
        assert_eq!(histogram.total(), 6);
    }

    #[test]
    fn histogram_serializes_with_severity_names() {
        let histogram = SeverityHistogram::from_findings(&findings());
        let json = serde_json::to_value(histogram).unwrap();
        assert_eq!(json["Critical"], 1);
        assert_eq!(json["Unknown"], 1);
    }

    #[test]
    fn top_critical_is_stable() {
        let top = top_critical(&findings(), TOP_CRITICAL_COUNT);
        // CVE-B and CVE-A share 7.5, CVE-B comes first in the input
        assert_eq!(ids(&top, |f| f.cve_id.as_str()), vec!["CVE-C", "CVE-F", "CVE-B"]);
    }

    #[test]
    fn top_critical_ignores_lower_severities() {
        let findings = vec![
            finding("192.168.1.10", "CVE-M", Some(6.9)),
            finding("192.168.1.10", "CVE-U", None),
        ];
        assert!(top_critical(&findings, TOP_CRITICAL_COUNT).is_empty());
    }

    #[test]
    fn remediation_plan_is_a_total_order() {
        let plan = remediation_plan(&findings());
        assert_eq!(
            ids(&plan, |r| r.cve_id.as_str()),
            vec!["CVE-C", "CVE-F", "CVE-A", "CVE-B", "CVE-E", "CVE-D"]
        );

        let mut reversed = findings();
        reversed.reverse();
        assert_eq!(remediation_plan(&reversed), plan);
    }

    #[test]
    fn conclusions_keep_serious_findings() {
        let mut findings = findings();
        for i in 0..4 {
            findings.push(finding("192.168.1.40", &format!("CVE-X{}", i), Some(9.0)));
        }
        let conclusions = conclusions(&findings);
        assert_eq!(conclusions.len(), CONCLUSION_COUNT);
        assert_eq!(conclusions[0].cve_id, "CVE-C");
        assert!(conclusions.iter().all(|c| c.cvss.unwrap_or(0.0) >= CONCLUSION_MIN_CVSS));
        assert!(conclusions[0].risk.ends_with("high exploitation likelihood."));
    }

    #[test]
    fn report_summarizes_the_analysis() {
        let mut inactive = host("192.168.1.30", &["nginx 1.18.0"]);
        inactive.status = HostStatus::Inactive;
        let network = Network {
            location: "Head office".to_string(),
            hosts: vec![
                host("192.168.1.10", &["Apache httpd 2.4.49"]),
                host("192.168.1.20", &["OpenSSH 8.2p1"]),
                inactive,
            ],
        };
        let assessments = vec![
            ServiceAssessment {
                ip: "192.168.1.20".to_string(),
                service: "OpenSSH 8.2p1".to_string(),
                product_key: Some("openssh:openssh:8.2p1".to_string()),
                status: ServiceStatus::Unchecked,
                vulnerabilities: 0,
                error: Some("feed unavailable".to_string()),
            },
            ServiceAssessment {
                ip: "192.168.1.30".to_string(),
                service: "nginx 1.18.0".to_string(),
                product_key: Some("nginx:nginx:1.18.0".to_string()),
                status: ServiceStatus::Stale,
                vulnerabilities: 2,
                error: Some("feed unavailable".to_string()),
            },
        ];
        let analysis = Analysis {
            findings: findings(),
            assessments,
            truncated: 0,
        };
        let now = Utc.with_ymd_and_hms(2024, 5, 5, 12, 0, 0).unwrap();

        let report = Report::new(&network, analysis, now);

        assert_eq!(report.active_hosts, 2);
        assert_eq!(report.total_findings, 6);
        assert_eq!(report.top_critical.len(), 3);
        assert!(report.degraded);
        assert_eq!(report.degraded_services().count(), 2);
        assert_eq!(report.hosts.len(), 3);
        assert_eq!(report.hosts[0].findings, 3);
        assert_eq!(report.hosts[1].unchecked_services, vec!["OpenSSH 8.2p1".to_string()]);
        assert!(report.hosts[1].stale_services.is_empty());
        assert!(report.hosts[2].unchecked_services.is_empty());
        assert_eq!(report.hosts[2].stale_services, vec!["nginx 1.18.0".to_string()]);
        assert_eq!(report.hosts[2].histogram.count(Severity::Medium), 1);
    }
}
