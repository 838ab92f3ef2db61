//! Write the [`Report`] as text
//! It is the default writer, it presents the report in a text
//! format meant to be read in a terminal.

use super::Writer;
use crate::aggregation::Report;
use crate::models::{Finding, Severity};
use std::io::{self, Write};

/// A writer to print the report in the terminal.
#[derive(Default)]
pub struct TextStdoutWriter {}

impl TextStdoutWriter {
    /// Create a new TextStdoutWriter
    pub fn new() -> Self {
        Self {}
    }

    fn write_finding(finding: &Finding, out: &mut dyn Write) -> io::Result<()> {
        writeln!(
            out,
            "[{}] {} (CVSS: {}) on {}",
            finding.severity,
            finding.cve_id,
            finding.cvss_text(),
            finding.service
        )?;
        writeln!(out, "    {}", finding.description)?;
        for recommendation in &finding.recommendations {
            writeln!(out, "    - {}", recommendation)?;
        }
        writeln!(out)
    }
}

/// The label of a bucket. Findings without score are shown as N/A.
fn bucket_label(severity: Severity) -> &'static str {
    match severity {
        Severity::Unknown => "N/A",
        _ => severity.as_str(),
    }
}

impl Writer for TextStdoutWriter {
    fn write(&self, report: &Report, out: &mut dyn Write) -> io::Result<()> {
        writeln!(out, "----------{}----------\n", report.location)?;
        writeln!(
            out,
            "Generated at {}",
            report.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
        )?;
        writeln!(out, "Active hosts: {}", report.active_hosts)?;
        writeln!(out, "Vulnerabilities: {}", report.total_findings)?;
        for severity in Severity::ALL {
            writeln!(
                out,
                "    {}: {}",
                bucket_label(severity),
                report.histogram.count(severity)
            )?;
        }
        if report.truncated > 0 {
            writeln!(
                out,
                "{} lower-scored vulnerabilities are not listed",
                report.truncated
            )?;
        }
        if report.degraded {
            writeln!(
                out,
                "\nWARNING: some services could not be checked with up-to-date data:"
            )?;
            for assessment in report.degraded_services() {
                writeln!(
                    out,
                    "    {} {} ({:?}): {}",
                    assessment.ip,
                    assessment.service,
                    assessment.status,
                    assessment.error.as_deref().unwrap_or("unknown reason")
                )?;
            }
        }

        if !report.top_critical.is_empty() {
            writeln!(out, "\nMost critical vulnerabilities:")?;
            for finding in &report.top_critical {
                writeln!(
                    out,
                    "    {} on {} (CVSS: {})",
                    finding.cve_id,
                    finding.ip,
                    finding.cvss_text()
                )?;
            }
        }

        for host in &report.hosts {
            writeln!(out, "\n----------{}----------\n", host.ip)?;
            for service in &host.unchecked_services {
                writeln!(out, "Could not be checked: {}", service)?;
            }
            for service in &host.stale_services {
                writeln!(out, "Checked with outdated data: {}", service)?;
            }
            if !host.unchecked_services.is_empty() || !host.stale_services.is_empty() {
                writeln!(out)?;
            }

            let mut findings = report.findings.iter().filter(|f| f.ip == host.ip).peekable();
            if findings.peek().is_none() {
                if host.unchecked_services.is_empty() {
                    writeln!(out, "No known vulnerability\n")?;
                } else {
                    writeln!(out, "No known vulnerability in the checked services\n")?;
                }
            }
            for finding in findings {
                Self::write_finding(finding, out)?;
            }
        }

        if !report.conclusions.is_empty() {
            writeln!(out, "----------Conclusions----------\n")?;
            for conclusion in &report.conclusions {
                writeln!(
                    out,
                    "{} ({} on {}, CVSS: {}): {}",
                    conclusion.cve_id,
                    conclusion.service,
                    conclusion.ip,
                    conclusion
                        .cvss
                        .map(|s| format!("{:.1}", s))
                        .unwrap_or_else(|| "N/A".to_string()),
                    conclusion.risk
                )?;
            }
        }
        Ok(())
    }
}
