//! Write the [`Report`] as CSV
//! It presents the findings in a CSV format, one line per finding.

use super::Writer;
use crate::aggregation::Report;
use std::io::{self, Write};

/// A writer to print the findings as CSV.
#[derive(Default)]
pub struct CsvWriter {}

impl CsvWriter {
    /// Create a new CsvWriter
    pub fn new() -> Self {
        Self {}
    }
}

/// Quotes a field, escaping quotes (") to avoid breaking the CSV
fn field(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "\"\""))
}

impl Writer for CsvWriter {
    /// Writes the findings
    fn write(&self, report: &Report, out: &mut dyn Write) -> io::Result<()> {
        writeln!(
            out,
            "\"IP\",\"Ports\",\"Service\",\"CVE\",\"Severity\",\"CVSS\",\"Description\",\"Recommendations\""
        )?;
        for finding in &report.findings {
            let ports: Vec<String> = finding.ports.iter().map(|p| p.to_string()).collect();
            let line = [
                field(&finding.ip),
                field(&ports.join(" ")),
                field(&finding.service),
                field(&finding.cve_id),
                field(finding.severity.as_str()),
                field(&finding.cvss_text()),
                field(&finding.description),
                field(&finding.recommendations.join("; ")),
            ];
            writeln!(out, "{}", line.join(","))?;
        }
        Ok(())
    }
}
