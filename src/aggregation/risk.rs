//! Risk descriptions and remediation advice, derived from declarative
//! rule tables.

use crate::models::{ProductKey, Severity, VulnerabilityRecord};

/// A risk phrase, used when one of the keywords appears in the description
/// of a CVE.
pub struct RiskRule {
    pub keywords: &'static [&'static str],
    pub phrase: &'static str,
}

pub const RISK_RULES: [RiskRule; 5] = [
    RiskRule {
        keywords: &["remote code execution", "rce", "execute arbitrary code"],
        phrase: "arbitrary code execution, which may lead to a full compromise of the system",
    },
    RiskRule {
        keywords: &["denial of service", "dos", "crash"],
        phrase: "denial of service, making the service unavailable",
    },
    RiskRule {
        keywords: &["information disclosure", "data leak", "sensitive data"],
        phrase: "leak of confidential data, including accounts and business information",
    },
    RiskRule {
        keywords: &["privilege escalation", "gain unauthorized access"],
        phrase: "unauthorized access or privilege escalation",
    },
    RiskRule {
        keywords: &["authentication bypass", "bypass authentication"],
        phrase: "authentication bypass, giving attackers access without credentials",
    },
];

/// Lower bounds of the CVSS qualifiers, checked in order.
const CVSS_QUALIFIERS: [(f32, &str); 2] = [
    (9.0, "high exploitation likelihood"),
    (7.0, "exploitable under specific conditions"),
];

const FALLBACK_RISK: &str =
    "potential compromise of the system or its data depending on the context of the vulnerability";

/// Advice on how soon a finding should be handled.
const PRIORITY_ADVICE: [(Severity, &str); 5] = [
    (Severity::Critical, "Patch immediately and restrict network exposure of the service until then."),
    (Severity::High, "Schedule the patch as a priority and monitor the service for exploitation attempts."),
    (Severity::Medium, "Plan the patch in the next maintenance window."),
    (Severity::Low, "Apply the patch with the regular updates."),
    (Severity::Unknown, "Review the advisory to assess the impact, no CVSS score is available."),
];

/// Whether `keyword` appears in `text` at the start of a word.
/// `text` must already be lowercase.
fn mentions(text: &str, keyword: &str) -> bool {
    text.match_indices(keyword).any(|(index, _)| {
        text[..index]
            .chars()
            .next_back()
            .map_or(true, |c| !c.is_alphanumeric())
    })
}

/// Describes the risk of a CVE from its description and its score.
///
/// Every matching rule contributes its phrase, in table order, followed by
/// the qualifier of the score. When nothing matched, a generic phrase is
/// used.
///
/// # Examples
///
/// ```rust
/// use vulnmap::aggregation::risk::risk_description;
/// assert_eq!(
///     risk_description("Remote code execution via a crafted request", Some(9.8)),
///     "arbitrary code execution, which may lead to a full compromise of the system; high exploitation likelihood."
/// );
/// ```
pub fn risk_description(description: &str, cvss: Option<f32>) -> String {
    let description = description.to_lowercase();
    let mut risks: Vec<&str> = RISK_RULES
        .iter()
        .filter(|rule| rule.keywords.iter().any(|k| mentions(&description, k)))
        .map(|rule| rule.phrase)
        .collect();

    let score = cvss.unwrap_or(0.0);
    if let Some(&(_, qualifier)) = CVSS_QUALIFIERS.iter().find(|(bound, _)| score >= *bound) {
        risks.push(qualifier);
    }

    if risks.is_empty() {
        risks.push(FALLBACK_RISK);
    }
    format!("{}.", risks.join("; "))
}

pub fn priority_advice(severity: Severity) -> &'static str {
    PRIORITY_ADVICE
        .iter()
        .find(|(s, _)| *s == severity)
        .map(|(_, advice)| *advice)
        .unwrap_or(PRIORITY_ADVICE[4].1)
}

/// Builds the remediation advice of a CVE found on a product, most
/// important first.
pub fn recommendations(record: &VulnerabilityRecord, product: &ProductKey) -> Vec<String> {
    let mut recommendations = vec![
        format!(
            "Upgrade {} {} beyond version {} to a release fixing {}.",
            product.vendor, product.product, product.version, record.id
        ),
        priority_advice(record.severity()).to_string(),
        format!(
            "Risk: {}",
            risk_description(&record.description, record.cvss_score)
        ),
    ];
    if let Some(reference) = record.references.first() {
        recommendations.push(format!("Consult the advisory: {}", reference));
    }
    recommendations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::record;
    use crate::models::CpePart;
    use rstest::rstest;

    #[rstest]
    #[case("Allows remote code execution", "arbitrary code execution")]
    #[case("An attacker can execute arbitrary code", "arbitrary code execution")]
    #[case("Leads to a DoS of the daemon", "denial of service")]
    #[case("A malformed packet may crash the server", "denial of service")]
    #[case("Sensitive data exposure in logs", "leak of confidential data")]
    #[case("Local privilege escalation via setuid", "unauthorized access")]
    #[case("Authentication bypass in the admin panel", "authentication bypass")]
    fn keywords_select_their_phrase(#[case] description: &str, #[case] expected: &str) {
        let risk = risk_description(description, None);
        assert!(risk.starts_with(expected), "{}", risk);
    }

    #[test]
    fn keywords_must_start_a_word() {
        // "kudos" contains "dos", "source" contains "rce"
        let risk = risk_description("The kudos counter reads past the source buffer", Some(5.0));
        assert_eq!(risk, format!("{}.", FALLBACK_RISK));
    }

    #[test]
    fn phrases_follow_the_table_order() {
        let risk = risk_description(
            "Crash or remote code execution through a heap overflow",
            Some(7.5),
        );
        assert_eq!(
            risk,
            "arbitrary code execution, which may lead to a full compromise of the system; \
             denial of service, making the service unavailable; \
             exploitable under specific conditions."
        );
    }

    #[rstest]
    #[case(Some(9.0), "high exploitation likelihood.")]
    #[case(Some(8.9), "exploitable under specific conditions.")]
    #[case(Some(7.0), "exploitable under specific conditions.")]
    fn score_adds_a_qualifier(#[case] cvss: Option<f32>, #[case] expected: &str) {
        assert_eq!(risk_description("Path traversal", cvss), expected);
    }

    #[rstest]
    #[case(Some(6.9))]
    #[case(None)]
    fn low_scores_without_keywords_use_the_fallback(#[case] cvss: Option<f32>) {
        assert_eq!(risk_description("Path traversal", cvss), format!("{}.", FALLBACK_RISK));
    }

    #[test]
    fn every_severity_has_an_advice() {
        for severity in Severity::ALL {
            assert!(PRIORITY_ADVICE.iter().any(|(s, _)| *s == severity));
        }
    }

    #[test]
    fn recommendations_start_with_the_upgrade() {
        let product = ProductKey::new(CpePart::Application, "apache", "http_server", "2.4.49");
        let mut cve = record("CVE-2021-41773", "apache:http_server:2.4.49", Some(9.8));
        cve.description = "Path traversal leading to remote code execution".to_string();
        let recommendations = recommendations(&cve, &product);
        assert_eq!(recommendations.len(), 4);
        assert_eq!(
            recommendations[0],
            "Upgrade apache http_server beyond version 2.4.49 to a release fixing CVE-2021-41773."
        );
        assert_eq!(recommendations[1], priority_advice(Severity::Critical));
        assert!(recommendations[2].contains("high exploitation likelihood"));
        assert_eq!(
            recommendations[3],
            "Consult the advisory: https://nvd.nist.gov/vuln/detail/CVE-2021-41773"
        );
    }

    #[test]
    fn no_reference_no_advisory() {
        let product = ProductKey::new(CpePart::Application, "php", "php", "7.4.16");
        let mut cve = record("CVE-2021-21702", "php:php:7.4.16", None);
        cve.references.clear();
        assert_eq!(recommendations(&cve, &product).len(), 3);
    }
}
