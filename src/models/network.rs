//! The scanned network, as handed over by the scanner.
//!
//! A [`Network`] is built once from the input description and never
//! modified afterwards.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

/// Represents the scanned network
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Network {
    /// Where the scan took place (organization, site...)
    pub location: String,
    /// The hosts discovered by the scanner
    pub hosts: Vec<NetworkHost>,
}

impl Network {
    /// Number of hosts seen as active.
    pub fn active_hosts(&self) -> usize {
        self.hosts
            .iter()
            .filter(|h| h.status == HostStatus::Active)
            .count()
    }
}

/// Represents a host of the scanned network
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct NetworkHost {
    /// The IP of the host, unique within a scan
    pub ip: String,
    /// Whether the host answered the scan
    #[serde(default)]
    pub status: HostStatus,
    /// The open ports
    #[serde(default)]
    pub ports: Vec<u16>,
    /// The service banners, in the order the scanner reported them.
    /// They don't necessarily match the ports one by one.
    #[serde(default)]
    pub services: Vec<String>,
    /// When the host was observed
    #[serde(
        rename = "time",
        deserialize_with = "deserialize_observed_at",
        serialize_with = "serialize_observed_at"
    )]
    pub observed_at: DateTime<Utc>,
}

/// The state of a host during the scan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HostStatus {
    Active,
    Inactive,
    #[default]
    #[serde(other)]
    Unknown,
}

/// Formats accepted for the observation time, besides RFC 3339.
/// The space-separated one is what most scanner exports use.
const NAIVE_TIME_FORMATS: [&str; 3] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
];

/// Parses a timestamp of the network description.
/// Timestamps without offset are considered UTC.
pub fn parse_observed_at(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    NAIVE_TIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .map(|naive| naive.and_utc())
}

fn deserialize_observed_at<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_observed_at(&raw)
        .ok_or_else(|| de::Error::custom(format!("invalid timestamp: {}", raw)))
}

fn serialize_observed_at<S>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&value.to_rfc3339())
}
