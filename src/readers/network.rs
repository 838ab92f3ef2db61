//! This module declares a reader for the network description.

use crate::error::InputError;
use crate::models::Network;
use log::{debug, trace};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Reads the network description from a JSON file.
///
/// The expected format is:
/// ```json
/// {
///   "location": "Head office",
///   "hosts": [
///     {
///       "ip": "192.168.1.10",
///       "status": "active",
///       "ports": [80, 443, 22],
///       "services": ["Apache httpd 2.4.49", "OpenSSH 8.2p1"],
///       "time": "2024-05-05 10:00:00"
///     }
///   ]
/// }
/// ```
pub struct NetworkReader {
    /// The path of the JSON file
    pub path: PathBuf,
}

impl NetworkReader {
    /// Creates a new NetworkReader
    pub fn new(path: &Path) -> Self {
        NetworkReader {
            path: path.to_path_buf(),
        }
    }

    /// Reads and parses the file.
    pub async fn read(&self) -> Result<Network, InputError> {
        trace!("Running NetworkReader::read() on {}", self.path.to_string_lossy());
        let content = tokio::fs::read_to_string(&self.path).await?;
        let network = parse(&content)?;
        debug!(
            "{} hosts read from {}",
            network.hosts.len(),
            self.path.to_string_lossy()
        );
        Ok(network)
    }
}

/// Parses a network description. A host IP may appear only once.
pub fn parse(content: &str) -> Result<Network, InputError> {
    let network: Network = serde_json::from_str(content)?;
    let duplicate = {
        let mut seen = HashSet::with_capacity(network.hosts.len());
        network
            .hosts
            .iter()
            .find(|h| !seen.insert(h.ip.as_str()))
            .map(|h| h.ip.clone())
    };
    match duplicate {
        Some(ip) => Err(InputError::DuplicateHost(ip)),
        None => Ok(network),
    }
}
