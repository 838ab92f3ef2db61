//! In this module are declared the entities manipulated by this program

pub mod finding;
pub mod network;
pub mod product;
pub mod vulnerability;

pub use finding::Finding;
pub use network::{HostStatus, Network, NetworkHost};
pub use product::{CpePart, ProductKey, ServiceDescriptor};
pub use vulnerability::{Severity, VulnerabilityRecord};
