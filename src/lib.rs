//! vulnmap correlates the services found on a scanned network with the
//! known vulnerabilities of their products, and ranks the findings.

pub mod aggregation;
pub mod application;
pub mod checkers;
pub mod clock;
pub mod config;
pub mod correlation;
pub mod error;
pub mod models;
pub mod readers;
pub mod vulnerabilities;
pub mod writers;
