//! This module declares all readers.
//! A reader loads the data to analyze. The only input is the network
//! description produced by the scanner, read from a JSON file.

pub mod network;
