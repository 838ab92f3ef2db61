//! Write the [`Report`] as JSON
//! It serializes the whole report, including the service assessments.

use super::Writer;
use crate::aggregation::Report;
use std::io::{self, Write};

/// A writer to print the report as JSON.
#[derive(Default)]
pub struct JsonWriter {}

impl JsonWriter {
    /// Create a new JsonWriter
    pub fn new() -> Self {
        Self {}
    }
}

impl Writer for JsonWriter {
    fn write(&self, report: &Report, out: &mut dyn Write) -> io::Result<()> {
        serde_json::to_writer_pretty(&mut *out, report)?;
        writeln!(out)
    }
}
