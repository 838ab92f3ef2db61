//! Writing the report
//!
//! Once the correlation is done, it's up to a writer to render the
//! [`Report`]. It provides a common interface, allowing to change the
//! output format without affecting the execution of the application.

pub mod csv;
pub mod json;
pub mod textstdout;

use crate::aggregation::Report;
use clap::{builder::PossibleValue, ValueEnum};
use std::io::{self, Write};

/// A trait to have a common interface between writers.
/// A writer has the responsibility to render the [`Report`] in a format,
/// the application decides where the output goes (usually STDOUT).
pub trait Writer {
    /// Write the report
    fn write(&self, report: &Report, out: &mut dyn Write) -> io::Result<()>;
}

/// Represents the writers available on the command line.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Writers {
    /// TextStdoutWriter
    TextStdout,
    /// CsvWriter
    Csv,
    /// JsonWriter
    Json,
}

impl Writers {
    /// Instanciates the writer
    pub fn writer(&self) -> Box<dyn Writer> {
        match self {
            Writers::TextStdout => Box::new(textstdout::TextStdoutWriter::new()),
            Writers::Csv => Box::new(csv::CsvWriter::new()),
            Writers::Json => Box::new(json::JsonWriter::new()),
        }
    }
}

impl ValueEnum for Writers {
    /// Lists the variants available for clap
    fn value_variants<'a>() -> &'a [Self] {
        &[Self::TextStdout, Self::Csv, Self::Json]
    }

    /// Map each value to a possible value in clap
    fn to_possible_value(&self) -> Option<PossibleValue> {
        match &self {
            Self::TextStdout => Some(PossibleValue::new("textstdout")),
            Self::Csv => Some(PossibleValue::new("csv")),
            Self::Json => Some(PossibleValue::new("json")),
        }
    }
}
