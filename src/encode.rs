//! Serialization of row batches into delimited records.
//! Uses the `csv` crate so payloads with embedded delimiters, quotes, or newlines
//! are quoted correctly.

use crate::config::{ColumnNames, ExportOptions};
use crate::error::{ExportError, ExportResult};
use crate::row::Row;
use csv::{QuoteStyle, Terminator, WriterBuilder};
use time::macros::format_description;
use time::PrimitiveDateTime;

/// Turns one batch of rows into the bytes of one upload part.
pub trait RecordEncoder: Send + Sync {
    /// `header` is true only for the first batch of an object.
    fn encode(&self, rows: &[Row], header: bool) -> ExportResult<Vec<u8>>;

    /// File extension of the produced objects, without the dot.
    fn extension(&self) -> &str;
}

#[derive(Clone, Debug)]
pub struct CsvEncoder {
    delimiter: u8,
    quote: u8,
    columns: ColumnNames,
    extension: String,
}

impl Default for CsvEncoder {
    fn default() -> Self {
        Self { delimiter: b',', quote: b'"', columns: ColumnNames::default(), extension: "csv".into() }
    }
}

impl CsvEncoder {
    pub fn from_options(opts: &ExportOptions) -> ExportResult<Self> {
        let byte = |c: char, what: &str| {
            u8::try_from(c)
                .ok()
                .filter(u8::is_ascii)
                .ok_or_else(|| ExportError::InvalidArgument(format!("{what} must be a single ASCII byte, got {c:?}")))
        };
        Ok(Self {
            delimiter: byte(opts.delimiter, "delimiter")?,
            quote: byte(opts.quote, "quote")?,
            columns: opts.columns.clone(),
            extension: opts.extension.clone(),
        })
    }
}

impl RecordEncoder for CsvEncoder {
    fn encode(&self, rows: &[Row], header: bool) -> ExportResult<Vec<u8>> {
        let mut w = WriterBuilder::new()
            .delimiter(self.delimiter)
            .quote(self.quote)
            .quote_style(QuoteStyle::Necessary)
            .terminator(Terminator::Any(b'\n'))
            .has_headers(false)
            .from_writer(Vec::with_capacity(rows.len() * 64));

        if header {
            w.write_record(self.columns.header())?;
        }
        for row in rows {
            w.write_record([
                row.tenant_id.to_string().as_str(),
                row.key.as_str(),
                row.payload.as_str(),
                format_timestamp(row.modified_at).as_str(),
                row.version.map(|v| v.to_string()).unwrap_or_default().as_str(),
            ])?;
        }
        w.into_inner().map_err(|e| ExportError::Io(e.into_error()))
    }

    fn extension(&self) -> &str {
        &self.extension
    }
}

/// `YYYY-MM-DD HH:MM:SS`, empty for NULL.
pub fn format_timestamp(at: Option<PrimitiveDateTime>) -> String {
    let fmt = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    at.and_then(|t| t.format(&fmt).ok()).unwrap_or_default()
}

/// Inverse of `format_timestamp`; used by SQL sources that store text timestamps.
pub fn parse_timestamp(s: &str) -> Option<PrimitiveDateTime> {
    let fmt = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    PrimitiveDateTime::parse(s, &fmt).ok()
}
