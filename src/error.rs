//! Error taxonomy: what collaborators return (`BackendError`) and what the export
//! core returns (`ExportError`).

use std::time::Duration;
use thiserror::Error;

/// Failure reported by a row source or object store.
/// Only `Transient` failures are retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("transient: {0}")]
    Transient(String),
    #[error("{0}")]
    Fatal(String),
}

impl BackendError {
    pub fn transient(msg: impl Into<String>) -> Self {
        BackendError::Transient(msg.into())
    }

    pub fn fatal(msg: impl Into<String>) -> Self {
        BackendError::Fatal(msg.into())
    }

    #[inline]
    pub fn is_transient(&self) -> bool {
        matches!(self, BackendError::Transient(_))
    }
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("{op} failed after {attempts} attempts")]
    RetriesExhausted {
        op: &'static str,
        attempts: u32,
        #[source]
        source: BackendError,
    },

    #[error("no parts uploaded for {key}")]
    NoPartsUploaded { key: String },

    #[error("upload session for {key} is already closed")]
    SessionClosed { key: String },

    #[error("encode batch: {0}")]
    Encode(#[from] csv::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("snapshot transaction exceeded its deadline after {elapsed:?}")]
    Timeout { elapsed: Duration },

    #[error("segment {index} [{start}, {end}) failed")]
    Segment {
        index: usize,
        start: String,
        end: String,
        #[source]
        source: Box<ExportError>,
    },

    #[error("job failed: {0}")]
    Job(String),
}

impl ExportError {
    /// Display of this error followed by every `source()` in the chain, `: `-joined.
    pub fn chain(&self) -> String {
        let mut out = self.to_string();
        let mut cur = std::error::Error::source(self);
        while let Some(e) = cur {
            out.push_str(": ");
            out.push_str(&e.to_string());
            cur = e.source();
        }
        out
    }

    /// Innermost cause, skipping the segment wrapper.
    pub fn root(&self) -> &ExportError {
        match self {
            ExportError::Segment { source, .. } => source.root(),
            other => other,
        }
    }
}

pub type ExportResult<T> = std::result::Result<T, ExportError>;
