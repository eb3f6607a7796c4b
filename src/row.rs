use crate::segment::Segment;
use serde::Serialize;
use time::PrimitiveDateTime;

/// One tenant row as read from the source table. Payload is passed through untouched.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Row {
    pub tenant_id: i64,
    pub key: String,
    pub payload: String,
    pub modified_at: Option<PrimitiveDateTime>,
    pub version: Option<i64>,
}

impl Row {
    pub fn new(tenant_id: i64, key: impl Into<String>, payload: impl Into<String>) -> Self {
        Self { tenant_id, key: key.into(), payload: payload.into(), modified_at: None, version: None }
    }

    pub fn with_modified_at(mut self, at: PrimitiveDateTime) -> Self {
        self.modified_at = Some(at);
        self
    }

    pub fn with_version(mut self, v: i64) -> Self {
        self.version = Some(v);
        self
    }
}

/// A completed remote object: one per segment that produced at least one row.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ExportedObject {
    pub segment: Segment,
    pub remote_key: String,
    pub row_count: u64,
}
