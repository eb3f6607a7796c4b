use crate::error::{ExportError, ExportResult};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Column names of the source table; also the header record of every exported object.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ColumnNames {
    pub tenant: String,
    pub key: String,
    pub payload: String,
    pub modified_at: String,
    pub version: String,
}

impl Default for ColumnNames {
    fn default() -> Self {
        Self {
            tenant: "tenantid".into(),
            key: "hash".into(),
            payload: "aggr".into(),
            modified_at: "last_modified".into(),
            version: "version".into(),
        }
    }
}

impl ColumnNames {
    pub fn header(&self) -> [&str; 5] {
        [&self.tenant, &self.key, &self.payload, &self.modified_at, &self.version]
    }
}

/// Retry budget for transient query/upload failures. Delay doubles per attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 5, initial_delay_ms: 1_000, max_delay_ms: 30_000 }
    }
}

impl RetryPolicy {
    /// No sleeping between attempts; used by tests and dry runs.
    pub fn immediate(max_attempts: u32) -> Self {
        Self { max_attempts, initial_delay_ms: 0, max_delay_ms: 0 }
    }

    /// Delay before attempt `attempt + 1`, given `attempt` (1-based) just failed.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(20);
        Duration::from_millis(self.initial_delay_ms.saturating_mul(factor).min(self.max_delay_ms))
    }
}

/// Job options with sensible defaults and builder chaining.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ExportOptions {
    pub tenant_id: i64,
    pub table: String,
    pub database: Option<String>,     // qualifies the table as `database.table`
    pub prefix: String,               // remote key prefix
    pub segments: usize,              // number of hash segments, 1..=256
    pub max_parallel_segments: usize, // wave size; 0 falls back to the default
    pub batch_size: usize,            // rows per page / per uploaded part
    pub max_batches: usize,           // pagination safety ceiling per segment
    pub transaction_timeout_ms: u64,  // per-segment snapshot deadline
    pub delimiter: char,
    pub quote: char,
    pub extension: String,
    pub columns: ColumnNames,
    pub retry: RetryPolicy,
    pub progress: bool,
}

pub const DEFAULT_MAX_PARALLEL: usize = 8;

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            tenant_id: 0,
            table: "fis_aggr".into(),
            database: None,
            prefix: "hashsplit-export".into(),
            segments: 16,
            max_parallel_segments: DEFAULT_MAX_PARALLEL,
            batch_size: 100_000,
            max_batches: 10_000,
            transaction_timeout_ms: 600_000,
            delimiter: ',',
            quote: '"',
            extension: "csv".into(),
            columns: ColumnNames::default(),
            retry: RetryPolicy::default(),
            progress: false,
        }
    }
}

impl ExportOptions {
    /// Load options from a JSON file; absent fields keep their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        let opts: ExportOptions = serde_json::from_str(&text)
            .with_context(|| format!("parse config {}", path.display()))?;
        Ok(opts)
    }

    /// Override fields from `HASHSPLIT_*` environment variables.
    /// Unparseable numbers are reported and ignored.
    pub fn apply_env(mut self) -> Self {
        fn var(name: &str) -> Option<String> {
            std::env::var(name).ok().map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
        }
        fn num<T: std::str::FromStr>(name: &str) -> Option<T> {
            let raw = var(name)?;
            match raw.parse() {
                Ok(v) => Some(v),
                Err(_) => {
                    tracing::warn!("{} is set but not a number: {}", name, raw);
                    None
                }
            }
        }

        if let Some(v) = num("HASHSPLIT_TENANT_ID") { self.tenant_id = v; }
        if let Some(v) = var("HASHSPLIT_TABLE") { self.table = v; }
        if let Some(v) = var("HASHSPLIT_PREFIX") { self.prefix = v; }
        if let Some(v) = num("HASHSPLIT_SEGMENTS") { self.segments = v; }
        if let Some(v) = num("HASHSPLIT_MAX_PARALLEL") { self.max_parallel_segments = v; }
        if let Some(v) = num("HASHSPLIT_BATCH_SIZE") { self.batch_size = v; }
        if let Some(v) = num("HASHSPLIT_TRANSACTION_TIMEOUT_MS") { self.transaction_timeout_ms = v; }
        self
    }

    pub fn validate(&self) -> ExportResult<()> {
        let bad = |msg: String| Err(ExportError::InvalidArgument(msg));
        if self.tenant_id <= 0 {
            return bad(format!("tenant id must be positive, got {}", self.tenant_id));
        }
        if self.table.trim().is_empty() {
            return bad("table name is required".into());
        }
        if self.batch_size == 0 {
            return bad("batch size must be positive".into());
        }
        if self.max_batches == 0 {
            return bad("max batches must be positive".into());
        }
        if self.transaction_timeout_ms == 0 {
            return bad("transaction timeout must be positive".into());
        }
        if self.segments == 0 || self.segments > crate::segment::KEY_SPACE {
            return bad(format!("segments must be in [1, 256], got {}", self.segments));
        }
        if !self.delimiter.is_ascii() || !self.quote.is_ascii() || self.delimiter == self.quote {
            return bad("delimiter and quote must be distinct single-byte characters".into());
        }
        if self.retry.max_attempts == 0 {
            return bad("retry budget must allow at least one attempt".into());
        }
        Ok(())
    }

    /// `database.table` when a database is configured, else the bare table name.
    pub fn table_ref(&self) -> String {
        match self.database.as_deref().map(str::trim).filter(|d| !d.is_empty()) {
            Some(db) => format!("{}.{}", db, self.table),
            None => self.table.clone(),
        }
    }

    pub fn wave_size(&self) -> usize {
        if self.max_parallel_segments == 0 { DEFAULT_MAX_PARALLEL } else { self.max_parallel_segments }
    }

    pub fn transaction_timeout(&self) -> Duration {
        Duration::from_millis(self.transaction_timeout_ms)
    }

    pub fn with_tenant(mut self, tenant_id: i64) -> Self {
        self.tenant_id = tenant_id;
        self
    }
    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }
    pub fn with_database(mut self, db: impl Into<String>) -> Self {
        self.database = Some(db.into());
        self
    }
    pub fn with_prefix(mut self, prefix: impl AsRef<str>) -> Self {
        self.prefix = prefix.as_ref().trim_end_matches('/').to_string();
        self
    }
    pub fn with_segments(mut self, n: usize) -> Self {
        self.segments = n;
        self
    }
    pub fn with_max_parallel(mut self, n: usize) -> Self {
        self.max_parallel_segments = n;
        self
    }
    pub fn with_batch_size(mut self, n: usize) -> Self {
        self.batch_size = n;
        self
    }
    pub fn with_max_batches(mut self, n: usize) -> Self {
        self.max_batches = n;
        self
    }
    pub fn with_transaction_timeout(mut self, timeout: Duration) -> Self {
        self.transaction_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }
    pub fn with_delimiter(mut self, delimiter: char) -> Self {
        self.delimiter = delimiter;
        self
    }
    pub fn with_quote(mut self, quote: char) -> Self {
        self.quote = quote;
        self
    }
    pub fn with_columns(mut self, columns: ColumnNames) -> Self {
        self.columns = columns;
        self
    }
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
    pub fn with_progress(mut self, yes: bool) -> Self {
        self.progress = yes;
        self
    }
}
