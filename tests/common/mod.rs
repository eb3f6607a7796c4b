use hashsplit::{
    BackendError, CompletedPart, ExportOptions, MemoryStore, MemoryTable, ObjectStore, PageQuery, RetryPolicy, Row,
    RowSource, SnapshotTx,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

pub const TENANT: i64 = 999_999;
pub const TABLE: &str = "fis_aggr";

/// Options for small deterministic runs: no retry sleeps, tiny pages.
pub fn test_options(batch_size: usize) -> ExportOptions {
    ExportOptions::default()
        .with_tenant(TENANT)
        .with_table(TABLE)
        .with_prefix("test-prefix")
        .with_batch_size(batch_size)
        .with_retry(RetryPolicy::immediate(5))
}

/// A 32-char lowercase hex key starting with the two-digit `prefix` ordinal.
pub fn key_with_prefix(prefix: u8, n: usize) -> String {
    format!("{:02x}{:030x}", prefix, n)
}

pub fn row(key: &str) -> Row {
    Row::new(TENANT, key, format!("{{\"k\":\"{key}\"}}")).with_version(1)
}

/// Table with `per_prefix` rows under each listed prefix, plus one row for another tenant.
pub fn seeded_table(prefixes: &[u8], per_prefix: usize) -> MemoryTable {
    let table = MemoryTable::new(TABLE);
    table.extend(
        prefixes
            .iter()
            .flat_map(|p| (0..per_prefix).map(move |n| row(&key_with_prefix(*p, n)))),
    );
    table.insert(Row::new(TENANT + 1, key_with_prefix(0, 0), "other tenant"));
    table
}

/// Non-empty lines of a UTF-8 object.
pub fn lines(bytes: &[u8]) -> Vec<String> {
    String::from_utf8(bytes.to_vec())
        .unwrap()
        .lines()
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

// ----------------- failure-injecting object store -----------------

/// Wraps a `MemoryStore`; part uploads for keys containing `needle` fail
/// `failures` times (transiently unless `fatal`).
pub struct FlakyStore {
    pub inner: MemoryStore,
    needle: String,
    failures: AtomicUsize,
    fatal: bool,
    sessions: Mutex<HashMap<String, String>>,
    pub upload_calls: AtomicUsize,
}

impl FlakyStore {
    pub fn new(needle: &str, failures: usize) -> Self {
        Self {
            inner: MemoryStore::new(),
            needle: needle.to_string(),
            failures: AtomicUsize::new(failures),
            fatal: false,
            sessions: Mutex::new(HashMap::new()),
            upload_calls: AtomicUsize::new(0),
        }
    }

    pub fn fatal(mut self) -> Self {
        self.fatal = true;
        self
    }
}

impl ObjectStore for FlakyStore {
    fn create_multipart_session(&self, key: &str) -> Result<String, BackendError> {
        let id = self.inner.create_multipart_session(key)?;
        self.sessions.lock().insert(id.clone(), key.to_string());
        Ok(id)
    }

    fn upload_part(&self, session_id: &str, part_number: u32, bytes: &[u8]) -> Result<String, BackendError> {
        self.upload_calls.fetch_add(1, Ordering::SeqCst);
        let targeted = self
            .sessions
            .lock()
            .get(session_id)
            .map(|k| k.contains(&self.needle))
            .unwrap_or(false);
        if targeted {
            let left = self.failures.load(Ordering::SeqCst);
            if left > 0 {
                self.failures.store(left - 1, Ordering::SeqCst);
                return Err(if self.fatal {
                    BackendError::fatal("access denied")
                } else {
                    BackendError::transient("connection reset")
                });
            }
        }
        self.inner.upload_part(session_id, part_number, bytes)
    }

    fn complete_session(&self, session_id: &str, parts: &[CompletedPart]) -> Result<(), BackendError> {
        self.inner.complete_session(session_id, parts)
    }

    fn abort_session(&self, session_id: &str) -> Result<(), BackendError> {
        self.inner.abort_session(session_id)
    }
}

// ----------------- failure-injecting row source -----------------

/// Wraps a `MemoryTable`; the `fail_on_page`-th page query of each snapshot fails.
pub struct FailingSource {
    pub table: MemoryTable,
    fail_on_page: usize,
    error: BackendError,
    pub ping_ok: bool,
}

impl FailingSource {
    pub fn new(table: MemoryTable, fail_on_page: usize, error: BackendError) -> Self {
        Self { table, fail_on_page, error, ping_ok: true }
    }
}

impl RowSource for FailingSource {
    fn begin_snapshot(&self) -> Result<Box<dyn SnapshotTx + '_>, BackendError> {
        let inner = self.table.begin_snapshot()?;
        Ok(Box::new(FailingTx { inner, page: 0, fail_on_page: self.fail_on_page, error: self.error.clone() }))
    }

    fn ping(&self) -> Result<(), BackendError> {
        if self.ping_ok {
            Ok(())
        } else {
            Err(BackendError::fatal("connection refused"))
        }
    }
}

struct FailingTx<'a> {
    inner: Box<dyn SnapshotTx + 'a>,
    page: usize,
    fail_on_page: usize,
    error: BackendError,
}

impl SnapshotTx for FailingTx<'_> {
    fn query_page(&mut self, query: &PageQuery<'_>) -> Result<Vec<Row>, BackendError> {
        self.page += 1;
        if self.page == self.fail_on_page {
            return Err(self.error.clone());
        }
        self.inner.query_page(query)
    }

    fn commit(self: Box<Self>) -> Result<(), BackendError> {
        self.inner.commit()
    }

    fn rollback(self: Box<Self>) -> Result<(), BackendError> {
        self.inner.rollback()
    }
}
