//! Row source interface: snapshot transactions serving key-ordered pages of one
//! segment, plus an in-memory implementation with copy-on-write snapshots.

use crate::error::BackendError;
use crate::row::Row;
use crate::segment::{Segment, UpperBound};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// One page request: `tenant = ? AND key >= lower [AND key < upper] [AND key > cursor]
/// ORDER BY key LIMIT limit`.
#[derive(Clone, Copy, Debug)]
pub struct PageQuery<'a> {
    pub tenant_id: i64,
    pub table: &'a str,
    pub lower: &'a str,
    pub upper: UpperBound<'a>,
    pub cursor: Option<&'a str>,
    pub limit: usize,
}

impl<'a> PageQuery<'a> {
    pub fn for_segment(
        tenant_id: i64,
        table: &'a str,
        segment: &'a Segment,
        cursor: Option<&'a str>,
        limit: usize,
    ) -> Self {
        Self {
            tenant_id,
            table,
            lower: &segment.start_key,
            upper: segment.upper_bound(),
            cursor: cursor.filter(|c| !c.is_empty()),
            limit,
        }
    }

    /// The filter predicate, evaluated in memory.
    pub fn matches(&self, tenant_id: i64, key: &str) -> bool {
        if tenant_id != self.tenant_id || key < self.lower {
            return false;
        }
        if let UpperBound::Exclusive(end) = self.upper {
            if key >= end {
                return false;
            }
        }
        match self.cursor {
            Some(c) => key > c,
            None => true,
        }
    }
}

/// A consistent-snapshot read transaction scoped to one segment's pagination.
pub trait SnapshotTx {
    fn query_page(&mut self, query: &PageQuery<'_>) -> Result<Vec<Row>, BackendError>;
    fn commit(self: Box<Self>) -> Result<(), BackendError>;
    fn rollback(self: Box<Self>) -> Result<(), BackendError>;
}

/// Shared, read-only handle to the source table(s). Each segment opens its own snapshot.
pub trait RowSource: Send + Sync {
    fn begin_snapshot(&self) -> Result<Box<dyn SnapshotTx + '_>, BackendError>;

    /// Cheap connectivity probe run once before a job starts.
    fn ping(&self) -> Result<(), BackendError> {
        Ok(())
    }
}

// ----------------- in-memory table -----------------

type RowMap = BTreeMap<(i64, String), Row>;

/// Transaction bookkeeping, useful for asserting every snapshot was released.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TxStats {
    pub begun: usize,
    pub committed: usize,
    pub rolled_back: usize,
}

impl TxStats {
    pub fn open(&self) -> usize {
        self.begun.saturating_sub(self.committed + self.rolled_back)
    }
}

#[derive(Default)]
struct Counters {
    begun: AtomicUsize,
    committed: AtomicUsize,
    rolled_back: AtomicUsize,
}

/// In-memory table keyed by `(tenant, key)`. Writers copy-on-write, so a snapshot
/// taken by `begin_snapshot` never observes later inserts.
pub struct MemoryTable {
    name: String,
    rows: Mutex<Arc<RowMap>>,
    counters: Counters,
}

impl MemoryTable {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), rows: Mutex::new(Arc::new(BTreeMap::new())), counters: Counters::default() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Insert or replace a row; visible to snapshots begun afterwards.
    pub fn insert(&self, row: Row) {
        let mut guard = self.rows.lock();
        Arc::make_mut(&mut *guard).insert((row.tenant_id, row.key.clone()), row);
    }

    pub fn extend<I: IntoIterator<Item = Row>>(&self, rows: I) {
        let mut guard = self.rows.lock();
        let map = Arc::make_mut(&mut *guard);
        for row in rows {
            map.insert((row.tenant_id, row.key.clone()), row);
        }
    }

    pub fn len(&self) -> usize {
        self.rows.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn tx_stats(&self) -> TxStats {
        TxStats {
            begun: self.counters.begun.load(Ordering::SeqCst),
            committed: self.counters.committed.load(Ordering::SeqCst),
            rolled_back: self.counters.rolled_back.load(Ordering::SeqCst),
        }
    }
}

impl RowSource for MemoryTable {
    fn begin_snapshot(&self) -> Result<Box<dyn SnapshotTx + '_>, BackendError> {
        let snapshot = Arc::clone(&*self.rows.lock());
        self.counters.begun.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemorySnapshot { table: &self.name, rows: snapshot, counters: &self.counters }))
    }
}

struct MemorySnapshot<'t> {
    table: &'t str,
    rows: Arc<RowMap>,
    counters: &'t Counters,
}

impl SnapshotTx for MemorySnapshot<'_> {
    fn query_page(&mut self, q: &PageQuery<'_>) -> Result<Vec<Row>, BackendError> {
        if q.table != self.table {
            return Err(BackendError::fatal(format!("unknown table {}", q.table)));
        }
        let from = match q.cursor {
            Some(c) if c >= q.lower => Bound::Excluded((q.tenant_id, c.to_string())),
            _ => Bound::Included((q.tenant_id, q.lower.to_string())),
        };
        let page = self
            .rows
            .range((from, Bound::Unbounded))
            .map(|(_, row)| row)
            .take_while(|row| {
                row.tenant_id == q.tenant_id
                    && match q.upper {
                        UpperBound::Exclusive(end) => row.key.as_str() < end,
                        UpperBound::Unbounded => true,
                    }
            })
            .filter(|row| q.matches(row.tenant_id, &row.key))
            .take(q.limit)
            .cloned()
            .collect();
        Ok(page)
    }

    fn commit(self: Box<Self>) -> Result<(), BackendError> {
        self.counters.committed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn rollback(self: Box<Self>) -> Result<(), BackendError> {
        self.counters.rolled_back.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
