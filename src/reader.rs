//! Snapshot cursor reader: keyset pagination over one segment inside a single
//! snapshot transaction that stays open until pagination ends.

use crate::config::RetryPolicy;
use crate::error::{ExportError, ExportResult};
use crate::row::Row;
use crate::segment::Segment;
use crate::source::{PageQuery, RowSource, SnapshotTx};
use crate::util::retry_with_backoff;
use std::time::{Duration, Instant};

/// Why the current page is (or is not) the last one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PageEnd {
    /// Full page; more rows may follow.
    More,
    /// Short page: the segment is exhausted.
    Exhausted,
    /// The round ceiling was hit; pagination stops without error.
    CeilingReached,
}

#[derive(Debug)]
pub struct Page {
    pub rows: Vec<Row>,
    pub end: PageEnd,
}

impl Page {
    #[inline]
    pub fn is_last(&self) -> bool {
        self.end != PageEnd::More
    }
}

/// Knobs for one segment's pagination.
#[derive(Clone, Debug)]
pub struct ReadPlan<'a> {
    pub tenant_id: i64,
    pub table: &'a str,
    pub page_size: usize,
    pub max_rounds: usize,
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

pub struct SnapshotReader<'s, 'p> {
    tx: Option<Box<dyn SnapshotTx + 's>>,
    segment: &'p Segment,
    plan: &'p ReadPlan<'p>,
    cursor: Option<String>,
    rounds: usize,
    started: Instant,
    done: bool,
}

impl<'s, 'p> SnapshotReader<'s, 'p> {
    /// Open the snapshot transaction for `segment`. It is released by `finish`,
    /// or rolled back on drop.
    pub fn open(source: &'s dyn RowSource, segment: &'p Segment, plan: &'p ReadPlan<'p>) -> ExportResult<Self> {
        let tx = retry_with_backoff(&plan.retry, "begin snapshot", || source.begin_snapshot())?;
        Ok(Self { tx: Some(tx), segment, plan, cursor: None, rounds: 0, started: Instant::now(), done: false })
    }

    /// Key of the last row returned so far.
    pub fn cursor(&self) -> Option<&str> {
        self.cursor.as_deref()
    }

    pub fn rounds(&self) -> usize {
        self.rounds
    }

    /// Fetch the next page. After a page with `is_last()`, further calls return
    /// an empty exhausted page without touching the source.
    pub fn read_next(&mut self) -> ExportResult<Page> {
        if self.done {
            return Ok(Page { rows: Vec::new(), end: PageEnd::Exhausted });
        }
        let elapsed = self.started.elapsed();
        if elapsed >= self.plan.timeout {
            return Err(ExportError::Timeout { elapsed });
        }
        let tx = self
            .tx
            .as_mut()
            .ok_or_else(|| ExportError::Job("snapshot already released".into()))?;

        let query = PageQuery::for_segment(
            self.plan.tenant_id,
            self.plan.table,
            self.segment,
            self.cursor.as_deref(),
            self.plan.page_size,
        );
        tracing::debug!(
            segment = self.segment.index,
            start = %self.segment.start_key,
            end = %self.segment.end_key,
            cursor = ?query.cursor,
            limit = query.limit,
            "querying segment page"
        );
        let rows = retry_with_backoff(&self.plan.retry, "query page", || tx.query_page(&query))?;
        self.rounds += 1;

        if let Some(last) = rows.last() {
            self.cursor = Some(last.key.clone());
        }

        let end = if rows.len() < self.plan.page_size {
            PageEnd::Exhausted
        } else if self.rounds >= self.plan.max_rounds {
            tracing::warn!(
                segment = self.segment.index,
                max_batches = self.plan.max_rounds,
                "segment export hit maximum batch limit"
            );
            PageEnd::CeilingReached
        } else {
            PageEnd::More
        };
        self.done = end != PageEnd::More;
        Ok(Page { rows, end })
    }

    /// Commit the read transaction.
    pub fn finish(mut self) -> ExportResult<()> {
        match self.tx.take() {
            Some(tx) => tx.commit().map_err(ExportError::from),
            None => Ok(()),
        }
    }
}

impl Drop for SnapshotReader<'_, '_> {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            if let Err(e) = tx.rollback() {
                tracing::warn!(segment = self.segment.index, error = %e, "snapshot rollback failed");
            }
        }
    }
}
