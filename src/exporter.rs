//! Segment exporter: drives one segment from snapshot pagination to a finished
//! remote object (or to no object when the segment holds no rows).

use crate::config::ExportOptions;
use crate::encode::RecordEncoder;
use crate::error::{ExportError, ExportResult};
use crate::reader::{PageEnd, ReadPlan, SnapshotReader};
use crate::row::ExportedObject;
use crate::segment::Segment;
use crate::source::RowSource;
use crate::store::ObjectStore;
use crate::upload::UploadSession;
use std::time::{Duration, Instant};

/// Deterministic remote key:
/// `{prefix}/tenant-{tenant}/{table}/{table}.hash-{start}-{end}.{ext}`.
pub fn remote_key(prefix: &str, tenant_id: i64, table: &str, segment: &Segment, ext: &str) -> String {
    let file = format!("{table}.hash-{}-{}.{ext}", segment.start_key, segment.end_key);
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        format!("tenant-{tenant_id}/{table}/{file}")
    } else {
        format!("{prefix}/tenant-{tenant_id}/{table}/{file}")
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SegmentStats {
    pub batches: usize,
    pub rows: u64,
    pub bytes: u64,
    pub ceiling_reached: bool,
    pub elapsed: Duration,
}

/// Borrowed collaborators for exporting segments of one tenant table.
#[derive(Clone, Copy)]
pub struct SegmentExporter<'a> {
    source: &'a dyn RowSource,
    store: &'a dyn ObjectStore,
    encoder: &'a dyn RecordEncoder,
    opts: &'a ExportOptions,
}

impl<'a> SegmentExporter<'a> {
    pub fn new(
        source: &'a dyn RowSource,
        store: &'a dyn ObjectStore,
        encoder: &'a dyn RecordEncoder,
        opts: &'a ExportOptions,
    ) -> Self {
        Self { source, store, encoder, opts }
    }

    pub fn remote_key(&self, segment: &Segment) -> String {
        remote_key(&self.opts.prefix, self.opts.tenant_id, &self.opts.table, segment, self.encoder.extension())
    }

    /// Export one segment. `Ok(None)` means the segment holds no rows.
    pub fn export(&self, segment: &Segment) -> ExportResult<Option<ExportedObject>> {
        self.export_with_stats(segment).map(|(obj, _)| obj)
    }

    /// Like `export`, also returning pagination statistics. Errors carry segment context.
    pub fn export_with_stats(&self, segment: &Segment) -> ExportResult<(Option<ExportedObject>, SegmentStats)> {
        self.run(segment).map_err(|e| ExportError::Segment {
            index: segment.index,
            start: segment.start_key.clone(),
            end: segment.end_key.clone(),
            source: Box::new(e),
        })
    }

    fn run(&self, segment: &Segment) -> ExportResult<(Option<ExportedObject>, SegmentStats)> {
        let started = Instant::now();
        let opts = self.opts;
        let key = self.remote_key(segment);
        tracing::info!(segment = segment.index, start = %segment.start_key, end = %segment.end_key, "processing segment");

        // Declared before the reader so the snapshot is released first on early exit.
        let mut sink = UploadSession::new(self.store, key.clone(), opts.retry);

        let table_ref = opts.table_ref();
        let plan = ReadPlan {
            tenant_id: opts.tenant_id,
            table: &table_ref,
            page_size: opts.batch_size,
            max_rounds: opts.max_batches,
            timeout: opts.transaction_timeout(),
            retry: opts.retry,
        };
        let mut reader = SnapshotReader::open(self.source, segment, &plan)?;

        let mut stats = SegmentStats::default();
        loop {
            let page = reader.read_next()?;
            if !page.rows.is_empty() {
                let bytes = self.encoder.encode(&page.rows, stats.rows == 0)?;
                sink.upload_part(&bytes)?;
                stats.batches += 1;
                stats.rows += page.rows.len() as u64;
                stats.bytes += bytes.len() as u64;
                tracing::info!(
                    segment = segment.index,
                    batch = stats.batches,
                    rows = page.rows.len(),
                    total_rows = stats.rows,
                    key = %key,
                    "exported and uploaded segment batch"
                );
            }
            if page.is_last() {
                stats.ceiling_reached = page.end == PageEnd::CeilingReached;
                break;
            }
        }
        reader.finish()?;
        stats.elapsed = started.elapsed();

        if stats.rows == 0 {
            sink.abort();
            tracing::info!(segment = segment.index, "segment has no data");
            return Ok((None, stats));
        }

        sink.complete()?;
        tracing::info!(
            segment = segment.index,
            rows = stats.rows,
            batches = stats.batches,
            ceiling_reached = stats.ceiling_reached,
            elapsed_ms = stats.elapsed.as_millis() as u64,
            key = %key,
            "segment completed"
        );
        Ok((Some(ExportedObject { segment: segment.clone(), remote_key: key, row_count: stats.rows }), stats))
    }
}
