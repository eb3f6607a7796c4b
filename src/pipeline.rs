use crate::config::{ColumnNames, ExportOptions, RetryPolicy};
use crate::encode::{CsvEncoder, RecordEncoder};
use crate::error::{ExportError, ExportResult};
use crate::exporter::SegmentExporter;
use crate::progress::make_count_progress;
use crate::scheduler::{run_waves, JobReport};
use crate::segment::{partition, Segment};
use crate::source::RowSource;
use crate::store::ObjectStore;
use crate::util::init_tracing_once;
use std::time::Duration;

/// One tenant-table export job: partition, fan out in waves, collect the report.
#[derive(Clone, Debug, Default)]
pub struct TenantExport {
    pub(crate) opts: ExportOptions,
}

impl TenantExport {
    pub fn new() -> Self {
        Self { opts: ExportOptions::default() }
    }

    pub fn from_options(opts: ExportOptions) -> Self {
        Self { opts }
    }

    pub fn options(&self) -> &ExportOptions {
        &self.opts
    }

    // -------- Builder methods --------
    pub fn tenant(mut self, tenant_id: i64) -> Self { self.opts = self.opts.with_tenant(tenant_id); self }
    pub fn table(mut self, table: impl Into<String>) -> Self { self.opts = self.opts.with_table(table); self }
    pub fn database(mut self, db: impl Into<String>) -> Self { self.opts = self.opts.with_database(db); self }
    pub fn prefix(mut self, prefix: impl AsRef<str>) -> Self { self.opts = self.opts.with_prefix(prefix); self }
    pub fn segment_count(mut self, n: usize) -> Self { self.opts = self.opts.with_segments(n); self }
    pub fn max_parallel(mut self, n: usize) -> Self { self.opts = self.opts.with_max_parallel(n); self }
    pub fn batch_size(mut self, n: usize) -> Self { self.opts = self.opts.with_batch_size(n); self }
    pub fn max_batches(mut self, n: usize) -> Self { self.opts = self.opts.with_max_batches(n); self }
    pub fn transaction_timeout(mut self, t: Duration) -> Self { self.opts = self.opts.with_transaction_timeout(t); self }
    pub fn delimiter(mut self, d: char) -> Self { self.opts = self.opts.with_delimiter(d); self }
    pub fn columns(mut self, columns: ColumnNames) -> Self { self.opts = self.opts.with_columns(columns); self }
    pub fn retry(mut self, retry: RetryPolicy) -> Self { self.opts = self.opts.with_retry(retry); self }
    pub fn progress(mut self, yes: bool) -> Self { self.opts = self.opts.with_progress(yes); self }

    /// The segment plan this job will execute.
    pub fn plan_segments(&self) -> ExportResult<Vec<Segment>> {
        partition(self.opts.segments)
    }

    /// Export with the CSV encoder built from the options.
    pub fn run(&self, source: &dyn RowSource, store: &dyn ObjectStore) -> ExportResult<JobReport> {
        self.opts.validate()?;
        let encoder = CsvEncoder::from_options(&self.opts)?;
        self.run_with_encoder(source, store, &encoder)
    }

    /// Export with a caller-provided encoder.
    /// Fails as a whole only on invalid options or an unreachable row source.
    pub fn run_with_encoder(
        &self,
        source: &dyn RowSource,
        store: &dyn ObjectStore,
        encoder: &dyn RecordEncoder,
    ) -> ExportResult<JobReport> {
        init_tracing_once();
        self.opts.validate()?;
        source
            .ping()
            .map_err(|e| ExportError::Job(format!("row source unavailable: {e}")))?;

        let segments = self.plan_segments()?;
        tracing::info!(
            tenant_id = self.opts.tenant_id,
            table = %self.opts.table,
            segments = segments.len(),
            max_parallel = self.opts.wave_size(),
            batch_size = self.opts.batch_size,
            "starting export"
        );

        let exporter = SegmentExporter::new(source, store, encoder, &self.opts);
        let pb = self.opts.progress.then(|| make_count_progress(segments.len() as u64, "Exporting segments"));
        let report = run_waves(&segments, self.opts.wave_size(), pb.as_ref(), |seg| exporter.export(seg))?;
        if let Some(pb) = &pb {
            pb.finish_with_message(format!("{} exported, {} failed", report.succeeded(), report.failed()));
        }
        Ok(report)
    }
}
