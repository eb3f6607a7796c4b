mod config;
mod error;
mod util;

mod segment;
mod row;
mod source;
mod reader;
mod sqlite;

mod store;
mod local_store;
mod upload;
mod encode;

mod exporter;
mod scheduler;
mod progress;
mod pipeline;

pub use crate::config::{ColumnNames, ExportOptions, RetryPolicy, DEFAULT_MAX_PARALLEL};
pub use crate::error::{BackendError, ExportError, ExportResult};
pub use crate::pipeline::TenantExport;

// Partitioning.
pub use crate::segment::{hex_to_ordinal, partition, segment_for_index, Segment, UpperBound, END_SENTINEL, KEY_SPACE};

// Rows and the row-source seam (plus in-memory and SQLite implementations).
pub use crate::row::{ExportedObject, Row};
pub use crate::source::{MemoryTable, PageQuery, RowSource, SnapshotTx, TxStats};
pub use crate::reader::{Page, PageEnd, ReadPlan, SnapshotReader};
pub use crate::sqlite::{render_page_query, write_rows, PageSql, SqliteSource};

// Object stores and the multipart sink.
pub use crate::store::{CompletedPart, MemoryStore, ObjectStore};
pub use crate::local_store::{read_object, LocalDirStore};
pub use crate::upload::{SinkState, UploadSession};

// Serialization.
pub use crate::encode::{format_timestamp, parse_timestamp, CsvEncoder, RecordEncoder};

// Per-segment export and wave scheduling.
pub use crate::exporter::{remote_key, SegmentExporter, SegmentStats};
pub use crate::scheduler::{run_waves, JobReport, SegmentFailure};

// Progress and tracing helpers for binaries.
pub use crate::progress::make_count_progress;
pub use crate::util::{init_tracing_once, retry_with_backoff};
