//! SQL-backed row source over SQLite, and the page-query renderer shared by SQL backends.

use crate::config::ColumnNames;
use crate::encode::{format_timestamp, parse_timestamp};
use crate::error::BackendError;
use crate::row::Row;
use crate::segment::UpperBound;
use crate::source::{PageQuery, RowSource, SnapshotTx};
use rusqlite::ffi::ErrorCode;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OpenFlags};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// A rendered page query with positional parameters.
#[derive(Clone, Debug, PartialEq)]
pub struct PageSql {
    pub sql: String,
    pub params: Vec<Value>,
}

/// Identifiers are interpolated, so only `[A-Za-z0-9_]` segments joined by `.` are accepted.
fn check_identifier(ident: &str) -> Result<(), BackendError> {
    let ok = !ident.is_empty()
        && ident
            .split('.')
            .all(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'));
    if ok {
        Ok(())
    } else {
        Err(BackendError::fatal(format!("unsafe SQL identifier {ident:?}")))
    }
}

/// Render the keyset-pagination statement for one page.
/// Parameter order: tenant, cursor (if any), segment start, segment end (if bounded), limit.
pub fn render_page_query(columns: &ColumnNames, q: &PageQuery<'_>) -> Result<PageSql, BackendError> {
    check_identifier(q.table)?;
    for c in columns.header() {
        check_identifier(c)?;
    }
    let key = &columns.key;

    let mut conds = vec![format!("{} = ?", columns.tenant)];
    let mut params = vec![Value::Integer(q.tenant_id)];
    if let Some(cursor) = q.cursor {
        conds.push(format!("{key} > ?"));
        params.push(Value::Text(cursor.to_string()));
    }
    conds.push(format!("{key} >= ?"));
    params.push(Value::Text(q.lower.to_string()));
    if let UpperBound::Exclusive(end) = q.upper {
        conds.push(format!("{key} < ?"));
        params.push(Value::Text(end.to_string()));
    }
    params.push(Value::Integer(i64::try_from(q.limit).unwrap_or(i64::MAX)));

    let sql = format!(
        "SELECT {}, {}, {}, {}, {} FROM {} WHERE {} ORDER BY {} LIMIT ?",
        columns.tenant,
        columns.key,
        columns.payload,
        columns.modified_at,
        columns.version,
        q.table,
        conds.join(" AND "),
        key,
    );
    Ok(PageSql { sql, params })
}

fn classify(context: &str, e: rusqlite::Error) -> BackendError {
    match &e {
        rusqlite::Error::SqliteFailure(inner, _)
            if matches!(inner.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) =>
        {
            BackendError::transient(format!("{context}: {e}"))
        }
        _ => BackendError::fatal(format!("{context}: {e}")),
    }
}

/// Row source reading a SQLite database file. Every snapshot gets its own read-only
/// connection holding one deferred read transaction.
pub struct SqliteSource {
    path: PathBuf,
    columns: ColumnNames,
    busy_timeout: Duration,
}

impl SqliteSource {
    pub fn new(path: &Path, columns: ColumnNames) -> Self {
        Self { path: path.to_path_buf(), columns, busy_timeout: Duration::from_secs(5) }
    }

    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    fn connect(&self) -> Result<Connection, BackendError> {
        let flags = OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX | OpenFlags::SQLITE_OPEN_URI;
        let conn = Connection::open_with_flags(&self.path, flags)
            .map_err(|e| classify(&format!("open {}", self.path.display()), e))?;
        conn.busy_timeout(self.busy_timeout).map_err(|e| classify("set busy timeout", e))?;
        Ok(conn)
    }
}

impl RowSource for SqliteSource {
    fn begin_snapshot(&self) -> Result<Box<dyn SnapshotTx + '_>, BackendError> {
        let conn = self.connect()?;
        conn.execute_batch("BEGIN DEFERRED").map_err(|e| classify("begin transaction", e))?;
        Ok(Box::new(SqliteTx { conn, columns: &self.columns, open: true }))
    }

    fn ping(&self) -> Result<(), BackendError> {
        let conn = self.connect()?;
        conn.query_row("SELECT 1", [], |r| r.get::<_, i64>(0))
            .map(|_| ())
            .map_err(|e| classify("ping", e))
    }
}

struct SqliteTx<'c> {
    conn: Connection,
    columns: &'c ColumnNames,
    open: bool,
}

impl SnapshotTx for SqliteTx<'_> {
    fn query_page(&mut self, q: &PageQuery<'_>) -> Result<Vec<Row>, BackendError> {
        let rendered = render_page_query(self.columns, q)?;
        let mut stmt = self
            .conn
            .prepare_cached(&rendered.sql)
            .map_err(|e| classify("prepare page query", e))?;
        let rows = stmt
            .query_map(params_from_iter(rendered.params.iter()), |r| {
                let modified: Option<String> = r.get(3)?;
                Ok(Row {
                    tenant_id: r.get(0)?,
                    key: r.get(1)?,
                    payload: r.get(2)?,
                    modified_at: modified.as_deref().and_then(parse_timestamp),
                    version: r.get(4)?,
                })
            })
            .map_err(|e| classify("query page", e))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| classify("scan row", e))
    }

    fn commit(mut self: Box<Self>) -> Result<(), BackendError> {
        self.open = false;
        self.conn.execute_batch("COMMIT").map_err(|e| classify("commit", e))
    }

    fn rollback(mut self: Box<Self>) -> Result<(), BackendError> {
        self.open = false;
        self.conn.execute_batch("ROLLBACK").map_err(|e| classify("rollback", e))
    }
}

impl Drop for SqliteTx<'_> {
    fn drop(&mut self) {
        if self.open {
            let _ = self.conn.execute_batch("ROLLBACK");
        }
    }
}

/// Create `table` if needed and upsert `rows` in one write transaction.
/// Timestamps are stored as `YYYY-MM-DD HH:MM:SS` text.
pub fn write_rows(path: &Path, table: &str, columns: &ColumnNames, rows: &[Row]) -> Result<(), BackendError> {
    check_identifier(table)?;
    for c in columns.header() {
        check_identifier(c)?;
    }
    let mut conn = Connection::open(path).map_err(|e| classify("open for write", e))?;
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {table} (\
           {t} INTEGER NOT NULL, {k} TEXT NOT NULL, {p} TEXT NOT NULL, {m} TEXT, {v} INTEGER, \
           PRIMARY KEY ({t}, {k}))",
        t = columns.tenant,
        k = columns.key,
        p = columns.payload,
        m = columns.modified_at,
        v = columns.version,
    ))
    .map_err(|e| classify("create table", e))?;

    let tx = conn.transaction().map_err(|e| classify("begin write", e))?;
    {
        let mut stmt = tx
            .prepare(&format!(
                "INSERT OR REPLACE INTO {table} ({}, {}, {}, {}, {}) VALUES (?1, ?2, ?3, ?4, ?5)",
                columns.tenant, columns.key, columns.payload, columns.modified_at, columns.version
            ))
            .map_err(|e| classify("prepare insert", e))?;
        for row in rows {
            let modified = row.modified_at.map(|t| format_timestamp(Some(t)));
            stmt.execute(rusqlite::params![row.tenant_id, row.key, row.payload, modified, row.version])
                .map_err(|e| classify("insert row", e))?;
        }
    }
    tx.commit().map_err(|e| classify("commit write", e))
}
