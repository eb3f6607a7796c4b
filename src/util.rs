use crate::config::RetryPolicy;
use crate::error::{BackendError, ExportError, ExportResult};
use anyhow::{Context, Result};

static INIT_ONCE: std::sync::Once = std::sync::Once::new();
pub fn init_tracing_once() {
    INIT_ONCE.call_once(|| {
        let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
        let _ = tracing_subscriber::fmt().with_env_filter(env_filter).try_init();
    });
}

// -------- retry with exponential backoff for collaborator calls --------

/// Run `f` until it succeeds, fails fatally, or the retry budget is spent.
/// Transient failures sleep `policy.delay_after(attempt)` between attempts.
pub fn retry_with_backoff<T, F>(policy: &RetryPolicy, op: &'static str, mut f: F) -> ExportResult<T>
where
    F: FnMut() -> std::result::Result<T, BackendError>,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 1u32;
    loop {
        match f() {
            Ok(v) => return Ok(v),
            Err(e) if !e.is_transient() => return Err(ExportError::Backend(e)),
            Err(e) if attempt >= attempts => {
                return Err(ExportError::RetriesExhausted { op, attempts, source: e });
            }
            Err(e) => {
                let delay = policy.delay_after(attempt);
                tracing::warn!(op, attempt, max_attempts = attempts, ?delay, error = %e, "transient failure, retrying");
                if !delay.is_zero() {
                    sleep(delay);
                }
                attempt += 1;
            }
        }
    }
}

// -------- file operations with backoff (used by the local object store) --------

use std::fs::{self, File};
use std::io;
use std::path::Path;
use std::thread::sleep;
use std::time::Duration;

const FS_TRIES: usize = 16;
const FS_DELAY_MS: u64 = 50;

/// Sharing and lock violations (AV scanners, backup agents, network volumes) clear up on their own.
fn is_retriable_io_error(e: &io::Error) -> bool {
    // 5 access denied, 21 device not ready, 32 sharing violation, 33 lock violation, 1224 mapped section
    matches!(e.raw_os_error(), Some(5 | 21 | 32 | 33 | 1224))
        || matches!(e.kind(), io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock)
}

/// Map an I/O failure onto the collaborator taxonomy.
pub fn backend_io_error(context: &str, e: io::Error) -> BackendError {
    if is_retriable_io_error(&e) {
        BackendError::transient(format!("{context}: {e}"))
    } else {
        BackendError::fatal(format!("{context}: {e}"))
    }
}

/// Repeat `op` while it fails with a retriable error, sleeping a linearly growing delay.
fn io_with_backoff<T>(mut op: impl FnMut() -> io::Result<T>) -> io::Result<T> {
    let mut attempt = 1;
    loop {
        match op() {
            Err(e) if attempt < FS_TRIES && is_retriable_io_error(&e) => {
                sleep(Duration::from_millis(FS_DELAY_MS * attempt as u64));
                attempt += 1;
            }
            other => return other,
        }
    }
}

pub fn create_with_backoff(path: &Path) -> io::Result<File> {
    io_with_backoff(|| File::create(path))
}

/// Succeeds when the file is already gone.
pub fn remove_with_backoff(path: &Path) -> io::Result<()> {
    io_with_backoff(|| match fs::remove_file(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    })
}

/// Move `tmp` over `dest`, creating `dest`'s parent first. Falls back to copy+remove
/// when a rename is impossible (e.g. across devices).
pub fn replace_file_atomic_backoff(tmp: &Path, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    if io_with_backoff(|| fs::rename(tmp, dest)).is_ok() {
        return Ok(());
    }
    io_with_backoff(|| fs::copy(tmp, dest)).with_context(|| format!("copy {} -> {}", tmp.display(), dest.display()))?;
    remove_with_backoff(tmp).with_context(|| format!("remove {}", tmp.display()))
}
