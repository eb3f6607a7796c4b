use crate::error::BackendError;
use crate::store::{etag, CompletedPart, ObjectStore};
use crate::util::{backend_io_error, create_with_backoff, remove_with_backoff, replace_file_atomic_backoff};
use ahash::AHashMap;
use parking_lot::Mutex;
use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// Directory-backed object store with multipart semantics.
///
/// File layout:
///   <root>/_staging/<session>/part_XXXXX.part   (uploaded parts)
///   <root>/_staging/<session>.inprogress        (assembled during completion)
///   <root>/<key>                                (final, after complete_session())
///
/// Notes:
///  - An object appears at its final path only by atomic promotion, so readers never
///    see a partially assembled object.
///  - `abort_session()` deletes the staged parts; it is a no-op for unknown sessions.
pub struct LocalDirStore {
    root: PathBuf,
    staging: PathBuf,
    sessions: Mutex<AHashMap<String, String>>,
    next_id: AtomicU64,
}

impl LocalDirStore {
    pub fn new(root: &Path) -> anyhow::Result<Self> {
        let staging = root.join("_staging");
        fs::create_dir_all(&staging)?;
        Ok(Self {
            root: root.to_path_buf(),
            staging,
            sessions: Mutex::new(AHashMap::new()),
            next_id: AtomicU64::new(0),
        })
    }

    /// Final path of `key` under the store root.
    pub fn object_path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    fn session_dir(&self, session_id: &str) -> PathBuf {
        self.staging.join(session_id)
    }

    fn part_path(&self, session_id: &str, part_number: u32) -> PathBuf {
        self.session_dir(session_id).join(format!("part_{:05}.part", part_number))
    }

    fn key_for(&self, session_id: &str) -> Result<String, BackendError> {
        self.sessions
            .lock()
            .get(session_id)
            .cloned()
            .ok_or_else(|| BackendError::fatal(format!("no such upload session {session_id}")))
    }
}

/// Keys are relative slash-separated paths without `..` or root components.
fn validate_key(key: &str) -> Result<(), BackendError> {
    let path = Path::new(key);
    let ok = !key.is_empty() && path.components().all(|c| matches!(c, Component::Normal(_)));
    if ok {
        Ok(())
    } else {
        Err(BackendError::fatal(format!("invalid object key {key:?}")))
    }
}

impl ObjectStore for LocalDirStore {
    fn create_multipart_session(&self, key: &str) -> Result<String, BackendError> {
        validate_key(key)?;
        let id = format!("local-{:08}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let dir = self.session_dir(&id);
        fs::create_dir_all(&dir).map_err(|e| backend_io_error(&format!("create {}", dir.display()), e))?;
        self.sessions.lock().insert(id.clone(), key.to_string());
        tracing::debug!(key, session = %id, "created local multipart session");
        Ok(id)
    }

    fn upload_part(&self, session_id: &str, part_number: u32, bytes: &[u8]) -> Result<String, BackendError> {
        self.key_for(session_id)?;
        let path = self.part_path(session_id, part_number);
        let write = || -> io::Result<()> {
            let f = create_with_backoff(&path)?;
            let mut w = BufWriter::new(f);
            w.write_all(bytes)?;
            w.flush()
        };
        write().map_err(|e| backend_io_error(&format!("write {}", path.display()), e))?;
        Ok(etag(bytes))
    }

    fn complete_session(&self, session_id: &str, parts: &[CompletedPart]) -> Result<(), BackendError> {
        let key = self.key_for(session_id)?;
        if parts.is_empty() {
            return Err(BackendError::fatal("completion requires at least one part"));
        }
        if parts.windows(2).any(|w| w[0].part_number >= w[1].part_number) {
            return Err(BackendError::fatal("parts must be listed in ascending part-number order"));
        }

        let tmp = self.staging.join(format!("{session_id}.inprogress"));
        let assemble = || -> Result<(), BackendError> {
            let f = create_with_backoff(&tmp).map_err(|e| backend_io_error("create assembly file", e))?;
            let mut w = BufWriter::new(f);
            for p in parts {
                let path = self.part_path(session_id, p.part_number);
                let bytes = fs::read(&path).map_err(|e| backend_io_error(&format!("read {}", path.display()), e))?;
                if etag(&bytes) != p.tag {
                    return Err(BackendError::fatal(format!("tag mismatch for part {} of {key}", p.part_number)));
                }
                w.write_all(&bytes).map_err(|e| backend_io_error("assemble object", e))?;
            }
            w.flush().map_err(|e| backend_io_error("flush object", e))
        };
        if let Err(e) = assemble() {
            let _ = remove_with_backoff(&tmp);
            return Err(e);
        }

        let dest = self.object_path(&key);
        replace_file_atomic_backoff(&tmp, &dest).map_err(|e| BackendError::fatal(format!("{e:#}")))?;
        self.sessions.lock().remove(session_id);
        let dir = self.session_dir(session_id);
        if let Err(e) = fs::remove_dir_all(&dir) {
            if e.kind() != io::ErrorKind::NotFound {
                tracing::warn!(dir = %dir.display(), error = %e, "failed to remove staged parts");
            }
        }
        tracing::debug!(key = %key, parts = parts.len(), "completed local multipart session");
        Ok(())
    }

    fn abort_session(&self, session_id: &str) -> Result<(), BackendError> {
        if self.sessions.lock().remove(session_id).is_none() {
            return Ok(());
        }
        let dir = self.session_dir(session_id);
        match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(backend_io_error(&format!("remove {}", dir.display()), e)),
        }
    }
}

/// Read a completed object back; test and verification helper.
pub fn read_object(store: &LocalDirStore, key: &str) -> io::Result<Vec<u8>> {
    fs::read(store.object_path(key))
}
