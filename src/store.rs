//! Object store interface (multipart protocol) and an in-memory implementation.

use crate::error::BackendError;
use ahash::AHashMap;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// One uploaded part as needed by the completion call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompletedPart {
    pub part_number: u32,
    pub tag: String,
}

/// Multipart upload capability. A session's object becomes visible only after
/// `complete_session`; aborted or never-completed sessions must stay invisible.
pub trait ObjectStore: Send + Sync {
    fn create_multipart_session(&self, key: &str) -> Result<String, BackendError>;
    fn upload_part(&self, session_id: &str, part_number: u32, bytes: &[u8]) -> Result<String, BackendError>;
    fn complete_session(&self, session_id: &str, parts: &[CompletedPart]) -> Result<(), BackendError>;
    fn abort_session(&self, session_id: &str) -> Result<(), BackendError>;
}

// ----------------- in-memory store -----------------

struct PendingUpload {
    key: String,
    parts: BTreeMap<u32, (String, Vec<u8>)>,
}

#[derive(Default)]
struct MemoryState {
    pending: AHashMap<String, PendingUpload>,
    objects: BTreeMap<String, Vec<u8>>,
    aborted: Vec<String>,
}

/// In-memory object store. Completed objects are the concatenation of the
/// listed parts in ascending part-number order.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    next_id: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.state.lock().objects.get(key).cloned()
    }

    /// Keys of completed objects, sorted.
    pub fn keys(&self) -> Vec<String> {
        self.state.lock().objects.keys().cloned().collect()
    }

    /// Number of sessions neither completed nor aborted.
    pub fn pending_sessions(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Keys whose sessions were aborted, in abort order.
    pub fn aborted_keys(&self) -> Vec<String> {
        self.state.lock().aborted.clone()
    }
}

pub(crate) fn etag(bytes: &[u8]) -> String {
    use std::hash::{BuildHasher, Hasher};
    let state = ahash::RandomState::with_seeds(0x5eed, 0xfeed, 0xc0de, 0xcafe);
    let mut h = state.build_hasher();
    h.write(bytes);
    format!("\"{:016x}\"", h.finish())
}

impl ObjectStore for MemoryStore {
    fn create_multipart_session(&self, key: &str) -> Result<String, BackendError> {
        let id = format!("mem-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        self.state
            .lock()
            .pending
            .insert(id.clone(), PendingUpload { key: key.to_string(), parts: BTreeMap::new() });
        Ok(id)
    }

    fn upload_part(&self, session_id: &str, part_number: u32, bytes: &[u8]) -> Result<String, BackendError> {
        let mut st = self.state.lock();
        let upload = st
            .pending
            .get_mut(session_id)
            .ok_or_else(|| BackendError::fatal(format!("no such upload session {session_id}")))?;
        let tag = etag(bytes);
        upload.parts.insert(part_number, (tag.clone(), bytes.to_vec()));
        Ok(tag)
    }

    fn complete_session(&self, session_id: &str, parts: &[CompletedPart]) -> Result<(), BackendError> {
        let mut st = self.state.lock();
        let upload = st
            .pending
            .get(session_id)
            .ok_or_else(|| BackendError::fatal(format!("no such upload session {session_id}")))?;
        if parts.is_empty() {
            return Err(BackendError::fatal("completion requires at least one part"));
        }
        if parts.windows(2).any(|w| w[0].part_number >= w[1].part_number) {
            return Err(BackendError::fatal("parts must be listed in ascending part-number order"));
        }
        let mut body = Vec::new();
        for p in parts {
            match upload.parts.get(&p.part_number) {
                Some((tag, bytes)) if *tag == p.tag => body.extend_from_slice(bytes),
                _ => return Err(BackendError::fatal(format!("invalid part {} for {}", p.part_number, upload.key))),
            }
        }
        let key = upload.key.clone();
        st.pending.remove(session_id);
        st.objects.insert(key, body);
        Ok(())
    }

    fn abort_session(&self, session_id: &str) -> Result<(), BackendError> {
        let mut st = self.state.lock();
        if let Some(upload) = st.pending.remove(session_id) {
            st.aborted.push(upload.key);
        }
        Ok(())
    }
}
