//! Multi-part upload sink: turns an ordered stream of byte batches into one
//! remote object, or into nothing at all.
//!
//! States: `Open` → (`Uploading`)* → `Completed` | `Aborted`.
//! The remote session is created lazily by the first non-empty part.

use crate::config::RetryPolicy;
use crate::error::{ExportError, ExportResult};
use crate::store::{CompletedPart, ObjectStore};
use crate::util::retry_with_backoff;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SinkState {
    Open,
    Uploading,
    Completed,
    Aborted,
}

pub struct UploadSession<'s> {
    store: &'s dyn ObjectStore,
    remote_key: String,
    session_id: Option<String>,
    parts: Vec<CompletedPart>,
    next_part_number: u32,
    bytes_uploaded: u64,
    state: SinkState,
    retry: RetryPolicy,
}

impl<'s> UploadSession<'s> {
    pub fn new(store: &'s dyn ObjectStore, remote_key: impl Into<String>, retry: RetryPolicy) -> Self {
        Self {
            store,
            remote_key: remote_key.into(),
            session_id: None,
            parts: Vec::new(),
            next_part_number: 1,
            bytes_uploaded: 0,
            state: SinkState::Open,
            retry,
        }
    }

    pub fn remote_key(&self) -> &str {
        &self.remote_key
    }

    pub fn state(&self) -> SinkState {
        self.state
    }

    pub fn parts(&self) -> &[CompletedPart] {
        &self.parts
    }

    pub fn bytes_uploaded(&self) -> u64 {
        self.bytes_uploaded
    }

    fn ensure_writable(&self) -> ExportResult<()> {
        match self.state {
            SinkState::Open | SinkState::Uploading => Ok(()),
            SinkState::Completed | SinkState::Aborted => {
                Err(ExportError::SessionClosed { key: self.remote_key.clone() })
            }
        }
    }

    fn ensure_session(&mut self) -> ExportResult<String> {
        if let Some(id) = &self.session_id {
            return Ok(id.clone());
        }
        let store = self.store;
        let key = self.remote_key.as_str();
        let id = retry_with_backoff(&self.retry, "create multipart session", || store.create_multipart_session(key))?;
        tracing::info!(key = %self.remote_key, session = %id, "initiated multipart upload");
        self.session_id = Some(id.clone());
        Ok(id)
    }

    /// Append `bytes` as the next part. Empty input is a no-op.
    /// When the retry budget runs out the session is aborted and the error surfaced.
    pub fn upload_part(&mut self, bytes: &[u8]) -> ExportResult<()> {
        self.ensure_writable()?;
        if bytes.is_empty() {
            return Ok(());
        }
        let session_id = match self.ensure_session() {
            Ok(id) => id,
            Err(e) => {
                self.abort();
                return Err(e);
            }
        };
        let part_number = self.next_part_number;
        let store = self.store;
        let uploaded = retry_with_backoff(&self.retry, "upload part", || {
            store.upload_part(&session_id, part_number, bytes)
        });
        let tag = match uploaded {
            Ok(tag) => tag,
            Err(e) => {
                tracing::error!(key = %self.remote_key, part = part_number, error = %e, "part upload failed");
                self.abort();
                return Err(e);
            }
        };
        self.parts.push(CompletedPart { part_number, tag });
        self.next_part_number += 1;
        self.bytes_uploaded += bytes.len() as u64;
        self.state = SinkState::Uploading;
        tracing::debug!(key = %self.remote_key, part = part_number, size = bytes.len(), "uploaded multipart part");
        Ok(())
    }

    /// Finalize the object from all uploaded parts in part-number order.
    /// Fails with `NoPartsUploaded` (after releasing the session) when nothing was sent.
    pub fn complete(&mut self) -> ExportResult<()> {
        self.ensure_writable()?;
        let session_id = match (&self.session_id, self.parts.is_empty()) {
            (Some(id), false) => id.clone(),
            _ => {
                self.abort();
                return Err(ExportError::NoPartsUploaded { key: self.remote_key.clone() });
            }
        };
        let store = self.store;
        let parts = self.parts.as_slice();
        let done = retry_with_backoff(&self.retry, "complete multipart upload", || {
            store.complete_session(&session_id, parts)
        });
        if let Err(e) = done {
            tracing::error!(key = %self.remote_key, error = %e, "multipart completion failed");
            self.abort();
            return Err(e);
        }
        self.state = SinkState::Completed;
        tracing::info!(key = %self.remote_key, parts = self.parts.len(), bytes = self.bytes_uploaded, "completed multipart upload");
        Ok(())
    }

    /// Release server-side state of an unfinished upload. Idempotent and best-effort;
    /// a completed session is left untouched.
    pub fn abort(&mut self) {
        match self.state {
            SinkState::Completed | SinkState::Aborted => return,
            SinkState::Open | SinkState::Uploading => {}
        }
        self.state = SinkState::Aborted;
        let Some(id) = self.session_id.as_deref() else { return };
        match self.store.abort_session(id) {
            Ok(()) => tracing::info!(key = %self.remote_key, session = %id, "aborted multipart upload"),
            Err(e) => tracing::error!(key = %self.remote_key, session = %id, error = %e, "failed to abort multipart upload"),
        }
    }
}

impl Drop for UploadSession<'_> {
    fn drop(&mut self) {
        self.abort();
    }
}
