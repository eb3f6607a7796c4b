#[path = "common/mod.rs"]
mod common;

use common::*;
use hashsplit::{ExportError, MemoryStore, RetryPolicy, SinkState, UploadSession};
use std::sync::atomic::Ordering;

const KEY: &str = "p/tenant-1/t/t.hash-00-10.csv";

/// Parts become one object, concatenated in upload order; empty parts are skipped.
#[test]
fn parts_concatenate_in_order() {
    let store = MemoryStore::new();
    let mut sink = UploadSession::new(&store, KEY, RetryPolicy::immediate(5));
    assert_eq!(sink.state(), SinkState::Open);

    sink.upload_part(b"").unwrap();
    assert_eq!(sink.state(), SinkState::Open);
    assert_eq!(store.pending_sessions(), 0, "session must be created lazily");

    sink.upload_part(b"header\na\n").unwrap();
    sink.upload_part(b"").unwrap();
    sink.upload_part(b"b\n").unwrap();
    assert_eq!(sink.state(), SinkState::Uploading);
    assert_eq!(sink.parts().iter().map(|p| p.part_number).collect::<Vec<_>>(), vec![1, 2]);
    assert_eq!(sink.bytes_uploaded(), 11);
    assert!(store.object(KEY).is_none(), "object visible before completion");

    sink.complete().unwrap();
    assert_eq!(sink.state(), SinkState::Completed);
    assert_eq!(store.object(KEY).unwrap(), b"header\na\nb\n".to_vec());
    assert_eq!(store.pending_sessions(), 0);
}

#[test]
fn complete_without_parts_fails_and_leaves_nothing() {
    let store = MemoryStore::new();
    let mut sink = UploadSession::new(&store, KEY, RetryPolicy::immediate(5));
    sink.upload_part(b"").unwrap();
    let err = sink.complete().unwrap_err();
    assert!(matches!(err, ExportError::NoPartsUploaded { .. }), "{err}");
    assert_eq!(sink.state(), SinkState::Aborted);
    assert!(store.keys().is_empty());
}

/// Four transient failures fit in a budget of five attempts.
#[test]
fn transient_part_failures_are_retried() {
    let store = FlakyStore::new("tenant-1", 4);
    let mut sink = UploadSession::new(&store, KEY, RetryPolicy::immediate(5));
    sink.upload_part(b"x,y\n").unwrap();
    sink.complete().unwrap();
    assert_eq!(store.upload_calls.load(Ordering::SeqCst), 5);
    assert_eq!(store.inner.object(KEY).unwrap(), b"x,y\n".to_vec());
}

/// When the budget runs out the session is aborted and no object appears.
#[test]
fn exhausted_retries_abort_the_session() {
    let store = FlakyStore::new("tenant-1", 10);
    let mut sink = UploadSession::new(&store, KEY, RetryPolicy::immediate(5));
    let err = sink.upload_part(b"x,y\n").unwrap_err();
    match err {
        ExportError::RetriesExhausted { attempts, .. } => assert_eq!(attempts, 5),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(sink.state(), SinkState::Aborted);
    assert_eq!(store.inner.pending_sessions(), 0);
    assert_eq!(store.inner.aborted_keys(), vec![KEY.to_string()]);
    assert!(store.inner.object(KEY).is_none());

    let again = sink.upload_part(b"more").unwrap_err();
    assert!(matches!(again, ExportError::SessionClosed { .. }));
}

#[test]
fn fatal_part_failure_is_not_retried() {
    let store = FlakyStore::new("tenant-1", 1).fatal();
    let mut sink = UploadSession::new(&store, KEY, RetryPolicy::immediate(5));
    assert!(sink.upload_part(b"x").is_err());
    assert_eq!(store.upload_calls.load(Ordering::SeqCst), 1);
    assert_eq!(sink.state(), SinkState::Aborted);
}

/// Abort may be called any number of times; the remote session is released once.
#[test]
fn abort_is_idempotent() {
    let store = MemoryStore::new();
    let mut sink = UploadSession::new(&store, KEY, RetryPolicy::immediate(5));
    sink.upload_part(b"a\n").unwrap();
    sink.abort();
    sink.abort();
    assert_eq!(store.aborted_keys().len(), 1);
    assert_eq!(store.pending_sessions(), 0);
    assert!(matches!(sink.complete(), Err(ExportError::SessionClosed { .. })));
}

/// Dropping an unfinished session releases it; dropping a completed one keeps the object.
#[test]
fn drop_aborts_unfinished_sessions_only() {
    let store = MemoryStore::new();
    {
        let mut sink = UploadSession::new(&store, "a.csv", RetryPolicy::immediate(5));
        sink.upload_part(b"1\n").unwrap();
    }
    {
        let mut sink = UploadSession::new(&store, "b.csv", RetryPolicy::immediate(5));
        sink.upload_part(b"2\n").unwrap();
        sink.complete().unwrap();
    }
    assert_eq!(store.aborted_keys(), vec!["a.csv".to_string()]);
    assert_eq!(store.keys(), vec!["b.csv".to_string()]);
    assert_eq!(store.pending_sessions(), 0);
}
