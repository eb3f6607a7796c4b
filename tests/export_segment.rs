#[path = "common/mod.rs"]
mod common;

use common::*;
use hashsplit::{
    partition, remote_key, BackendError, CsvEncoder, ExportError, MemoryStore, MemoryTable, RecordEncoder, Row,
    SegmentExporter,
};
use time::macros::datetime;

/// Rows the seeded table holds under `prefixes`, in key order.
fn expected_rows(prefixes: &[u8], per_prefix: usize) -> Vec<Row> {
    let mut rows: Vec<Row> = prefixes
        .iter()
        .flat_map(|p| (0..per_prefix).map(move |n| row(&key_with_prefix(*p, n))))
        .collect();
    rows.sort_by(|a, b| a.key.cmp(&b.key));
    rows
}

/// The finished object is the header plus every segment row, in key order, exactly once.
#[test]
fn segment_object_holds_header_and_all_rows() {
    let table = seeded_table(&[0x00, 0x10, 0x3f, 0x40, 0x80], 23);
    let segs = partition(4).unwrap();
    let opts = test_options(5);
    let store = MemoryStore::new();
    let enc = CsvEncoder::from_options(&opts).unwrap();
    let exporter = SegmentExporter::new(&table, &store, &enc, &opts);

    let (obj, stats) = exporter.export_with_stats(&segs[0]).unwrap();
    let obj = obj.unwrap();
    assert_eq!(obj.row_count, 69);
    assert_eq!(stats.rows, 69);
    assert_eq!(stats.batches, 14);
    assert!(!stats.ceiling_reached);

    let bytes = store.object(&obj.remote_key).unwrap();
    let all = lines(&bytes);
    assert_eq!(all[0], "tenantid,hash,aggr,last_modified,version");
    assert_eq!(all.iter().filter(|l| l.starts_with("tenantid,")).count(), 1);
    assert_eq!(all.len(), 70);

    // Same bytes as encoding the segment's rows in one go.
    let expected = expected_rows(&[0x00, 0x10, 0x3f], 23);
    assert_eq!(bytes, enc.encode(&expected, true).unwrap());
    assert_eq!(store.pending_sessions(), 0);
}

/// Re-exporting an unchanged table produces byte-identical objects under the same key.
#[test]
fn reexport_is_byte_identical() {
    let table = seeded_table(&[0xc0, 0xfe, 0xff], 17);
    let segs = partition(4).unwrap();
    let opts = test_options(4);
    let enc = CsvEncoder::default();

    let first = MemoryStore::new();
    let second = MemoryStore::new();
    let a = SegmentExporter::new(&table, &first, &enc, &opts).export(&segs[3]).unwrap().unwrap();
    let b = SegmentExporter::new(&table, &second, &enc, &opts).export(&segs[3]).unwrap().unwrap();
    assert_eq!(a, b);
    assert_eq!(a.row_count, 51);
    assert_eq!(first.object(&a.remote_key), second.object(&b.remote_key));
}

/// A segment without rows yields no object and leaves no session behind.
#[test]
fn empty_segment_produces_no_object() {
    let table = seeded_table(&[0x00], 10);
    let segs = partition(16).unwrap();
    let opts = test_options(5);
    let store = MemoryStore::new();
    let enc = CsvEncoder::default();
    let exporter = SegmentExporter::new(&table, &store, &enc, &opts);

    assert!(exporter.export(&segs[7]).unwrap().is_none());
    assert!(store.keys().is_empty());
    assert_eq!(store.pending_sessions(), 0);
    assert!(store.aborted_keys().is_empty(), "no session should have been opened");
    assert_eq!(table.tx_stats().open(), 0);
}

#[test]
fn remote_keys_follow_layout() {
    let segs = partition(16).unwrap();
    assert_eq!(
        remote_key("test-prefix", TENANT, TABLE, &segs[0], "csv"),
        "test-prefix/tenant-999999/fis_aggr/fis_aggr.hash-00-10.csv"
    );
    assert_eq!(
        remote_key("test-prefix/", TENANT, TABLE, &segs[15], "csv"),
        "test-prefix/tenant-999999/fis_aggr/fis_aggr.hash-f0-100.csv"
    );
    assert_eq!(remote_key("", 7, "t", &segs[1], "tsv"), "tenant-7/t/t.hash-10-20.tsv");

    let opts = test_options(5);
    let store = MemoryStore::new();
    let enc = CsvEncoder::default();
    let table = MemoryTable::new(TABLE);
    let exporter = SegmentExporter::new(&table, &store, &enc, &opts);
    assert_eq!(exporter.remote_key(&segs[0]), remote_key("test-prefix", TENANT, TABLE, &segs[0], "csv"));
}

/// A query failure after the first part aborts the upload and rolls back the snapshot.
#[test]
fn mid_segment_failure_aborts_upload() {
    let source = FailingSource::new(seeded_table(&[0x00], 12), 2, BackendError::fatal("server gone"));
    let segs = partition(16).unwrap();
    let opts = test_options(5);
    let store = MemoryStore::new();
    let enc = CsvEncoder::default();
    let exporter = SegmentExporter::new(&source, &store, &enc, &opts);

    let err = exporter.export(&segs[0]).unwrap_err();
    match &err {
        ExportError::Segment { index, start, end, .. } => {
            assert_eq!((*index, start.as_str(), end.as_str()), (0, "00", "10"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(matches!(err.root(), ExportError::Backend(BackendError::Fatal(_))));
    assert!(err.chain().contains("server gone"));

    assert!(store.keys().is_empty());
    assert_eq!(store.pending_sessions(), 0);
    assert_eq!(store.aborted_keys(), vec![exporter.remote_key(&segs[0])]);
    let stats = source.table.tx_stats();
    assert_eq!((stats.committed, stats.rolled_back), (0, 1));
}

/// Payloads with delimiters, quotes, and newlines survive; timestamps and NULLs render fixed-format.
#[test]
fn payloads_are_quoted_and_fields_formatted() {
    let table = MemoryTable::new(TABLE);
    table.insert(
        Row::new(TENANT, "0a01", "a,\"b\"\nc")
            .with_modified_at(datetime!(2024-01-02 03:04:05))
            .with_version(3),
    );
    table.insert(Row::new(TENANT, "0a02", "plain"));
    let segs = partition(1).unwrap();
    let opts = test_options(10);
    let store = MemoryStore::new();
    let enc = CsvEncoder::from_options(&opts).unwrap();
    let obj = SegmentExporter::new(&table, &store, &enc, &opts).export(&segs[0]).unwrap().unwrap();

    let bytes = store.object(&obj.remote_key).unwrap();
    let text = String::from_utf8(bytes.clone()).unwrap();
    assert!(text.contains("999999,0a02,plain,,\n"));

    let mut rdr = csv::ReaderBuilder::new().from_reader(bytes.as_slice());
    let recs: Vec<csv::StringRecord> = rdr.records().map(|r| r.unwrap()).collect();
    assert_eq!(recs.len(), 2);
    assert_eq!(&recs[0][2], "a,\"b\"\nc");
    assert_eq!(&recs[0][3], "2024-01-02 03:04:05");
    assert_eq!(&recs[0][4], "3");
}

/// With a tab delimiter the header and rows use tabs.
#[test]
fn custom_delimiter_is_applied() {
    let table = seeded_table(&[0x01], 2);
    let segs = partition(1).unwrap();
    let opts = test_options(10).with_delimiter('\t');
    let store = MemoryStore::new();
    let enc = CsvEncoder::from_options(&opts).unwrap();
    let obj = SegmentExporter::new(&table, &store, &enc, &opts).export(&segs[0]).unwrap().unwrap();
    let all = lines(&store.object(&obj.remote_key).unwrap());
    assert_eq!(all[0], "tenantid\thash\taggr\tlast_modified\tversion");
    assert_eq!(all.len(), 3);
}

/// The batch ceiling truncates the segment but still completes the object.
#[test]
fn ceiling_truncates_but_completes() {
    let table = seeded_table(&[0x20], 20);
    let segs = partition(1).unwrap();
    let opts = test_options(5).with_max_batches(2);
    let store = MemoryStore::new();
    let enc = CsvEncoder::default();
    let (obj, stats) = SegmentExporter::new(&table, &store, &enc, &opts).export_with_stats(&segs[0]).unwrap();
    assert_eq!(obj.unwrap().row_count, 10);
    assert!(stats.ceiling_reached);
    assert_eq!(store.keys().len(), 1);
}
