use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tempfile::{tempdir, TempDir};

use strata::{
    write_segment_file, DbError, DbEvent, DbEventListener, DiskSegment, LabelMatcher, LabelSet,
    MemorySegment, Row, SegmentConfig, SegmentHandle, METRIC_NAME_LABEL,
};

#[derive(Debug, Default)]
struct RecordingListener {
    events: Mutex<Vec<DbEvent>>,
}

impl DbEventListener for RecordingListener {
    fn on_event(&self, event: DbEvent) {
        self.events.lock().unwrap().push(event);
    }
}

impl RecordingListener {
    fn load_failures(&self) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| matches!(e, DbEvent::SegmentLoadFailed { .. }))
            .count()
    }
}

fn marshaled() -> (Vec<u8>, Vec<u8>) {
    let seg = MemorySegment::default();
    for host in ["a", "b"] {
        for ts in [100, 200, 300] {
            seg.insert_row(Row::new(
                "cpu",
                LabelSet::from_pairs(&[("host", host)]),
                ts,
                ts as f64,
            ))
            .unwrap();
        }
    }
    seg.marshal().unwrap()
}

fn write(dir: &TempDir, meta: &[u8], data: &[u8]) -> PathBuf {
    let path = dir.path().join("100-300.seg");
    write_segment_file(&path, meta, data).unwrap();
    path
}

#[test]
fn flipped_payload_byte_surfaces_as_corruption() {
    let dir = tempdir().unwrap();
    let (meta_bytes, mut data) = marshaled();
    let meta = MemorySegment::default().unmarshal(&meta_bytes).unwrap();
    // First byte after the 13-byte block header of the first series.
    let at = meta.series[0].start_offset as usize + 13;
    data[at] ^= 0xFF;
    let path = write(&dir, &meta_bytes, &data);

    let seg = DiskSegment::open(&path, 100, 300, SegmentConfig::default()).unwrap();
    let err = seg
        .query_range(&[LabelMatcher::any("host")], 0, 1_000)
        .unwrap_err();
    match err {
        DbError::Corruption { segment, .. } => {
            assert_eq!(segment.as_deref(), Some(path.display().to_string().as_str()))
        }
        other => panic!("expected corruption, got {:?}", other),
    }
    // Metadata is intact, so label queries still work.
    assert_eq!(seg.query_label_values("host"), vec!["a", "b"]);
}

#[test]
fn truncated_file_leaves_segment_unloaded_with_empty_results() {
    let dir = tempdir().unwrap();
    let (meta, data) = marshaled();
    let path = write(&dir, &meta, &data);
    let full = fs::metadata(&path).unwrap().len();
    OpenOptions::new()
        .write(true)
        .open(&path)
        .unwrap()
        .set_len(full / 2)
        .unwrap();

    let listener = Arc::new(RecordingListener::default());
    let config = SegmentConfig {
        event_listener: listener.clone(),
        ..Default::default()
    };
    let seg = DiskSegment::open(&path, 100, 300, config).unwrap();

    assert!(matches!(seg.load(), Err(DbError::Corruption { .. })));
    assert!(!seg.is_loaded());
    assert!(seg.query_label_values("host").is_empty());
    assert!(seg
        .query_series(&[LabelMatcher::any(METRIC_NAME_LABEL)])
        .unwrap()
        .is_empty());
    assert!(seg
        .query_range(&[LabelMatcher::any(METRIC_NAME_LABEL)], 0, 1_000)
        .unwrap()
        .is_empty());
    // Each access retried the load and reported its failure.
    assert_eq!(listener.load_failures(), 4);
}

#[test]
fn garbage_metadata_is_reported_not_fatal() {
    let dir = tempdir().unwrap();
    let (_, data) = marshaled();
    let path = write(&dir, b"{definitely not metadata", &data);
    let seg = DiskSegment::open(&path, 100, 300, SegmentConfig::default()).unwrap();
    assert!(matches!(seg.load(), Err(DbError::Serialization(_))));
    assert!(seg.query_label_values("host").is_empty());
}

#[test]
fn inverted_range_rejected_before_any_io() {
    let dir = tempdir().unwrap();
    let (meta, data) = marshaled();
    let seg = DiskSegment::open(write(&dir, &meta, &data), 100, 300, SegmentConfig::default())
        .unwrap();
    assert!(matches!(
        seg.query_range(&[LabelMatcher::any("host")], 300, 100),
        Err(DbError::InvalidTimeRange { .. })
    ));
    assert!(!seg.is_loaded());
}

#[test]
#[should_panic(expected = "immutable disk segment")]
fn insert_into_disk_handle_panics() {
    let dir = tempdir().unwrap();
    let (meta, data) = marshaled();
    let seg = DiskSegment::open(write(&dir, &meta, &data), 100, 300, SegmentConfig::default())
        .unwrap();
    let handle = SegmentHandle::from(seg);
    let _ = handle.insert_row(Row::new("cpu", LabelSet::new(), 400, 1.0));
}
