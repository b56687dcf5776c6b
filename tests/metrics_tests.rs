#![cfg(feature = "prometheus")]

use std::sync::OnceLock;
use std::time::Duration;
use tempfile::tempdir;

use strata::telemetry::db_metrics::{self, InProcessPrometheus};
use strata::{
    write_segment_file, DiskSegment, LabelMatcher, LabelSet, MemorySegment, Row, SegmentConfig,
};

fn install_prometheus_once() -> &'static InProcessPrometheus {
    static PROM: OnceLock<InProcessPrometheus> = OnceLock::new();
    PROM.get_or_init(|| {
        InProcessPrometheus::install(Duration::from_millis(25))
            .expect("failed to install in-process prometheus recorder")
    })
}

fn parse_sample(rendered: &str, metric: &str) -> Option<f64> {
    for line in rendered.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut parts = line.split_whitespace();
        let key = parts.next()?;
        let val = parts.next()?;
        if key == metric
            || key.starts_with(metric) && key.as_bytes().get(metric.len()).copied() == Some(b'{')
        {
            if let Ok(v) = val.parse::<f64>() {
                return Some(v);
            }
        }
    }
    None
}

fn parse_counter(rendered: &str, base_name: &str) -> f64 {
    parse_sample(rendered, &format!("{}_total", base_name))
        .or_else(|| parse_sample(rendered, base_name))
        .unwrap_or(0.0)
}

fn histogram_count(rendered: &str, base_name: &str) -> f64 {
    parse_sample(rendered, &format!("{}_count", base_name)).unwrap_or(0.0)
}

#[test]
fn segment_lifecycle_emits_metrics() {
    let prom = install_prometheus_once();
    let before = prom.render();

    let seg = MemorySegment::default();
    let rows = 12;
    for ts in 0..rows {
        seg.insert_row(Row::new(
            "cpu",
            LabelSet::from_pairs(&[("host", "a")]),
            ts,
            1.0,
        ))
        .unwrap();
    }
    // Out of order: counted as rejected.
    assert!(seg
        .insert_row(Row::new("cpu", LabelSet::from_pairs(&[("host", "a")]), 0, 1.0))
        .is_err());

    let dir = tempdir().unwrap();
    let path = dir.path().join("0-11.seg");
    let (meta, data) = seg.marshal().unwrap();
    write_segment_file(&path, &meta, &data).unwrap();
    let disk = DiskSegment::open(&path, 0, rows - 1, SegmentConfig::default()).unwrap();
    disk.query_range(&[LabelMatcher::equal("host", "a")], 0, rows)
        .unwrap();

    std::thread::sleep(Duration::from_millis(60));
    let after = prom.render();

    assert!(
        parse_counter(&after, db_metrics::INGEST_ROWS)
            >= parse_counter(&before, db_metrics::INGEST_ROWS) + rows as f64
    );
    assert!(
        parse_counter(&after, db_metrics::INGEST_REJECTED_ROWS)
            >= parse_counter(&before, db_metrics::INGEST_REJECTED_ROWS) + 1.0
    );
    assert!(
        parse_counter(&after, db_metrics::SEGMENT_LOADS)
            >= parse_counter(&before, db_metrics::SEGMENT_LOADS) + 1.0
    );
    assert!(
        parse_counter(&after, db_metrics::MARSHAL_BYTES)
            >= parse_counter(&before, db_metrics::MARSHAL_BYTES) + (meta.len() + data.len()) as f64
    );
    assert!(
        histogram_count(&after, db_metrics::MARSHAL_DURATION_SECONDS)
            >= histogram_count(&before, db_metrics::MARSHAL_DURATION_SECONDS) + 1.0
    );
    assert!(
        histogram_count(&after, db_metrics::QUERY_RANGE_DURATION_SECONDS)
            >= histogram_count(&before, db_metrics::QUERY_RANGE_DURATION_SECONDS) + 1.0
    );
}
