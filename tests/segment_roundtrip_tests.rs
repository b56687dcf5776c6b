use std::path::Path;
use tempfile::tempdir;

use strata::{
    write_segment_file, BlockCompression, DiskSegment, LabelMatcher, LabelSet, MemorySegment,
    MetaFormat, Row, Segment, SegmentConfig, SegmentHandle, SegmentType, METRIC_NAME_LABEL,
};

const HOSTS: [&str; 3] = ["a", "b", "c"];

fn config(format: MetaFormat, compression: BlockCompression) -> SegmentConfig {
    SegmentConfig {
        meta_format: format,
        compression,
        ..Default::default()
    }
}

/// 3 series x 5 points over [100, 500].
fn populated(cfg: SegmentConfig) -> MemorySegment {
    let seg = MemorySegment::new(cfg);
    for (i, host) in HOSTS.iter().enumerate() {
        for ts in (100..=500).step_by(100) {
            let labels = LabelSet::from_pairs(&[("host", *host), ("dc", "eu")]);
            seg.insert_row(Row::new("cpu", labels, ts, ts as f64 * 0.5 + i as f64))
                .unwrap();
        }
    }
    seg
}

fn persist(seg: &MemorySegment, dir: &Path, cfg: SegmentConfig) -> DiskSegment {
    let (meta, data) = seg.marshal().unwrap();
    let path = dir.join(format!("{}-{}.seg", seg.min_ts(), seg.max_ts()));
    write_segment_file(&path, &meta, &data).unwrap();
    DiskSegment::open(&path, seg.min_ts(), seg.max_ts(), cfg).unwrap()
}

#[test]
fn memory_and_disk_answer_identically() {
    let combos = [
        (MetaFormat::Json, BlockCompression::None),
        (MetaFormat::Json, BlockCompression::Lz4),
        (MetaFormat::Bincode, BlockCompression::Zstd(3)),
        (MetaFormat::Bincode, BlockCompression::None),
    ];
    for (format, compression) in combos {
        let dir = tempdir().unwrap();
        let mem = populated(config(format, compression));
        let disk = persist(&mem, dir.path(), config(format, compression));

        assert_eq!(disk.min_ts(), 100);
        assert_eq!(disk.max_ts(), 500);

        let all = [LabelMatcher::equal(METRIC_NAME_LABEL, "cpu")];
        let from_mem = mem.query_range(&all, 100, 500).unwrap();
        let from_disk = disk.query_range(&all, 100, 500).unwrap();
        assert_eq!(from_mem.len(), 3, "{:?}/{:?}", format, compression);
        assert_eq!(from_mem, from_disk, "{:?}/{:?}", format, compression);
        for s in &from_disk {
            let ts: Vec<i64> = s.points.iter().map(|p| p.ts).collect();
            assert_eq!(ts, vec![100, 200, 300, 400, 500]);
        }

        assert_eq!(
            mem.query_series(&all).unwrap(),
            disk.query_series(&all).unwrap()
        );
        for name in ["host", "dc", METRIC_NAME_LABEL, "missing"] {
            assert_eq!(mem.query_label_values(name), disk.query_label_values(name));
        }
    }
}

#[test]
fn range_bounds_are_inclusive_after_round_trip() {
    let dir = tempdir().unwrap();
    let mem = populated(SegmentConfig::default());
    let disk = persist(&mem, dir.path(), SegmentConfig::default());

    let hits = disk
        .query_range(&[LabelMatcher::equal("host", "b")], 200, 400)
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].labels.get("host"), Some("b"));
    let points: Vec<(i64, f64)> = hits[0].points.iter().map(|p| (p.ts, p.value)).collect();
    assert_eq!(points, vec![(200, 101.0), (300, 151.0), (400, 201.0)]);

    let outside = disk
        .query_range(&[LabelMatcher::equal("host", "b")], 501, 900)
        .unwrap();
    assert_eq!(outside.len(), 1);
    assert!(outside[0].points.is_empty());
}

#[test]
fn matcher_sets_intersect() {
    let dir = tempdir().unwrap();
    let mem = MemorySegment::default();
    let rows = [
        ("cpu", [("host", "a"), ("env", "prod")]),
        ("cpu", [("host", "b"), ("env", "prod")]),
        ("cpu", [("host", "a"), ("env", "dev")]),
        ("mem", [("host", "a"), ("env", "prod")]),
    ];
    for (metric, pairs) in rows {
        mem.insert_row(Row::new(metric, LabelSet::from_pairs(&pairs), 10, 1.0))
            .unwrap();
    }
    let disk = persist(&mem, dir.path(), SegmentConfig::default());

    let both: [&dyn Segment; 2] = [&mem, &disk];
    for seg in both {
        let got = seg
            .query_series(&[
                LabelMatcher::equal(METRIC_NAME_LABEL, "cpu"),
                LabelMatcher::equal("host", "a"),
                LabelMatcher::equal("env", "prod"),
            ])
            .unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].get("env"), Some("prod"));
        assert_eq!(got[0].get("host"), Some("a"));

        let not_dev = seg
            .query_series(&[
                LabelMatcher::equal("host", "a"),
                LabelMatcher::not_equal("env", "dev"),
            ])
            .unwrap();
        assert_eq!(not_dev.len(), 2);

        let prefixed = seg
            .query_series(&[LabelMatcher::predicate(METRIC_NAME_LABEL, |v: &str| {
                v.starts_with('m')
            })])
            .unwrap();
        assert_eq!(prefixed.len(), 1);
        assert_eq!(prefixed[0].get(METRIC_NAME_LABEL), Some("mem"));

        assert!(seg.query_series(&[]).unwrap().is_empty());
        assert!(seg
            .query_series(&[
                LabelMatcher::equal("host", "b"),
                LabelMatcher::equal("env", "dev"),
            ])
            .unwrap()
            .is_empty());
    }
}

#[test]
fn handle_dispatches_to_both_kinds() {
    let dir = tempdir().unwrap();
    let mem = populated(SegmentConfig::default());
    let disk = persist(&mem, dir.path(), SegmentConfig::default());

    let handles = [SegmentHandle::from(mem), SegmentHandle::from(disk)];
    assert_eq!(handles[0].segment_type(), SegmentType::Memory);
    assert_eq!(handles[1].segment_type(), SegmentType::Disk);
    assert!(handles[1].frozen());
    handles[1].load().unwrap();
    for h in &handles {
        assert_eq!(h.query_label_values("host"), vec!["a", "b", "c"]);
        h.close().unwrap();
    }
}

#[test]
fn stored_label_sets_survive_round_trip() {
    let dir = tempdir().unwrap();
    let mem = MemorySegment::default();
    mem.insert_row(Row::new(
        "cpu",
        LabelSet::from_pairs(&[("a=b", "c"), ("path", "/x=y")]),
        10,
        1.0,
    ))
    .unwrap();
    assert!(mem
        .insert_row(Row::new("", LabelSet::from_pairs(&[("host", "x")]), 10, 1.0))
        .is_err());
    let disk = persist(&mem, dir.path(), SegmentConfig::default());

    let by_path = [LabelMatcher::any("path")];
    let from_mem = mem.query_series(&by_path).unwrap();
    assert_eq!(from_mem, disk.query_series(&by_path).unwrap());
    assert_eq!(
        from_mem,
        vec![LabelSet::from_pairs(&[("path", "/x=y"), (METRIC_NAME_LABEL, "cpu")])]
    );
    for name in ["a=b", "a", "path", "host", METRIC_NAME_LABEL] {
        assert_eq!(mem.query_label_values(name), disk.query_label_values(name));
    }
    assert!(disk
        .query_series(&[LabelMatcher::equal("host", "x")])
        .unwrap()
        .is_empty());
}
