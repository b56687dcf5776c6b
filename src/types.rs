use crate::labels::LabelSet;
use serde::{Deserialize, Serialize};

/// Timestamp type (seconds since epoch unless the caller decides otherwise; only ordering matters).
pub type Timestamp = i64;

/// Value type.
pub type Value = f64;

/// Content hash of a canonical label set, the series' key within a segment.
pub type SeriesId = u64;

/// Dense position of a series inside a marshaled segment.
pub type Ordinal = u32;

/// A single `(timestamp, value)` sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub ts: Timestamp,
    pub value: Value,
}

impl Point {
    pub fn new(ts: Timestamp, value: Value) -> Self {
        Self { ts, value }
    }
}

/// One ingested sample: metric name, labels and the point itself.
///
/// Rows are consumed by `MemorySegment::insert_row`; their labels are folded into a series
/// and the point is appended to that series' store.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub metric: String,
    pub labels: LabelSet,
    pub point: Point,
}

impl Row {
    pub fn new(metric: impl Into<String>, labels: LabelSet, ts: Timestamp, value: Value) -> Self {
        Self {
            metric: metric.into(),
            labels,
            point: Point::new(ts, value),
        }
    }
}

/// Result entry of a range query: one series' labels and its points inside the range.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesPoints {
    pub labels: LabelSet,
    pub points: Vec<Point>,
}

/// The two segment variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SegmentType {
    Memory,
    Disk,
}
