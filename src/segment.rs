//! The query contract shared by both segment variants, and a closed handle over them.

use crate::disk::DiskSegment;
use crate::error::DbError;
use crate::labels::LabelSet;
use crate::matcher::LabelMatcher;
use crate::memory::MemorySegment;
use crate::types::{Row, SegmentType, SeriesPoints, Timestamp};

use std::sync::Arc;

pub trait Segment: Send + Sync {
    fn min_ts(&self) -> Timestamp;
    fn max_ts(&self) -> Timestamp;
    fn frozen(&self) -> bool;
    fn segment_type(&self) -> SegmentType;

    /// Releases resources. Memory segments have nothing to release.
    fn close(&self) -> Result<(), DbError>;

    /// Makes the segment queryable. Memory segments always are.
    fn load(&self) -> Result<(), DbError>;

    fn query_label_values(&self, name: &str) -> Vec<String>;
    fn query_series(&self, matchers: &[LabelMatcher]) -> Result<Vec<LabelSet>, DbError>;
    fn query_range(
        &self,
        matchers: &[LabelMatcher],
        start: Timestamp,
        end: Timestamp,
    ) -> Result<Vec<SeriesPoints>, DbError>;
}

impl Segment for MemorySegment {
    fn min_ts(&self) -> Timestamp {
        MemorySegment::min_ts(self)
    }

    fn max_ts(&self) -> Timestamp {
        MemorySegment::max_ts(self)
    }

    fn frozen(&self) -> bool {
        MemorySegment::frozen(self)
    }

    fn segment_type(&self) -> SegmentType {
        SegmentType::Memory
    }

    fn close(&self) -> Result<(), DbError> {
        Ok(())
    }

    fn load(&self) -> Result<(), DbError> {
        Ok(())
    }

    fn query_label_values(&self, name: &str) -> Vec<String> {
        MemorySegment::query_label_values(self, name)
    }

    fn query_series(&self, matchers: &[LabelMatcher]) -> Result<Vec<LabelSet>, DbError> {
        MemorySegment::query_series(self, matchers)
    }

    fn query_range(
        &self,
        matchers: &[LabelMatcher],
        start: Timestamp,
        end: Timestamp,
    ) -> Result<Vec<SeriesPoints>, DbError> {
        MemorySegment::query_range(self, matchers, start, end)
    }
}

impl Segment for DiskSegment {
    fn min_ts(&self) -> Timestamp {
        DiskSegment::min_ts(self)
    }

    fn max_ts(&self) -> Timestamp {
        DiskSegment::max_ts(self)
    }

    /// Disk segments are immutable.
    fn frozen(&self) -> bool {
        true
    }

    fn segment_type(&self) -> SegmentType {
        SegmentType::Disk
    }

    fn close(&self) -> Result<(), DbError> {
        DiskSegment::close(self)
    }

    fn load(&self) -> Result<(), DbError> {
        DiskSegment::load(self)
    }

    fn query_label_values(&self, name: &str) -> Vec<String> {
        DiskSegment::query_label_values(self, name)
    }

    fn query_series(&self, matchers: &[LabelMatcher]) -> Result<Vec<LabelSet>, DbError> {
        DiskSegment::query_series(self, matchers)
    }

    fn query_range(
        &self,
        matchers: &[LabelMatcher],
        start: Timestamp,
        end: Timestamp,
    ) -> Result<Vec<SeriesPoints>, DbError> {
        DiskSegment::query_range(self, matchers, start, end)
    }
}

/// A segment of either kind, as held by a segment list.
#[derive(Debug, Clone)]
pub enum SegmentHandle {
    Memory(Arc<MemorySegment>),
    Disk(Arc<DiskSegment>),
}

impl SegmentHandle {
    fn as_segment(&self) -> &dyn Segment {
        match self {
            SegmentHandle::Memory(m) => m.as_ref(),
            SegmentHandle::Disk(d) => d.as_ref(),
        }
    }

    /// # Panics
    ///
    /// Panics on a disk segment. Routing a write to an immutable segment is a caller bug.
    pub fn insert_row(&self, row: Row) -> Result<(), DbError> {
        match self {
            SegmentHandle::Memory(m) => m.insert_row(row),
            SegmentHandle::Disk(d) => panic!("insert into immutable disk segment {}", d.name()),
        }
    }

    /// # Panics
    ///
    /// Panics on a disk segment, like [`SegmentHandle::insert_row`].
    pub fn insert_rows(&self, rows: Vec<Row>) -> Result<(), DbError> {
        match self {
            SegmentHandle::Memory(m) => m.insert_rows(rows),
            SegmentHandle::Disk(d) => panic!("insert into immutable disk segment {}", d.name()),
        }
    }
}

impl From<MemorySegment> for SegmentHandle {
    fn from(segment: MemorySegment) -> Self {
        SegmentHandle::Memory(Arc::new(segment))
    }
}

impl From<DiskSegment> for SegmentHandle {
    fn from(segment: DiskSegment) -> Self {
        SegmentHandle::Disk(Arc::new(segment))
    }
}

impl Segment for SegmentHandle {
    fn min_ts(&self) -> Timestamp {
        self.as_segment().min_ts()
    }

    fn max_ts(&self) -> Timestamp {
        self.as_segment().max_ts()
    }

    fn frozen(&self) -> bool {
        self.as_segment().frozen()
    }

    fn segment_type(&self) -> SegmentType {
        self.as_segment().segment_type()
    }

    fn close(&self) -> Result<(), DbError> {
        self.as_segment().close()
    }

    fn load(&self) -> Result<(), DbError> {
        self.as_segment().load()
    }

    fn query_label_values(&self, name: &str) -> Vec<String> {
        self.as_segment().query_label_values(name)
    }

    fn query_series(&self, matchers: &[LabelMatcher]) -> Result<Vec<LabelSet>, DbError> {
        self.as_segment().query_series(matchers)
    }

    fn query_range(
        &self,
        matchers: &[LabelMatcher],
        start: Timestamp,
        end: Timestamp,
    ) -> Result<Vec<SeriesPoints>, DbError> {
        self.as_segment().query_range(matchers, start, end)
    }
}
