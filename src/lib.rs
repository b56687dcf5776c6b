#![doc = include_str!("../README.md")]
// Declare modules
pub mod codec;
pub mod config;
pub mod disk;
pub mod error;
pub mod index;
pub mod labels;
pub mod layout;
pub mod matcher;
pub mod memory;
pub mod meta;
pub mod segment;
pub mod series;
pub mod telemetry;
pub mod types;

/// Per-block compression applied on marshal.
pub use crate::codec::BlockCompression;
/// Segment configuration and its layered loader.
pub use crate::config::{load_segment_config, SegmentConfig};
/// Immutable memory-mapped segment.
pub use crate::disk::DiskSegment;
/// Error type for segment operations.
pub use crate::error::DbError;
/// Label model.
pub use crate::labels::{Label, LabelSet, METRIC_NAME_LABEL};
/// Atomic segment-file writer.
pub use crate::layout::write_segment_file;
/// Label matchers resolved by the segment indexes.
pub use crate::matcher::{LabelMatcher, MatchOp, ValuePredicate};
/// Mutable in-memory segment.
pub use crate::memory::MemorySegment;
/// Persisted segment metadata and its encodings.
pub use crate::meta::{MetaFormat, Metadata};
/// Query contract shared by both segment kinds.
pub use crate::segment::{Segment, SegmentHandle};
/// Structured event hook for observability.
pub use crate::telemetry::{DbEvent, DbEventListener};
pub use crate::types::{Point, Row, SegmentType, SeriesId, SeriesPoints, Timestamp, Value};
