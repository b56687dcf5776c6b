//! Persisted description of a frozen segment and the pluggable serializers for it.

use crate::error::DbError;
use crate::types::{Ordinal, SeriesId, Timestamp};

use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::sync::Arc;

pub const META_VERSION: u32 = 1;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub version: u32,
    pub min_ts: Timestamp,
    pub max_ts: Timestamp,
    /// Indexed by series ordinal.
    pub series: Vec<MetaSeries>,
    /// Inverted index table, sorted by token. A label's position here is its token ordinal.
    pub labels: Vec<MetaLabel>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaSeries {
    pub sid: SeriesId,
    /// Token ordinals (positions in [`Metadata::labels`]) making up the canonical label set.
    pub labels: Vec<u32>,
    /// `[start_offset, end_offset)` relative to the start of the data blob.
    pub start_offset: u64,
    pub end_offset: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaLabel {
    /// `name=value`.
    pub token: String,
    /// Sorted series ordinals carrying this label.
    pub ordinals: Vec<Ordinal>,
}

impl Metadata {
    /// Structural checks against the data blob size; run once at load.
    pub fn validate(&self, data_size: u64) -> Result<(), DbError> {
        if self.version != META_VERSION {
            return Err(DbError::corruption(format!(
                "Unsupported metadata version {}",
                self.version
            )));
        }
        let series_count = self.series.len();
        let label_count = self.labels.len();
        for (i, s) in self.series.iter().enumerate() {
            if s.start_offset > s.end_offset || s.end_offset > data_size {
                return Err(DbError::corruption(format!(
                    "Series {} byte range [{}, {}) outside data blob of {} bytes",
                    i, s.start_offset, s.end_offset, data_size
                )));
            }
            if s.labels.iter().any(|&l| l as usize >= label_count) {
                return Err(DbError::corruption(format!(
                    "Series {} references an unknown label token",
                    i
                )));
            }
        }
        for l in &self.labels {
            if l.ordinals.iter().any(|&o| o as usize >= series_count) {
                return Err(DbError::corruption(format!(
                    "Label {:?} references an unknown series ordinal",
                    l.token
                )));
            }
        }
        Ok(())
    }
}

/// Swappable metadata encoding. The file framing does not depend on it.
pub trait MetaSerializer: Debug + Send + Sync {
    fn marshal(&self, meta: &Metadata) -> Result<Vec<u8>, DbError>;
    fn unmarshal(&self, bytes: &[u8]) -> Result<Metadata, DbError>;
}

/// Human-inspectable JSON. The default.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonMetaSerializer;

impl MetaSerializer for JsonMetaSerializer {
    fn marshal(&self, meta: &Metadata) -> Result<Vec<u8>, DbError> {
        Ok(serde_json::to_vec(meta)?)
    }

    fn unmarshal(&self, bytes: &[u8]) -> Result<Metadata, DbError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Compact binary encoding.
#[derive(Debug, Default, Clone, Copy)]
pub struct BincodeMetaSerializer;

impl MetaSerializer for BincodeMetaSerializer {
    fn marshal(&self, meta: &Metadata) -> Result<Vec<u8>, DbError> {
        Ok(bincode::serialize(meta)?)
    }

    fn unmarshal(&self, bytes: &[u8]) -> Result<Metadata, DbError> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// Serializer selection for configuration. Serde: lowercase string (e.g. `"json"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetaFormat {
    #[default]
    Json,
    Bincode,
}

impl MetaFormat {
    pub fn serializer(self) -> Arc<dyn MetaSerializer> {
        match self {
            MetaFormat::Json => Arc::new(JsonMetaSerializer),
            MetaFormat::Bincode => Arc::new(BincodeMetaSerializer),
        }
    }
}
