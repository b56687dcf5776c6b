//! Mutable in-memory segment.
//!
//! Lifecycle: empty -> accepting -> sealed. Inserts run concurrently; `marshal` seals the
//! segment, waits for in-flight inserts and then encodes an immutable snapshot.

use crate::codec::encode_block;
use crate::config::SegmentConfig;
use crate::error::DbError;
use crate::index::{LabelValueSet, MemoryIndex};
use crate::labels::LabelSet;
use crate::matcher::LabelMatcher;
use crate::meta::{MetaLabel, MetaSeries, Metadata, META_VERSION};
use crate::series::Series;
use crate::telemetry::{db_metrics, DbEvent};
use crate::types::{Ordinal, Row, SeriesId, SeriesPoints, Timestamp};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rayon::prelude::*;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, OnceLock, RwLock};
use std::time::Instant;

#[derive(Debug)]
pub struct MemorySegment {
    series: DashMap<SeriesId, Arc<Series>>,
    index: MemoryIndex,
    values: LabelValueSet,
    min_ts: OnceLock<Timestamp>,
    max_ts: AtomicI64,
    sealed: AtomicBool,
    /// Inserts hold it shared; sealing takes it exclusively to drain them.
    ingest_gate: RwLock<()>,
    config: SegmentConfig,
}

impl Default for MemorySegment {
    fn default() -> Self {
        Self::new(SegmentConfig::default())
    }
}

impl MemorySegment {
    /// Builds an empty segment. `config` must pass [`SegmentConfig::validate`]; use
    /// [`MemorySegment::try_new`] for configs that have not been checked.
    pub fn new(config: SegmentConfig) -> Self {
        debug_assert!(config.validate().is_ok(), "invalid segment config");
        Self {
            series: DashMap::new(),
            index: MemoryIndex::new(),
            values: LabelValueSet::new(),
            min_ts: OnceLock::new(),
            max_ts: AtomicI64::new(Timestamp::MIN),
            sealed: AtomicBool::new(false),
            ingest_gate: RwLock::new(()),
            config,
        }
    }

    pub fn try_new(config: SegmentConfig) -> Result<Self, DbError> {
        config.validate()?;
        Ok(Self::new(config))
    }

    pub fn config(&self) -> &SegmentConfig {
        &self.config
    }

    /// Timestamp of the first accepted insert, 0 while empty.
    pub fn min_ts(&self) -> Timestamp {
        self.min_ts.get().copied().unwrap_or(0)
    }

    /// Largest accepted timestamp, 0 while empty.
    pub fn max_ts(&self) -> Timestamp {
        if self.is_empty() {
            return 0;
        }
        self.max_ts.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.min_ts.get().is_none()
    }

    /// True once the covered window reaches the configured freeze width.
    pub fn frozen(&self) -> bool {
        match self.min_ts.get() {
            Some(&min) => {
                let max = self.max_ts.load(Ordering::Acquire);
                max.saturating_sub(min) >= self.config.freeze_window
            }
            None => false,
        }
    }

    pub fn insert_row(&self, row: Row) -> Result<(), DbError> {
        let metric = row.metric.clone();
        match self.ingest(row) {
            Ok(()) => {
                db_metrics::record_ingest(1, 0);
                Ok(())
            }
            Err(e) => {
                db_metrics::record_ingest(0, 1);
                self.config.event_listener.on_event(DbEvent::InsertRejected {
                    metric,
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Inserts every row and returns the first error, if any, after all rows were attempted.
    pub fn insert_rows<I>(&self, rows: I) -> Result<(), DbError>
    where
        I: IntoIterator<Item = Row>,
    {
        let mut first_err = None;
        for row in rows {
            if let Err(e) = self.insert_row(row) {
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn ingest(&self, row: Row) -> Result<(), DbError> {
        let _gate = self.ingest_gate.read()?;
        if self.sealed.load(Ordering::Acquire) {
            return Err(DbError::SegmentSealed);
        }

        let Row {
            metric,
            labels,
            point,
        } = row;
        if metric.is_empty() {
            return Err(DbError::InvalidRow("empty metric name".to_string()));
        }
        let labels = labels.with_metric_name(&metric);
        let id = labels.series_id();

        let series = self.get_or_create(id, labels);
        series.append(point)?;

        // max before min: a visible min_ts implies max_ts already holds a real point.
        self.max_ts.fetch_max(point.ts, Ordering::AcqRel);
        self.min_ts.get_or_init(|| point.ts);
        Ok(())
    }

    fn get_or_create(&self, id: SeriesId, labels: LabelSet) -> Arc<Series> {
        if let Some(existing) = self.series.get(&id) {
            return Arc::clone(existing.value());
        }
        match self.series.entry(id) {
            Entry::Occupied(e) => Arc::clone(e.get()),
            Entry::Vacant(v) => {
                let series = Arc::new(Series::new(id, labels));
                self.index.update(id, series.labels());
                for l in series.labels() {
                    self.values.insert(&l.name, &l.value);
                }
                v.insert(Arc::clone(&series));
                series
            }
        }
    }

    /// Stops accepting inserts and waits for the ones in flight. Idempotent.
    pub fn seal(&self) -> Result<(), DbError> {
        self.sealed.store(true, Ordering::Release);
        drop(self.ingest_gate.write()?);
        Ok(())
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::Acquire)
    }

    pub fn series_count(&self) -> usize {
        self.series.len()
    }

    pub fn point_count(&self) -> Result<usize, DbError> {
        let mut total = 0;
        for entry in self.series.iter() {
            total += entry.value().len()?;
        }
        Ok(total)
    }

    /// Seals the segment and encodes it into `(meta_bytes, data_bytes)`.
    ///
    /// Series are laid out by ascending id; a series' ordinal is its position in that order.
    pub fn marshal(&self) -> Result<(Vec<u8>, Vec<u8>), DbError> {
        let started = Instant::now();
        self.seal()?;

        let mut series: Vec<Arc<Series>> =
            self.series.iter().map(|e| Arc::clone(e.value())).collect();
        series.sort_by_key(|s| s.id());

        let compression = self.config.compression;
        let blocks = series
            .par_iter()
            .map(|s| encode_block(&s.encoded()?, compression))
            .collect::<Result<Vec<_>, DbError>>()?;

        let ordinals: HashMap<SeriesId, Ordinal> = series
            .iter()
            .enumerate()
            .map(|(i, s)| (s.id(), i as Ordinal))
            .collect();

        let mut token_ordinals: HashMap<String, u32> = HashMap::new();
        let mut labels = Vec::new();
        for (token, ids) in self.index.snapshot() {
            let mut ords: Vec<Ordinal> = ids
                .iter()
                .filter_map(|id| ordinals.get(id).copied())
                .collect();
            if ords.is_empty() {
                continue;
            }
            ords.sort_unstable();
            token_ordinals.insert(token.clone(), labels.len() as u32);
            labels.push(MetaLabel {
                token,
                ordinals: ords,
            });
        }

        let mut data = Vec::with_capacity(blocks.iter().map(Vec::len).sum());
        let mut meta_series = Vec::with_capacity(series.len());
        for (s, block) in series.iter().zip(&blocks) {
            let start_offset = data.len() as u64;
            data.extend_from_slice(block);
            let refs = s
                .labels()
                .iter()
                .map(|l| {
                    token_ordinals.get(&l.token()).copied().ok_or_else(|| {
                        DbError::Internal(format!("label {} missing from index", l.token()))
                    })
                })
                .collect::<Result<Vec<u32>, DbError>>()?;
            meta_series.push(MetaSeries {
                sid: s.id(),
                labels: refs,
                start_offset,
                end_offset: data.len() as u64,
            });
        }

        let meta = Metadata {
            version: META_VERSION,
            min_ts: self.min_ts(),
            max_ts: self.max_ts(),
            series: meta_series,
            labels,
        };
        let meta_bytes = self.config.serializer().marshal(&meta)?;

        db_metrics::record_marshal(started.elapsed(), (meta_bytes.len() + data.len()) as u64);
        self.config.event_listener.on_event(DbEvent::SegmentMarshaled {
            series: series.len(),
            data_bytes: data.len(),
            meta_bytes: meta_bytes.len(),
        });
        Ok((meta_bytes, data))
    }

    /// Decodes metadata produced by [`MemorySegment::marshal`] with the same configuration.
    pub fn unmarshal(&self, meta_bytes: &[u8]) -> Result<Metadata, DbError> {
        self.config.serializer().unmarshal(meta_bytes)
    }

    pub fn query_label_values(&self, name: &str) -> Vec<String> {
        self.values.values(name)
    }

    pub fn query_series(&self, matchers: &[LabelMatcher]) -> Result<Vec<LabelSet>, DbError> {
        let ids = self.index.match_sids(&self.values, matchers);
        Ok(self.index.match_labels(&ids))
    }

    /// One entry per matching series, in ascending id order, with its points in `[start, end]`.
    pub fn query_range(
        &self,
        matchers: &[LabelMatcher],
        start: Timestamp,
        end: Timestamp,
    ) -> Result<Vec<SeriesPoints>, DbError> {
        if start > end {
            return Err(DbError::InvalidTimeRange { start, end });
        }
        let started = Instant::now();
        let ids = self.index.match_sids(&self.values, matchers);
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            let Some(series) = self.series.get(&id).map(|s| Arc::clone(s.value())) else {
                continue;
            };
            out.push(SeriesPoints {
                labels: series.labels().clone(),
                points: series.range(start, end)?,
            });
        }
        db_metrics::record_query_range(started.elapsed());
        Ok(out)
    }
}
