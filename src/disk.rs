//! Immutable, memory-mapped segment.
//!
//! The metadata is parsed lazily, once, on first access; block payloads are decoded from the
//! mapped region on demand. Every read holds a [`ReaderGuard`] so that `close` can wait for
//! in-flight readers before unmapping.

use crate::codec::{decode_block, decode_chunk};
use crate::config::SegmentConfig;
use crate::error::DbError;
use crate::index::{DiskIndex, LabelValueSet};
use crate::labels::LabelSet;
use crate::layout::{read_header, HEADER_LEN};
use crate::matcher::LabelMatcher;
use crate::meta::{MetaSerializer, MetaSeries};
use crate::series::collect_range;
use crate::telemetry::{db_metrics, DbEvent};
use crate::types::{SeriesPoints, Timestamp};

use memmap2::{Mmap, MmapOptions};
use std::fs::File;
use std::path::Path;
use std::sync::{Arc, Condvar, Mutex, OnceLock, PoisonError, RwLock};
use std::time::Instant;

/// Index state rebuilt from the metadata.
#[derive(Debug)]
struct Loaded {
    index: DiskIndex,
    values: LabelValueSet,
    series: Vec<MetaSeries>,
}

#[derive(Debug, Default)]
struct ReaderState {
    active: usize,
    closed: bool,
}

#[derive(Debug)]
pub struct DiskSegment {
    name: String,
    min_ts: Timestamp,
    max_ts: Timestamp,
    mmap: RwLock<Option<Mmap>>,
    loaded: OnceLock<Loaded>,
    load_lock: Mutex<()>,
    readers: Mutex<ReaderState>,
    drained: Condvar,
    serializer: Arc<dyn MetaSerializer>,
    config: SegmentConfig,
}

/// Registration of one in-flight read. Deregisters on drop.
#[derive(Debug)]
pub struct ReaderGuard<'a> {
    segment: &'a DiskSegment,
}

impl Drop for ReaderGuard<'_> {
    fn drop(&mut self) {
        let mut state = self
            .segment
            .readers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        state.active -= 1;
        if state.active == 0 {
            self.segment.drained.notify_all();
        }
    }
}

impl DiskSegment {
    /// Maps the segment file at `path`. The window bounds come from the caller (typically the
    /// file name), they are not re-derived from the contents.
    pub fn open(
        path: impl AsRef<Path>,
        min_ts: Timestamp,
        max_ts: Timestamp,
        config: SegmentConfig,
    ) -> Result<Self, DbError> {
        config.validate()?;
        let path = path.as_ref();
        let file = File::open(path)?;
        // SAFETY: segment files are written once via rename and never modified in place.
        let mmap = unsafe { MmapOptions::new().map(&file)? };
        Ok(Self::from_mmap(
            path.display().to_string(),
            mmap,
            min_ts,
            max_ts,
            config,
        ))
    }

    pub fn from_mmap(
        name: impl Into<String>,
        mmap: Mmap,
        min_ts: Timestamp,
        max_ts: Timestamp,
        config: SegmentConfig,
    ) -> Self {
        Self {
            name: name.into(),
            min_ts,
            max_ts,
            mmap: RwLock::new(Some(mmap)),
            loaded: OnceLock::new(),
            load_lock: Mutex::new(()),
            readers: Mutex::new(ReaderState::default()),
            drained: Condvar::new(),
            serializer: config.serializer(),
            config,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn min_ts(&self) -> Timestamp {
        self.min_ts
    }

    pub fn max_ts(&self) -> Timestamp {
        self.max_ts
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.get().is_some()
    }

    /// True once the mapping has been released.
    pub fn is_closed(&self) -> bool {
        self.mmap
            .read()
            .map(|m| m.is_none())
            .unwrap_or(true)
    }

    /// Number of series, if the metadata has been loaded.
    pub fn series_count(&self) -> Option<usize> {
        self.loaded.get().map(|l| l.series.len())
    }

    /// Registers an in-flight read. Fails once `close` has been requested.
    pub fn reader(&self) -> Result<ReaderGuard<'_>, DbError> {
        let mut state = self.readers.lock()?;
        if state.closed {
            return Err(DbError::SegmentClosed(self.name.clone()));
        }
        state.active += 1;
        Ok(ReaderGuard { segment: self })
    }

    /// Parses the metadata and builds the index. Runs at most once successfully; concurrent
    /// callers block until the first finishes. A failed load leaves the segment unloaded and a
    /// later call retries.
    pub fn load(&self) -> Result<(), DbError> {
        if self.is_loaded() {
            return Ok(());
        }
        let _lock = self.load_lock.lock()?;
        if self.is_loaded() {
            return Ok(());
        }
        let _reader = self.reader()?;

        let started = Instant::now();
        match self.parse() {
            Ok(loaded) => {
                let elapsed = started.elapsed();
                let series = loaded.series.len();
                let skipped = loaded.index.skipped();
                // Only this thread sets it: the load lock is held.
                let _ = self.loaded.set(loaded);
                db_metrics::record_segment_load(elapsed, skipped as u64);
                self.config.event_listener.on_event(DbEvent::SegmentLoaded {
                    segment: self.name.clone(),
                    series,
                    skipped_tokens: skipped,
                    elapsed,
                });
                Ok(())
            }
            Err(e) => {
                let e = e.in_segment(&self.name);
                db_metrics::record_segment_load_failure();
                self.config
                    .event_listener
                    .on_event(DbEvent::SegmentLoadFailed {
                        segment: self.name.clone(),
                        error: e.to_string(),
                    });
                Err(e)
            }
        }
    }

    fn parse(&self) -> Result<Loaded, DbError> {
        let mmap = self.mmap.read()?;
        let bytes: &[u8] = mmap
            .as_deref()
            .ok_or_else(|| DbError::SegmentClosed(self.name.clone()))?;

        let header = read_header(bytes)?;
        let meta = self.serializer.unmarshal(&bytes[header.meta_range()?])?;
        meta.validate(header.data_size)?;

        let index = DiskIndex::build(&meta.labels);
        let values = LabelValueSet::new();
        for l in index.labels() {
            values.insert(&l.name, &l.value);
        }
        Ok(Loaded {
            index,
            values,
            series: meta.series,
        })
    }

    /// Loaded state, loading first if needed. `None` when loading fails; the failure has
    /// already been reported through the event listener.
    fn ensure_loaded(&self) -> Option<&Loaded> {
        if let Some(l) = self.loaded.get() {
            return Some(l);
        }
        let _ = self.load();
        self.loaded.get()
    }

    /// Waits for in-flight readers, then releases the mapping. New reads are rejected from the
    /// moment this is called. Idempotent.
    pub fn close(&self) -> Result<(), DbError> {
        let mut state = self.readers.lock()?;
        state.closed = true;
        match self.config.close_timeout {
            None => {
                state = self.drained.wait_while(state, |s| s.active > 0)?;
            }
            Some(timeout) => {
                let (s, res) = self
                    .drained
                    .wait_timeout_while(state, timeout, |s| s.active > 0)?;
                if res.timed_out() {
                    return Err(DbError::CloseTimeout {
                        segment: self.name.clone(),
                        readers: s.active,
                    });
                }
                state = s;
            }
        }
        drop(state);

        let released = self.mmap.write()?.take();
        if released.is_some() {
            drop(released);
            self.config.event_listener.on_event(DbEvent::SegmentClosed {
                segment: self.name.clone(),
            });
        }
        Ok(())
    }

    /// Sorted values under `name`. Empty when the segment cannot be loaded or is closed.
    pub fn query_label_values(&self, name: &str) -> Vec<String> {
        let Ok(_reader) = self.reader() else {
            return Vec::new();
        };
        self.ensure_loaded()
            .map(|l| l.values.values(name))
            .unwrap_or_default()
    }

    pub fn query_series(&self, matchers: &[LabelMatcher]) -> Result<Vec<LabelSet>, DbError> {
        let _reader = self.reader()?;
        let Some(loaded) = self.ensure_loaded() else {
            return Ok(Vec::new());
        };
        let ordinals = loaded.index.match_sids(&loaded.values, matchers);
        Ok(ordinals
            .into_iter()
            .filter_map(|o| loaded.series.get(o as usize))
            .map(|s| loaded.index.match_labels(&s.labels))
            .collect())
    }

    /// One entry per matching series, in ordinal order, with its points in `[start, end]`.
    pub fn query_range(
        &self,
        matchers: &[LabelMatcher],
        start: Timestamp,
        end: Timestamp,
    ) -> Result<Vec<SeriesPoints>, DbError> {
        if start > end {
            return Err(DbError::InvalidTimeRange { start, end });
        }
        let _reader = self.reader()?;
        let Some(loaded) = self.ensure_loaded() else {
            return Ok(Vec::new());
        };
        let started = Instant::now();
        let ordinals = loaded.index.match_sids(&loaded.values, matchers);

        let mmap = self.mmap.read()?;
        let bytes: &[u8] = mmap
            .as_deref()
            .ok_or_else(|| DbError::SegmentClosed(self.name.clone()))?;

        let mut out = Vec::with_capacity(ordinals.len());
        for ord in ordinals {
            let Some(series) = loaded.series.get(ord as usize) else {
                continue;
            };
            let block = block_bytes(bytes, series).map_err(|e| e.in_segment(&self.name))?;
            let chunk = decode_block(block).map_err(|e| e.in_segment(&self.name))?;
            let points = decode_chunk(&chunk)
                .and_then(|iter| collect_range(iter, start, end))
                .map_err(|e| e.in_segment(&self.name))?;
            out.push(SeriesPoints {
                labels: loaded.index.match_labels(&series.labels),
                points,
            });
        }
        db_metrics::record_query_range(started.elapsed());
        Ok(out)
    }
}

/// Slice of the mapped file holding a series' block. Stored offsets are relative to the data
/// blob, which starts right after the header.
fn block_bytes<'a>(bytes: &'a [u8], series: &MetaSeries) -> Result<&'a [u8], DbError> {
    let to_abs = |offset: u64| {
        usize::try_from(offset)
            .ok()
            .and_then(|o| o.checked_add(HEADER_LEN))
            .ok_or_else(|| DbError::corruption(format!("offset {} out of range", offset)))
    };
    let start = to_abs(series.start_offset)?;
    let end = to_abs(series.end_offset)?;
    bytes.get(start..end).ok_or_else(|| {
        DbError::corruption(format!(
            "block [{}, {}) of series {:#018x} outside mapped file",
            start, end, series.sid
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::write_segment_file;
    use crate::memory::MemorySegment;
    use crate::types::Row;
    use std::sync::mpsc;
    use std::time::Duration;

    fn write_sample(dir: &Path) -> std::path::PathBuf {
        let mem = MemorySegment::default();
        for ts in [100, 200, 300] {
            mem.insert_row(Row::new(
                "cpu",
                LabelSet::from_pairs(&[("host", "a")]),
                ts,
                1.0,
            ))
            .unwrap();
        }
        let (meta, data) = mem.marshal().unwrap();
        let path = dir.join("100-300.seg");
        write_segment_file(&path, &meta, &data).unwrap();
        path
    }

    #[test]
    fn loads_lazily_on_first_query() {
        let dir = tempfile::tempdir().unwrap();
        let seg = DiskSegment::open(write_sample(dir.path()), 100, 300, SegmentConfig::default())
            .unwrap();
        assert!(!seg.is_loaded());
        assert_eq!(seg.query_label_values("host"), vec!["a".to_string()]);
        assert!(seg.is_loaded());
        assert_eq!(seg.series_count(), Some(1));
    }

    #[test]
    fn close_waits_for_in_flight_reader() {
        let dir = tempfile::tempdir().unwrap();
        let seg = Arc::new(
            DiskSegment::open(write_sample(dir.path()), 100, 300, SegmentConfig::default())
                .unwrap(),
        );
        let guard = seg.reader().unwrap();

        let closer = {
            let seg = Arc::clone(&seg);
            std::thread::spawn(move || seg.close())
        };
        std::thread::sleep(Duration::from_millis(50));
        assert!(!seg.is_closed());
        assert!(matches!(seg.reader(), Err(DbError::SegmentClosed(_))));

        drop(guard);
        closer.join().unwrap().unwrap();
        assert!(seg.is_closed());
        assert!(matches!(
            seg.query_series(&[LabelMatcher::any("host")]),
            Err(DbError::SegmentClosed(_))
        ));
    }

    #[test]
    fn close_waits_for_in_flight_query_range() {
        let dir = tempfile::tempdir().unwrap();
        let seg = Arc::new(
            DiskSegment::open(write_sample(dir.path()), 100, 300, SegmentConfig::default())
                .unwrap(),
        );
        let (entered_tx, entered_rx) = mpsc::channel::<()>();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let entered_tx = Mutex::new(entered_tx);
        let release_rx = Mutex::new(release_rx);
        // Parks the query inside index evaluation until released.
        let parked = LabelMatcher::predicate("host", move |_: &str| {
            let _ = entered_tx.lock().unwrap().send(());
            let _ = release_rx.lock().unwrap().recv();
            true
        });

        let query = {
            let seg = Arc::clone(&seg);
            std::thread::spawn(move || seg.query_range(&[parked], 0, 1_000))
        };
        entered_rx.recv().unwrap();

        let closer = {
            let seg = Arc::clone(&seg);
            std::thread::spawn(move || seg.close())
        };
        std::thread::sleep(Duration::from_millis(50));
        assert!(!seg.is_closed());

        release_tx.send(()).unwrap();
        drop(release_tx);
        let hits = query.join().unwrap().unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].points.len(), 3);

        closer.join().unwrap().unwrap();
        assert!(seg.is_closed());
    }

    #[test]
    fn open_rejects_invalid_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = SegmentConfig {
            freeze_window: -1,
            ..Default::default()
        };
        assert!(matches!(
            DiskSegment::open(write_sample(dir.path()), 100, 300, config),
            Err(DbError::ConfigError(_))
        ));
    }

    #[test]
    fn close_timeout_reports_remaining_readers() {
        let dir = tempfile::tempdir().unwrap();
        let config = SegmentConfig {
            close_timeout: Some(Duration::from_millis(20)),
            ..Default::default()
        };
        let seg = DiskSegment::open(write_sample(dir.path()), 100, 300, config).unwrap();
        let guard = seg.reader().unwrap();
        assert!(matches!(
            seg.close(),
            Err(DbError::CloseTimeout { readers: 1, .. })
        ));
        drop(guard);
        seg.close().unwrap();
        assert!(seg.is_closed());
    }
}
