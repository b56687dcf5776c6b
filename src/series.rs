use crate::codec::{PointCodec, XorChunk};
use crate::error::DbError;
use crate::labels::LabelSet;
use crate::types::{Point, SeriesId, Timestamp};

use std::sync::Mutex;

/// One unique label combination within a segment and its append-only point store.
///
/// The store adds no policy beyond ordering: points are forwarded to the codec, which is the
/// unit of compression (one stream per series).
#[derive(Debug)]
pub struct Series<C: PointCodec = XorChunk> {
    id: SeriesId,
    labels: LabelSet,
    store: Mutex<C>,
}

impl<C: PointCodec> Series<C> {
    pub fn new(id: SeriesId, labels: LabelSet) -> Self {
        Self {
            id,
            labels,
            store: Mutex::new(C::default()),
        }
    }

    pub fn id(&self) -> SeriesId {
        self.id
    }

    pub fn labels(&self) -> &LabelSet {
        &self.labels
    }

    /// Appends a point, rejecting timestamps older than the newest stored point.
    pub fn append(&self, point: Point) -> Result<(), DbError> {
        let mut store = self.store.lock()?;
        if let Some(last) = store.last_ts() {
            if point.ts < last {
                return Err(DbError::OutOfOrderSample {
                    series_id: self.id,
                    timestamp: point.ts,
                    last,
                });
            }
        }
        store.append(point);
        Ok(())
    }

    pub fn len(&self) -> Result<usize, DbError> {
        Ok(self.store.lock()?.len())
    }

    /// Points with `start <= ts <= end`.
    pub fn range(&self, start: Timestamp, end: Timestamp) -> Result<Vec<Point>, DbError> {
        let store = self.store.lock()?;
        collect_range(store.iter(), start, end)
    }

    /// Encoded point stream, as persisted in the segment data blob.
    pub fn encoded(&self) -> Result<Vec<u8>, DbError> {
        Ok(self.store.lock()?.bytes())
    }
}

/// Filters a time-ordered point stream to `[start, end]`, stopping at the first point past `end`.
pub(crate) fn collect_range<I>(iter: I, start: Timestamp, end: Timestamp) -> Result<Vec<Point>, DbError>
where
    I: Iterator<Item = Result<Point, DbError>>,
{
    let mut out = Vec::new();
    for p in iter {
        let p = p?;
        if p.ts > end {
            break;
        }
        if p.ts >= start {
            out.push(p);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series() -> Series {
        let labels = LabelSet::from_pairs(&[("host", "a")]).with_metric_name("cpu");
        Series::new(labels.series_id(), labels)
    }

    #[test]
    fn range_is_inclusive_on_both_ends() {
        let s = series();
        for ts in [10, 20, 30, 40, 50] {
            s.append(Point::new(ts, ts as f64)).unwrap();
        }
        let got: Vec<_> = s.range(20, 40).unwrap().iter().map(|p| p.ts).collect();
        assert_eq!(got, vec![20, 30, 40]);
        assert!(s.range(51, 100).unwrap().is_empty());
        assert_eq!(s.len().unwrap(), 5);
    }

    #[test]
    fn out_of_order_append_rejected_equal_ts_allowed() {
        let s = series();
        s.append(Point::new(100, 1.0)).unwrap();
        s.append(Point::new(100, 2.0)).unwrap();
        let err = s.append(Point::new(99, 3.0)).unwrap_err();
        assert!(matches!(
            err,
            DbError::OutOfOrderSample {
                timestamp: 99,
                last: 100,
                ..
            }
        ));
        assert_eq!(s.len().unwrap(), 2);
    }

    #[test]
    fn collect_range_stops_at_first_point_past_end() {
        let stream = vec![
            Ok(Point::new(1, 1.0)),
            Ok(Point::new(5, 5.0)),
            Err(DbError::corruption("never reached")),
        ];
        let got = collect_range(stream.into_iter(), 0, 3).unwrap();
        assert_eq!(got, vec![Point::new(1, 1.0)]);
    }
}
