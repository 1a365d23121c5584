//! Time-indexed series containers.
//!
//! A series is an append-only sequence of `(key, value)` points whose keys
//! are non-decreasing in insertion order. [`SeriesData`] is the plain
//! container, [`SyncedSeries`] wraps it for concurrent append and query.

use std::fmt;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Bound shared by every series index type.
pub trait SeriesKey: Copy + Ord + fmt::Debug + fmt::Display + Send + Sync + 'static {}

impl<T> SeriesKey for T where T: Copy + Ord + fmt::Debug + fmt::Display + Send + Sync + 'static {}

/// Bound shared by every series value type.
pub trait SeriesValue: Clone + fmt::Debug + fmt::Display + Send + Sync + 'static {}

impl<T> SeriesValue for T where T: Clone + fmt::Debug + fmt::Display + Send + Sync + 'static {}

// ── Index types ──────────────────────────────────────────────

/// Wall-clock observation time in nanoseconds since the UNIX epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Time(i64);

impl Time {
    pub const MIN: Self = Self(i64::MIN);
    pub const MAX: Self = Self(i64::MAX);

    pub fn now() -> Self {
        Self::from_datetime(Utc::now())
    }

    pub const fn from_nanos(nanos: i64) -> Self {
        Self(nanos)
    }

    pub fn from_datetime(time: DateTime<Utc>) -> Self {
        Self(time.timestamp_nanos_opt().unwrap_or(i64::MAX))
    }

    pub const fn as_nanos(self) -> i64 {
        self.0
    }
}

impl fmt::Display for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Block height used as series index for block-driven metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockNumber(pub u64);

impl BlockNumber {
    pub const MIN: Self = Self(0);
    pub const MAX: Self = Self(u64::MAX);
}

impl fmt::Display for BlockNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for BlockNumber {
    fn from(height: u64) -> Self {
        Self(height)
    }
}

/// A single sample of a series.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Point<K, V> {
    pub key: K,
    pub value: V,
}

// ── Series ───────────────────────────────────────────────────

/// Read access to a series. All results are owned snapshots.
pub trait Series<K, V>: Send + Sync {
    /// Points with `from <= key <= to`, in index order.
    fn range(&self, from: K, to: K) -> Vec<Point<K, V>>;

    /// The most recently appended point.
    fn latest(&self) -> Option<Point<K, V>>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Points at insertion positions `position..`.
    fn points_from(&self, position: usize) -> Vec<Point<K, V>>;

    fn points(&self) -> Vec<Point<K, V>> {
        self.points_from(0)
    }
}

/// Plain, unsynchronised series container.
#[derive(Debug, Clone)]
pub struct SeriesData<K, V> {
    points: Vec<Point<K, V>>,
}

impl<K, V> Default for SeriesData<K, V> {
    fn default() -> Self {
        Self { points: Vec::new() }
    }
}

impl<K: SeriesKey, V: Clone> SeriesData<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a series from points the caller already ordered by key.
    pub const fn from_points(points: Vec<Point<K, V>>) -> Self {
        Self { points }
    }

    pub fn append(&mut self, key: K, value: V) {
        self.points.push(Point { key, value });
    }

    pub fn as_slice(&self) -> &[Point<K, V>] {
        &self.points
    }

    fn range_slice(&self, from: K, to: K) -> &[Point<K, V>] {
        let start = self.points.partition_point(|p| p.key < from);
        let end = self.points.partition_point(|p| p.key <= to);
        if start >= end {
            return &[];
        }
        &self.points[start..end]
    }
}

impl<K: SeriesKey, V: Clone + Send + Sync> Series<K, V> for SeriesData<K, V> {
    fn range(&self, from: K, to: K) -> Vec<Point<K, V>> {
        self.range_slice(from, to).to_vec()
    }

    fn latest(&self) -> Option<Point<K, V>> {
        self.points.last().cloned()
    }

    fn len(&self) -> usize {
        self.points.len()
    }

    fn points_from(&self, position: usize) -> Vec<Point<K, V>> {
        self.points.get(position..).map(<[_]>::to_vec).unwrap_or_default()
    }
}

/// A series safe for concurrent appends and queries.
///
/// Appends and queries are mutually exclusive; queries return copies, so a
/// reader never observes a partially appended point.
#[derive(Debug)]
pub struct SyncedSeries<K, V> {
    inner: Mutex<SeriesData<K, V>>,
}

impl<K, V> Default for SyncedSeries<K, V> {
    fn default() -> Self {
        Self { inner: Mutex::new(SeriesData::default()) }
    }
}

impl<K: SeriesKey, V: Clone + Send + Sync> SyncedSeries<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a point. Key order is the caller's responsibility.
    pub fn append(&self, key: K, value: V) {
        self.inner.lock().append(key, value);
    }
}

impl<K: SeriesKey, V: Clone + Send + Sync> Series<K, V> for SyncedSeries<K, V> {
    fn range(&self, from: K, to: K) -> Vec<Point<K, V>> {
        self.inner.lock().range(from, to)
    }

    fn latest(&self) -> Option<Point<K, V>> {
        self.inner.lock().latest()
    }

    fn len(&self) -> usize {
        self.inner.lock().len()
    }

    fn points_from(&self, position: usize) -> Vec<Point<K, V>> {
        self.inner.lock().points_from(position)
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread};

    use super::*;

    fn series(keys: &[u64]) -> SeriesData<BlockNumber, u64> {
        let mut s = SeriesData::new();
        for &k in keys {
            s.append(BlockNumber(k), k * 10);
        }
        s
    }

    #[test]
    fn range_is_inclusive() {
        let s = series(&[1, 2, 3, 4, 5]);
        let keys: Vec<_> = s.range(BlockNumber(2), BlockNumber(4)).iter().map(|p| p.key.0).collect();
        assert_eq!(keys, vec![2, 3, 4]);
    }

    #[test]
    fn range_outside_data_is_empty() {
        let s = series(&[5, 6]);
        assert!(s.range(BlockNumber(0), BlockNumber(4)).is_empty());
        assert!(s.range(BlockNumber(7), BlockNumber(9)).is_empty());
        assert!(s.range(BlockNumber(6), BlockNumber(5)).is_empty());
    }

    #[test]
    fn duplicate_keys_are_kept() {
        let s = series(&[1, 2, 2, 3]);
        assert_eq!(s.len(), 4);
        assert_eq!(s.range(BlockNumber(2), BlockNumber(2)).len(), 2);
    }

    #[test]
    fn latest_and_suffix() {
        let s = series(&[1, 2, 3]);
        assert_eq!(s.latest(), Some(Point { key: BlockNumber(3), value: 30 }));
        assert_eq!(s.points_from(1).len(), 2);
        assert!(s.points_from(3).is_empty());
        assert!(s.points_from(10).is_empty());
        assert!(SeriesData::<BlockNumber, u64>::new().latest().is_none());
    }

    #[test]
    fn synced_series_snapshots_are_consistent_prefixes() {
        let s = Arc::new(SyncedSeries::<BlockNumber, u64>::new());
        let writer = {
            let s = Arc::clone(&s);
            thread::spawn(move || {
                for i in 0..10_000 {
                    s.append(BlockNumber(i), i);
                }
            })
        };

        for _ in 0..100 {
            let snapshot = s.range(BlockNumber::MIN, BlockNumber::MAX);
            for (i, point) in snapshot.iter().enumerate() {
                assert_eq!(point.key.0, i as u64);
                assert_eq!(point.value, i as u64);
            }
        }

        writer.join().unwrap();
        assert_eq!(s.len(), 10_000);
    }

    #[test]
    fn time_orders_by_nanos() {
        assert!(Time::from_nanos(1) < Time::from_nanos(2));
        assert!(Time::MIN < Time::now());
        assert_eq!(Time::from_nanos(42).to_string(), "42");
    }
}
