//! Alignment of raw upstream series onto the display time zone.

use std::collections::HashMap;

use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;

use crate::entsoe::SourceError;
use crate::field::{Absence, Field};

/// A timestamp as delivered by a data source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawTimestamp {
    /// Zone-less, read as UTC
    Naive(NaiveDateTime),
    Aware(DateTime<FixedOffset>),
}

impl RawTimestamp {
    pub fn to_utc(&self) -> DateTime<Utc> {
        match self {
            RawTimestamp::Naive(naive) => Utc.from_utc_datetime(naive),
            RawTimestamp::Aware(dt) => dt.with_timezone(&Utc),
        }
    }
}

impl From<DateTime<Utc>> for RawTimestamp {
    fn from(dt: DateTime<Utc>) -> Self {
        RawTimestamp::Aware(dt.fixed_offset())
    }
}

impl From<DateTime<FixedOffset>> for RawTimestamp {
    fn from(dt: DateTime<FixedOffset>) -> Self {
        RawTimestamp::Aware(dt)
    }
}

impl From<NaiveDateTime> for RawTimestamp {
    fn from(naive: NaiveDateTime) -> Self {
        RawTimestamp::Naive(naive)
    }
}

/// Timestamped values in source order; may be unsorted and hold duplicates or NaN
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawSeries {
    pub points: Vec<(RawTimestamp, f64)>,
}

impl<T: Into<RawTimestamp>> FromIterator<(T, f64)> for RawSeries {
    fn from_iter<I: IntoIterator<Item = (T, f64)>>(iter: I) -> Self {
        Self {
            points: iter.into_iter().map(|(ts, v)| (ts.into(), v)).collect(),
        }
    }
}

/// Inclusive time range in the display zone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: DateTime<Tz>,
    pub end: DateTime<Tz>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Tz>, end: DateTime<Tz>) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, ts: &DateTime<Tz>) -> bool {
        *ts >= self.start && *ts <= self.end
    }

    pub fn to_utc(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        (
            self.start.with_timezone(&Utc),
            self.end.with_timezone(&Utc),
        )
    }
}

/// A normalized series: one zone, strictly increasing timestamps, explicit
/// missing values. Never mutated; every transformation builds a new series.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSeries {
    tz: Tz,
    points: Vec<(DateTime<Tz>, Option<f64>)>,
}

impl TimeSeries {
    /// Caller guarantees `points` are strictly increasing.
    pub(crate) fn from_sorted(tz: Tz, points: Vec<(DateTime<Tz>, Option<f64>)>) -> Self {
        debug_assert!(points.windows(2).all(|w| w[0].0 < w[1].0));
        Self { tz, points }
    }

    pub fn points(&self) -> &[(DateTime<Tz>, Option<f64>)] {
        &self.points
    }

    /// Present values in timestamp order
    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.points.iter().filter_map(|(_, v)| *v)
    }

    pub fn last_timestamp(&self) -> Option<DateTime<Tz>> {
        self.points.last().map(|(ts, _)| *ts)
    }

    /// Latest present value at or before `at`
    pub fn asof(&self, at: DateTime<Tz>) -> Option<f64> {
        let upto = self.points.partition_point(|(ts, _)| *ts <= at);
        self.points[..upto].iter().rev().find_map(|(_, v)| *v)
    }

    pub fn window(&self, window: &TimeWindow) -> TimeSeries {
        let points = self
            .points
            .iter()
            .filter(|(ts, _)| window.contains(ts))
            .copied()
            .collect();
        TimeSeries::from_sorted(self.tz, points)
    }

    /// Missing values take the previous present value; leading gaps stay missing.
    pub fn forward_fill(&self) -> TimeSeries {
        let mut last = None;
        let points = self
            .points
            .iter()
            .map(|(ts, v)| {
                if v.is_some() {
                    last = *v;
                }
                (*ts, last)
            })
            .collect();
        TimeSeries::from_sorted(self.tz, points)
    }

    pub fn zero_fill(&self) -> TimeSeries {
        let points = self
            .points
            .iter()
            .map(|(ts, v)| (*ts, Some(v.unwrap_or(0.0))))
            .collect();
        TimeSeries::from_sorted(self.tz, points)
    }

    pub fn sum(&self) -> f64 {
        self.values().sum()
    }

    pub fn mean(&self) -> Option<f64> {
        let (sum, count) = self
            .values()
            .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
        (count > 0).then(|| sum / count as f64)
    }

    pub fn max(&self) -> Option<f64> {
        self.values().reduce(f64::max)
    }

    pub fn min(&self) -> Option<f64> {
        self.values().reduce(f64::min)
    }
}

/// Converts each index entry into `tz` and keeps, per distinct instant, the
/// row of its last occurrence. Output is sorted ascending.
pub(crate) fn align_index<'a>(
    index: impl IntoIterator<Item = &'a RawTimestamp>,
    tz: Tz,
) -> Vec<(DateTime<Tz>, usize)> {
    let mut last_row: HashMap<DateTime<Utc>, usize> = HashMap::new();
    for (row, ts) in index.into_iter().enumerate() {
        last_row.insert(ts.to_utc(), row);
    }

    let mut aligned: Vec<(DateTime<Tz>, usize)> = last_row
        .into_iter()
        .map(|(ts, row)| (ts.with_timezone(&tz), row))
        .collect();
    aligned.sort_by_key(|(ts, _)| *ts);
    aligned
}

/// Aligns a raw series to `tz`: naive timestamps are read as UTC, duplicates
/// resolve to the last occurrence, non-finite values become missing.
pub fn normalize(raw: &RawSeries, tz: Tz) -> TimeSeries {
    let aligned = align_index(raw.points.iter().map(|(ts, _)| ts), tz);
    let points = aligned
        .into_iter()
        .map(|(ts, row)| {
            let value = raw.points[row].1;
            (ts, value.is_finite().then_some(value))
        })
        .collect();
    TimeSeries::from_sorted(tz, points)
}

/// Normalizes the outcome of an upstream query. Failures and series without a
/// single present value become `Absent`; nothing is propagated.
pub fn normalize_fetched(fetched: Result<RawSeries, SourceError>, tz: Tz) -> Field<TimeSeries> {
    match fetched {
        Ok(raw) => {
            let series = normalize(&raw, tz);
            if series.values().next().is_none() {
                Field::Absent(Absence::NoData)
            } else {
                Field::Present(series)
            }
        }
        Err(err) => Field::Absent(err.absence()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate, Timelike};
    use chrono_tz::Europe::Kyiv;

    fn utc(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 10, hour, 0, 0).unwrap()
    }

    fn naive(hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 10)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_duplicate_timestamps_keep_last() {
        let raw: RawSeries = vec![(utc(1), 10.0), (utc(1), 20.0)].into_iter().collect();
        let series = normalize(&raw, Tz::UTC);

        assert_eq!(series.points().len(), 1);
        assert_eq!(series.points()[0].1, Some(20.0));
    }

    #[test]
    fn test_output_is_sorted() {
        let raw: RawSeries = vec![(utc(3), 3.0), (utc(1), 1.0), (utc(2), 2.0)]
            .into_iter()
            .collect();
        let series = normalize(&raw, Tz::UTC);

        assert_eq!(series.values().collect::<Vec<_>>(), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_naive_timestamps_read_as_utc() {
        let raw: RawSeries = vec![(naive(10), 1.0)].into_iter().collect();
        let series = normalize(&raw, Kyiv);

        // Kyiv is UTC+2 before the March DST switch
        let ts = series.points()[0].0;
        assert_eq!(ts.hour(), 12);
        assert_eq!(ts.with_timezone(&Utc), utc(10));
    }

    #[test]
    fn test_aware_timestamps_converted_and_deduplicated_across_offsets() {
        let plus_two = FixedOffset::east_opt(2 * 3600).unwrap();
        let same_instant = utc(5).with_timezone(&plus_two);
        let raw = RawSeries {
            points: vec![
                (RawTimestamp::from(utc(5)), 1.0),
                (RawTimestamp::from(same_instant), 2.0),
            ],
        };
        let series = normalize(&raw, Kyiv);

        assert_eq!(series.points().len(), 1);
        assert_eq!(series.points()[0].1, Some(2.0));
    }

    #[test]
    fn test_nan_becomes_missing() {
        let raw: RawSeries = vec![(utc(1), f64::NAN), (utc(2), 4.0)].into_iter().collect();
        let series = normalize(&raw, Tz::UTC);

        assert_eq!(series.points()[0].1, None);
        assert_eq!(series.points()[1].1, Some(4.0));
    }

    #[test]
    fn test_fill_operations_return_new_series() {
        let raw: RawSeries = vec![
            (utc(0), f64::NAN),
            (utc(1), 5.0),
            (utc(2), f64::NAN),
            (utc(3), 7.0),
        ]
        .into_iter()
        .collect();
        let series = normalize(&raw, Tz::UTC);

        let ffilled = series.forward_fill();
        let values: Vec<_> = ffilled.points().iter().map(|(_, v)| *v).collect();
        assert_eq!(values, vec![None, Some(5.0), Some(5.0), Some(7.0)]);

        let zeroed = series.zero_fill();
        let values: Vec<_> = zeroed.points().iter().map(|(_, v)| *v).collect();
        assert_eq!(values, vec![Some(0.0), Some(5.0), Some(0.0), Some(7.0)]);

        // original untouched
        assert_eq!(series.points()[2].1, None);
    }

    #[test]
    fn test_asof_skips_missing_and_respects_bounds() {
        let raw: RawSeries = vec![(utc(1), 5.0), (utc(2), f64::NAN), (utc(4), 9.0)]
            .into_iter()
            .collect();
        let series = normalize(&raw, Tz::UTC);
        let at = |h| utc(h).with_timezone(&Tz::UTC);

        assert_eq!(series.asof(at(0)), None);
        assert_eq!(series.asof(at(1)), Some(5.0));
        assert_eq!(series.asof(at(3)), Some(5.0));
        assert_eq!(series.asof(at(4)), Some(9.0));
        assert_eq!(series.asof(at(4) + Duration::days(2)), Some(9.0));
    }

    #[test]
    fn test_window_is_inclusive() {
        let raw: RawSeries = (0..6).map(|h| (utc(h), h as f64)).collect();
        let series = normalize(&raw, Tz::UTC);
        let window = TimeWindow::new(
            utc(2).with_timezone(&Tz::UTC),
            utc(4).with_timezone(&Tz::UTC),
        );

        let sub = series.window(&window);
        assert_eq!(sub.values().collect::<Vec<_>>(), vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_aggregates_ignore_missing() {
        let raw: RawSeries = vec![(utc(0), 2.0), (utc(1), f64::NAN), (utc(2), 6.0)]
            .into_iter()
            .collect();
        let series = normalize(&raw, Tz::UTC);

        assert_eq!(series.mean(), Some(4.0));
        assert_eq!(series.sum(), 8.0);
        assert_eq!(series.max(), Some(6.0));
        assert_eq!(series.min(), Some(2.0));
    }

    #[test]
    fn test_normalize_fetched_failures_become_absent() {
        let failed = normalize_fetched(Err(SourceError::RateLimited), Tz::UTC);
        assert!(matches!(failed, Field::Absent(Absence::Transient(_))));

        let empty = normalize_fetched(Ok(RawSeries::default()), Tz::UTC);
        assert_eq!(empty, Field::Absent(Absence::NoData));

        let all_nan: RawSeries = vec![(utc(0), f64::NAN)].into_iter().collect();
        assert_eq!(
            normalize_fetched(Ok(all_nan), Tz::UTC),
            Field::Absent(Absence::NoData)
        );
    }
}
