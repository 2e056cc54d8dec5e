//! Fetching of the live, yesterday and one-year-ago windows for a zone.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use tracing::{debug, warn};

use crate::cache::TtlCache;
use crate::entsoe::areas::ZoneDescriptor;
use crate::entsoe::{MarketDataSource, SourceError};
use crate::field::{Absence, Field};
use crate::generation::{CategorySeries, DisplayNames, RawTable, aggregate};
use crate::series::{RawSeries, TimeSeries, TimeWindow, normalize_fetched};

pub const DEFAULT_LIVE_TTL: StdDuration = StdDuration::from_secs(300);
pub const DEFAULT_COMPARISON_TTL: StdDuration = StdDuration::from_secs(3600);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowKind {
    Live,
    Yesterday,
    LastYear,
}

impl WindowKind {
    /// Live is a rolling range that reaches into tomorrow's day-ahead
    /// auction; the comparison kinds are whole calendar days in `now`'s zone.
    pub fn bounds(self, now: DateTime<Tz>) -> TimeWindow {
        match self {
            WindowKind::Live => {
                TimeWindow::new(now - Duration::hours(48), now + Duration::hours(24))
            }
            WindowKind::Yesterday => {
                calendar_day((now - Duration::days(1)).date_naive(), now.timezone())
            }
            WindowKind::LastYear => {
                calendar_day((now - Duration::days(365)).date_naive(), now.timezone())
            }
        }
    }
}

/// [00:00, 23:59] of `day` in `tz`
fn calendar_day(day: NaiveDate, tz: Tz) -> TimeWindow {
    let midnight = day.and_time(NaiveTime::MIN);
    TimeWindow::new(
        localize(midnight, tz),
        localize(midnight + Duration::minutes(23 * 60 + 59), tz),
    )
}

/// Local wall time to an instant; times skipped by a DST jump are read as UTC
fn localize(naive: NaiveDateTime, tz: Tz) -> DateTime<Tz> {
    tz.from_local_datetime(&naive)
        .earliest()
        .unwrap_or_else(|| tz.from_utc_datetime(&naive))
}

/// The five independently fetched fields of one window
#[derive(Debug, Clone)]
pub struct WindowData {
    pub kind: WindowKind,
    pub window: TimeWindow,
    pub prices: Field<TimeSeries>,
    pub load: Field<TimeSeries>,
    pub generation: Field<CategorySeries>,
    pub imbalance_price: Field<TimeSeries>,
    pub imbalance_volume: Field<TimeSeries>,
}

impl WindowData {
    /// Every field absent for the same reason
    #[cfg(test)]
    pub fn absent(kind: WindowKind, window: TimeWindow, absence: Absence) -> Self {
        Self {
            kind,
            window,
            prices: Field::Absent(absence.clone()),
            load: Field::Absent(absence.clone()),
            generation: Field::Absent(absence.clone()),
            imbalance_price: Field::Absent(absence.clone()),
            imbalance_volume: Field::Absent(absence),
        }
    }

    /// (field name, absence) of every field without data
    pub fn missing(&self) -> Vec<(&'static str, &Absence)> {
        [
            ("prices", self.prices.absence()),
            ("load", self.load.absence()),
            ("generation", self.generation.absence()),
            ("imbalance_price", self.imbalance_price.absence()),
            ("imbalance_volume", self.imbalance_volume.absence()),
        ]
        .into_iter()
        .filter_map(|(name, absence)| absence.map(|a| (name, a)))
        .collect()
    }
}

#[derive(Debug, Clone)]
pub struct ComparisonWindows {
    pub today: WindowData,
    pub yesterday: WindowData,
    pub last_year: WindowData,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct WindowKey {
    zone: &'static str,
    kind: WindowKind,
    /// Local day a calendar-day window covers; the live window has none
    day: Option<NaiveDate>,
}

pub struct ComparisonFetcher {
    source: Arc<dyn MarketDataSource>,
    tz: Tz,
    names: DisplayNames,
    live_ttl: StdDuration,
    comparison_ttl: StdDuration,
    cache: TtlCache<WindowKey, WindowData>,
}

impl ComparisonFetcher {
    pub fn new(source: Arc<dyn MarketDataSource>, tz: Tz, names: DisplayNames) -> Self {
        Self {
            source,
            tz,
            names,
            live_ttl: DEFAULT_LIVE_TTL,
            comparison_ttl: DEFAULT_COMPARISON_TTL,
            cache: TtlCache::new(),
        }
    }

    pub fn with_ttls(mut self, live: StdDuration, comparison: StdDuration) -> Self {
        self.live_ttl = live;
        self.comparison_ttl = comparison;
        self
    }

    pub fn now(&self) -> DateTime<Tz> {
        Utc::now().with_timezone(&self.tz)
    }

    pub async fn fetch_comparison_windows(
        &self,
        zone: &'static ZoneDescriptor,
    ) -> ComparisonWindows {
        self.fetch_comparison_windows_at(zone, self.now()).await
    }

    /// All three windows relative to `now`. Never fails: unavailable fields
    /// come back `Absent`.
    pub async fn fetch_comparison_windows_at(
        &self,
        zone: &'static ZoneDescriptor,
        now: DateTime<Tz>,
    ) -> ComparisonWindows {
        ComparisonWindows {
            today: self.fetch_window(zone, WindowKind::Live, now).await,
            yesterday: self.fetch_window(zone, WindowKind::Yesterday, now).await,
            last_year: self.fetch_window(zone, WindowKind::LastYear, now).await,
        }
    }

    pub async fn fetch_window(
        &self,
        zone: &'static ZoneDescriptor,
        kind: WindowKind,
        now: DateTime<Tz>,
    ) -> WindowData {
        let (day, ttl) = match kind {
            WindowKind::Live => (None, self.live_ttl),
            WindowKind::Yesterday | WindowKind::LastYear => {
                (Some(kind.bounds(now).start.date_naive()), self.comparison_ttl)
            }
        };
        let key = WindowKey {
            zone: zone.code,
            kind,
            day,
        };
        self.cache
            .get_or_compute(key, ttl, || self.load_window(zone, kind, now))
            .await
    }

    /// Drops every cached window
    pub async fn invalidate(&self) {
        self.cache.invalidate_all().await;
    }

    async fn load_window(
        &self,
        zone: &ZoneDescriptor,
        kind: WindowKind,
        now: DateTime<Tz>,
    ) -> WindowData {
        let window = kind.bounds(now);
        let (start, end) = window.to_utc();
        debug!(zone = zone.code, ?kind, %start, %end, "fetching window");

        let prices = self.series_field(
            zone,
            "prices",
            self.source.day_ahead_prices(zone, start, end).await,
        );
        let load = self.series_field(zone, "load", self.source.load(zone, start, end).await);
        let generation =
            self.generation_field(zone, self.source.generation(zone, start, end).await);
        let imbalance_price = self.series_field(
            zone,
            "imbalance_price",
            self.source.imbalance_prices(zone, start, end).await,
        );
        let imbalance_volume = self.series_field(
            zone,
            "imbalance_volume",
            self.source.imbalance_volumes(zone, start, end).await,
        );

        WindowData {
            kind,
            window,
            prices,
            load,
            generation,
            imbalance_price,
            imbalance_volume,
        }
    }

    fn series_field(
        &self,
        zone: &ZoneDescriptor,
        field: &'static str,
        fetched: Result<RawSeries, SourceError>,
    ) -> Field<TimeSeries> {
        log_failure(zone, field, &fetched);
        normalize_fetched(fetched, self.tz)
    }

    fn generation_field(
        &self,
        zone: &ZoneDescriptor,
        fetched: Result<RawTable, SourceError>,
    ) -> Field<CategorySeries> {
        log_failure(zone, "generation", &fetched);
        match fetched {
            Ok(raw) if raw.is_empty() => Field::Absent(Absence::NoData),
            Ok(raw) => {
                let categories = aggregate(&raw, self.tz, &self.names);
                if categories.is_empty() {
                    Field::Absent(Absence::NoData)
                } else {
                    Field::Present(categories)
                }
            }
            Err(err) => Field::Absent(err.absence()),
        }
    }
}

fn log_failure<T>(zone: &ZoneDescriptor, field: &str, fetched: &Result<T, SourceError>) {
    match fetched {
        Err(SourceError::NoData) => debug!(zone = zone.code, field, "no data"),
        Err(err) => warn!(zone = zone.code, field, error = %err, "upstream query failed"),
        Ok(_) => {}
    }
}
