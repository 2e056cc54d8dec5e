use std::collections::BTreeMap;

use chrono::DateTime;
use chrono_tz::Tz;
use serde::Serialize;

use crate::comparison::{ComparisonWindows, WindowData, WindowKind};
use crate::entsoe::areas::ZoneDescriptor;
use crate::field::{Absence, Field, NO_DATA};
use crate::metrics::{
    PeriodChange, RenewableMatchers, estimated_value, market_turnover, period_change,
    renewable_share, spread,
};
use crate::series::TimeSeries;

pub mod labels {
    pub const PRICE_AVG: &str = "Day-ahead avg, EUR/MWh";
    pub const PRICE_MAX: &str = "Day-ahead max, EUR/MWh";
    pub const PRICE_MIN: &str = "Day-ahead min, EUR/MWh";
    pub const PRICE_SPREAD: &str = "Day-ahead spread, EUR/MWh";
    pub const PRICE_CHANGE: &str = "Day-ahead change 24h";
    pub const LOAD_AVG: &str = "Load avg, MW";
    pub const LOAD_PEAK: &str = "Load peak, MW";
    pub const RENEWABLE_SHARE: &str = "Renewable share, %";
    pub const IMBALANCE_PRICE_AVG: &str = "Imbalance price avg, EUR/MWh";
    pub const IMBALANCE_VOLUME: &str = "Imbalance volume, MWh";
    pub const IMBALANCE_VALUE: &str = "Imbalance value, M EUR";
    pub const MARKET_TURNOVER: &str = "Day-ahead turnover, M EUR";
}

const CHANGE_WINDOW_HOURS: i64 = 24;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricEntry {
    pub label: &'static str,
    pub value: String,
}

/// Display-ready metrics of one window, in display order
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct MetricSnapshot {
    entries: Vec<MetricEntry>,
}

impl MetricSnapshot {
    #[cfg(test)]
    pub fn entries(&self) -> &[MetricEntry] {
        &self.entries
    }

    #[cfg(test)]
    pub fn get(&self, label: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|entry| entry.label == label)
            .map(|entry| entry.value.as_str())
    }

    fn push(&mut self, label: &'static str, value: String) {
        self.entries.push(MetricEntry { label, value });
    }

    pub fn for_window(data: &WindowData, matchers: &RenewableMatchers) -> Self {
        use labels::*;

        let mut snapshot = Self::default();
        snapshot.push(PRICE_AVG, format_metric(&data.prices, TimeSeries::mean, 2));
        snapshot.push(PRICE_MAX, format_metric(&data.prices, TimeSeries::max, 2));
        snapshot.push(PRICE_MIN, format_metric(&data.prices, TimeSeries::min, 2));
        snapshot.push(
            PRICE_SPREAD,
            format_metric(&data.prices, |prices| spread(prices, &data.window), 2),
        );
        snapshot.push(
            PRICE_CHANGE,
            match &data.prices {
                Field::Present(prices) => period_change(prices, CHANGE_WINDOW_HOURS)
                    .map_or_else(|| NO_DATA.to_string(), format_change),
                Field::Absent(absence) => absence.placeholder().to_string(),
            },
        );
        snapshot.push(LOAD_AVG, format_metric(&data.load, TimeSeries::mean, 0));
        snapshot.push(LOAD_PEAK, format_metric(&data.load, TimeSeries::max, 0));
        snapshot.push(
            RENEWABLE_SHARE,
            format_metric(
                &data.generation,
                |generation| {
                    let mix = generation.latest();
                    (!mix.is_empty()).then(|| renewable_share(&mix, matchers))
                },
                1,
            ),
        );
        snapshot.push(
            IMBALANCE_PRICE_AVG,
            format_metric(&data.imbalance_price, TimeSeries::mean, 2),
        );
        snapshot.push(
            IMBALANCE_VOLUME,
            format_metric(&data.imbalance_volume, |volume| Some(volume.sum()), 1),
        );
        snapshot.push(
            IMBALANCE_VALUE,
            format_pair(
                &data.imbalance_volume,
                &data.imbalance_price,
                |volume, price| estimated_value(Some(&volume.zero_fill()), Some(price)),
                3,
            ),
        );
        // Gaps in load carry the last reading so every priced hour has a volume
        snapshot.push(
            MARKET_TURNOVER,
            format_pair(
                &data.prices,
                &data.load,
                |prices, load| market_turnover(Some(prices), Some(&load.forward_fill())),
                3,
            ),
        );
        snapshot
    }
}

fn format_metric<T>(
    field: &Field<T>,
    compute: impl FnOnce(&T) -> Option<f64>,
    decimals: usize,
) -> String {
    match field.present() {
        Some(value) => {
            compute(value).map_or_else(|| NO_DATA.to_string(), |v| format!("{v:.decimals$}"))
        }
        None => field.placeholder().to_string(),
    }
}

fn format_pair<A, B>(
    a: &Field<A>,
    b: &Field<B>,
    compute: impl FnOnce(&A, &B) -> f64,
    decimals: usize,
) -> String {
    match (a, b) {
        (Field::Present(a), Field::Present(b)) => {
            let value = compute(a, b);
            format!("{value:.decimals$}")
        }
        (Field::Absent(absence), _) | (_, Field::Absent(absence)) => {
            absence.placeholder().to_string()
        }
    }
}

fn format_change(change: PeriodChange) -> String {
    format!("{:+.2} ({:+.1}%)", change.diff, change.pct)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MissingField {
    pub window: WindowKind,
    pub field: &'static str,
    pub absence: Absence,
}

/// Everything the dashboard shows for one zone
#[derive(Debug, Clone, Serialize)]
pub struct MetricsView {
    pub zone: &'static ZoneDescriptor,
    pub generated_at: String,
    pub current_price: Option<f64>,
    pub today: MetricSnapshot,
    pub yesterday: MetricSnapshot,
    pub last_year: MetricSnapshot,
    pub generation_mix: BTreeMap<String, f64>,
    pub missing: Vec<MissingField>,
}

impl MetricsView {
    /// `None` when the live window has no day-ahead prices; any other gap
    /// only blanks the affected metrics.
    pub fn build(
        zone: &'static ZoneDescriptor,
        windows: &ComparisonWindows,
        matchers: &RenewableMatchers,
        now: DateTime<Tz>,
    ) -> Option<Self> {
        let prices = windows.today.prices.present()?;

        let generation_mix = windows
            .today
            .generation
            .present()
            .map(|generation| generation.snapshot_at(now))
            .unwrap_or_default();

        let missing = [&windows.today, &windows.yesterday, &windows.last_year]
            .into_iter()
            .flat_map(|window| {
                window
                    .missing()
                    .into_iter()
                    .map(move |(field, absence)| MissingField {
                        window: window.kind,
                        field,
                        absence: absence.clone(),
                    })
            })
            .collect();

        Some(Self {
            zone,
            generated_at: now.format("%Y-%m-%d %H:%M:%S").to_string(),
            current_price: prices.asof(now),
            today: MetricSnapshot::for_window(&windows.today, matchers),
            yesterday: MetricSnapshot::for_window(&windows.yesterday, matchers),
            last_year: MetricSnapshot::for_window(&windows.last_year, matchers),
            generation_mix,
            missing,
        })
    }
}
