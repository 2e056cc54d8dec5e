//! Derived market metrics over normalized series.
//!
//! Every function here degrades to a neutral value (0.0 or `None`) when its
//! inputs are missing or empty, never to an error.

pub(crate) mod snapshot;

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Duration};
use chrono_tz::Tz;
use serde::Serialize;

use crate::field::Field;
use crate::generation::DisplayNames;
use crate::series::{TimeSeries, TimeWindow};

const MILLION: f64 = 1_000_000.0;

/// Upstream technologies counted as renewable
pub const RENEWABLE_TECHNOLOGIES: &[&str] = &[
    "Biomass",
    "Geothermal",
    "Hydro Run-of-river and poundage",
    "Hydro Water Reservoir",
    "Marine",
    "Other renewable",
    "Solar",
    "Wind Offshore",
    "Wind Onshore",
];

/// Anything a single number can be pulled out of
pub trait ScalarSource {
    fn first_finite(&self) -> Option<f64>;
}

impl ScalarSource for f64 {
    fn first_finite(&self) -> Option<f64> {
        self.is_finite().then_some(*self)
    }
}

impl ScalarSource for Option<f64> {
    fn first_finite(&self) -> Option<f64> {
        self.and_then(|v| v.first_finite())
    }
}

impl ScalarSource for [f64] {
    fn first_finite(&self) -> Option<f64> {
        self.iter().copied().find(|v| v.is_finite())
    }
}

impl ScalarSource for Vec<f64> {
    fn first_finite(&self) -> Option<f64> {
        self.as_slice().first_finite()
    }
}

impl ScalarSource for TimeSeries {
    fn first_finite(&self) -> Option<f64> {
        self.values().next()
    }
}

impl<T: ScalarSource> ScalarSource for Field<T> {
    fn first_finite(&self) -> Option<f64> {
        self.present().and_then(|value| value.first_finite())
    }
}

/// First finite value of `source`, 0.0 when there is none
pub fn safe_scalar<S: ScalarSource + ?Sized>(source: &S) -> f64 {
    source.first_finite().unwrap_or(0.0)
}

/// Substrings identifying renewable categories by display name
#[derive(Debug, Clone, PartialEq)]
pub struct RenewableMatchers {
    fragments: Vec<String>,
}

impl RenewableMatchers {
    pub fn new<S: Into<String>>(fragments: impl IntoIterator<Item = S>) -> Self {
        let mut fragments: Vec<String> = fragments
            .into_iter()
            .map(Into::into)
            .filter(|f| !f.is_empty())
            .collect();
        fragments.sort();
        fragments.dedup();
        Self { fragments }
    }

    /// Matchers for the display names `technologies` end up under after
    /// translation, so renaming a category cannot silently drop it.
    pub fn from_technologies<S: AsRef<str>>(
        technologies: impl IntoIterator<Item = S>,
        names: &DisplayNames,
    ) -> Self {
        Self::new(
            technologies
                .into_iter()
                .map(|tech| names.display(tech.as_ref()).to_string()),
        )
    }

    pub fn matches(&self, category: &str) -> bool {
        self.fragments
            .iter()
            .any(|fragment| category.contains(fragment.as_str()))
    }
}

/// Share of renewable categories in the total of a generation snapshot, in
/// percent. Negative and non-finite values count as zero.
pub fn renewable_share(snapshot: &BTreeMap<String, f64>, matchers: &RenewableMatchers) -> f64 {
    let mut total = 0.0;
    let mut renewable = 0.0;
    for (category, value) in snapshot {
        let value = if value.is_finite() && *value > 0.0 {
            *value
        } else {
            0.0
        };
        total += value;
        if matchers.matches(category) {
            renewable += value;
        }
    }

    if total <= 0.0 {
        return 0.0;
    }
    (renewable * 100.0 / total).clamp(0.0, 100.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PeriodChange {
    pub current: f64,
    pub previous: f64,
    pub diff: f64,
    /// `diff` relative to `previous`, so a rise from a negative price is negative;
    /// 0 when `previous` is 0
    pub pct: f64,
}

/// Change between the last sample of `series` and the as-of sample
/// `window_hours` before it. `None` when the series holds no value.
pub fn period_change(series: &TimeSeries, window_hours: i64) -> Option<PeriodChange> {
    let last = series.last_timestamp()?;
    let current = series.asof(last)?;
    let previous = safe_scalar(&series.asof(last - Duration::hours(window_hours)));

    let diff = current - previous;
    let pct = if previous == 0.0 {
        0.0
    } else {
        diff * 100.0 / previous
    };

    Some(PeriodChange {
        current,
        previous,
        diff,
        pct,
    })
}

/// Max minus min over `window`
pub fn spread(series: &TimeSeries, window: &TimeWindow) -> Option<f64> {
    let within = series.window(window);
    Some(within.max()? - within.min()?)
}

/// Volume total priced at the mean price, in millions
pub fn estimated_value(volume: Option<&TimeSeries>, price: Option<&TimeSeries>) -> f64 {
    let (Some(volume), Some(price)) = (volume, price) else {
        return 0.0;
    };
    match price.mean() {
        Some(mean) => volume.sum() * mean / MILLION,
        None => 0.0,
    }
}

/// Sum of price x load over the timestamps both series share, in millions
pub fn market_turnover(price: Option<&TimeSeries>, load: Option<&TimeSeries>) -> f64 {
    let (Some(price), Some(load)) = (price, load) else {
        return 0.0;
    };

    let load_map: HashMap<DateTime<Tz>, f64> = load
        .points()
        .iter()
        .filter_map(|(ts, v)| v.map(|v| (*ts, v)))
        .collect();

    let total: f64 = price
        .points()
        .iter()
        .filter_map(|(ts, p)| Some((*p)? * load_map.get(ts)?))
        .sum();
    total / MILLION
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::{RawSeries, normalize};
    use chrono::{TimeZone, Utc};
    use proptest::prelude::*;

    fn at(h: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap() + Duration::hours(h)
    }

    fn series(points: &[(i64, f64)]) -> TimeSeries {
        let raw: RawSeries = points.iter().map(|(h, v)| (at(*h), *v)).collect();
        normalize(&raw, Tz::UTC)
    }

    fn snapshot(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_safe_scalar() {
        assert_eq!(safe_scalar(&Vec::<f64>::new()), 0.0);
        assert_eq!(safe_scalar(&[f64::NAN, 5.0][..]), 5.0);
        assert_eq!(safe_scalar(&f64::NAN), 0.0);
        assert_eq!(safe_scalar(&Some(3.5)), 3.5);
        assert_eq!(safe_scalar(&None::<f64>), 0.0);
        assert_eq!(safe_scalar(&series(&[(0, f64::NAN), (1, 8.0)])), 8.0);
        assert_eq!(safe_scalar(&series(&[])), 0.0);
    }

    #[test]
    fn test_renewable_share_scenario() {
        let matchers = RenewableMatchers::new(["Solar", "Wind"]);
        let mix = snapshot(&[("Solar", 40.0), ("Wind", 30.0), ("Coal", 30.0)]);
        assert_eq!(renewable_share(&mix, &matchers), 70.0);
    }

    #[test]
    fn test_renewable_share_zero_total() {
        let matchers = RenewableMatchers::new(["Solar"]);
        assert_eq!(renewable_share(&snapshot(&[]), &matchers), 0.0);
        assert_eq!(
            renewable_share(&snapshot(&[("Solar", 0.0), ("Coal", 0.0)]), &matchers),
            0.0
        );
    }

    #[test]
    fn test_renewable_matchers_follow_translation() {
        let matchers = RenewableMatchers::from_technologies(
            RENEWABLE_TECHNOLOGIES.iter(),
            &DisplayNames::default(),
        );
        assert!(matchers.matches("Сонце"));
        assert!(matchers.matches("Вітер"));
        assert!(matchers.matches("ГЕС"));
        assert!(matchers.matches("Інші ВДЕ"));
        assert!(!matchers.matches("ГАЕС"));
        assert!(!matchers.matches("АЕС"));
        assert!(!matchers.matches("Газ"));
    }

    #[test]
    fn test_period_change_scenario() {
        let prices = series(&[(0, 50.0), (2, 58.0), (4, 65.0)]);
        let change = period_change(&prices, 4).unwrap();

        assert_eq!(change.diff, 15.0);
        assert_eq!(change.pct, 30.0);
        assert_eq!(change.current, 65.0);
        assert_eq!(change.previous, 50.0);
    }

    #[test]
    fn test_period_change_edge_cases() {
        assert_eq!(period_change(&series(&[]), 24), None);

        // nothing at T - window: earlier value counts as 0
        let short = series(&[(10, 40.0)]);
        let change = period_change(&short, 24).unwrap();
        assert_eq!(change.diff, 40.0);
        assert_eq!(change.pct, 0.0);

        // negative earlier price: plain ratio against the signed value
        let negative = series(&[(0, -10.0), (1, 5.0)]);
        let change = period_change(&negative, 1).unwrap();
        assert_eq!(change.diff, 15.0);
        assert_eq!(change.pct, -150.0);
    }

    #[test]
    fn test_spread_over_window() {
        let prices = series(&[(0, 90.0), (1, 40.0), (2, 120.0), (3, 10.0)]);
        let window = TimeWindow::new(
            at(0).with_timezone(&Tz::UTC),
            at(2).with_timezone(&Tz::UTC),
        );

        assert_eq!(spread(&prices, &window), Some(80.0));

        let empty = TimeWindow::new(
            at(10).with_timezone(&Tz::UTC),
            at(12).with_timezone(&Tz::UTC),
        );
        assert_eq!(spread(&prices, &empty), None);
    }

    #[test]
    fn test_estimated_value() {
        let volume = series(&[(0, 1000.0), (1, 3000.0)]);
        let price = series(&[(0, 100.0), (1, 200.0)]);

        assert!((estimated_value(Some(&volume), Some(&price)) - 0.6).abs() < 1e-12);
        assert_eq!(estimated_value(None, Some(&price)), 0.0);
        assert_eq!(estimated_value(Some(&volume), None), 0.0);
    }

    #[test]
    fn test_market_turnover_scenario() {
        let price = series(&[(0, 10.0), (1, 20.0)]);
        let load = series(&[(0, 100.0), (1, 100.0)]);

        assert!((market_turnover(Some(&price), Some(&load)) - 0.003).abs() < 1e-12);
    }

    #[test]
    fn test_market_turnover_inner_join() {
        let price = series(&[(0, 10.0), (1, 20.0), (5, 1000.0)]);
        let load = series(&[(1, 100.0), (2, 100.0)]);

        assert!((market_turnover(Some(&price), Some(&load)) - 0.002).abs() < 1e-12);

        let disjoint = series(&[(7, 1.0)]);
        assert_eq!(market_turnover(Some(&disjoint), Some(&load)), 0.0);
        assert_eq!(market_turnover(None, Some(&load)), 0.0);
    }

    proptest! {
        #[test]
        fn renewable_share_stays_in_range(
            values in prop::collection::vec(0.0..10_000.0_f64, 0..12),
        ) {
            let names = ["Solar", "Wind", "Coal", "Gas", "Nuclear", "Hydro"];
            let mix: BTreeMap<String, f64> = values
                .iter()
                .enumerate()
                .map(|(i, v)| (format!("{} {i}", names[i % names.len()]), *v))
                .collect();
            let matchers = RenewableMatchers::new(["Solar", "Wind", "Hydro"]);

            let share = renewable_share(&mix, &matchers);
            prop_assert!((0.0..=100.0).contains(&share));
            if values.iter().sum::<f64>() == 0.0 {
                prop_assert_eq!(share, 0.0);
            }
        }

        #[test]
        fn period_change_is_idempotent(
            values in prop::collection::vec(-500.0..500.0_f64, 1..48),
            window in 1i64..30,
        ) {
            let points: Vec<(i64, f64)> = values
                .iter()
                .enumerate()
                .map(|(h, v)| (h as i64, *v))
                .collect();
            let prices = series(&points);

            prop_assert_eq!(period_change(&prices, window), period_change(&prices, window));
        }
    }
}
