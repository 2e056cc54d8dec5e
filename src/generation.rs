//! Flattening of per-technology generation tables into display categories.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use crate::series::{RawTimestamp, TimeSeries, align_index};

/// Column label of a raw generation table
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnLabel {
    Single(String),
    /// (technology, sub-attribute such as "Actual Aggregated")
    Pair(String, String),
}

impl ColumnLabel {
    pub fn technology(&self) -> &str {
        match self {
            ColumnLabel::Single(name) | ColumnLabel::Pair(name, _) => name,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawColumn {
    pub label: ColumnLabel,
    /// One cell per row of the table index
    pub values: Vec<Option<f64>>,
}

/// Time-indexed table as delivered by a source; the index may hold duplicates
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawTable {
    pub index: Vec<RawTimestamp>,
    pub columns: Vec<RawColumn>,
}

impl RawTable {
    pub fn is_empty(&self) -> bool {
        self.index.is_empty() || self.columns.is_empty()
    }

    /// Builds a table over the union of all column timestamps
    pub fn from_points(columns: Vec<(ColumnLabel, Vec<(DateTime<Utc>, f64)>)>) -> Self {
        let index: Vec<DateTime<Utc>> = columns
            .iter()
            .flat_map(|(_, points)| points.iter().map(|(ts, _)| *ts))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let row_of: HashMap<DateTime<Utc>, usize> =
            index.iter().enumerate().map(|(row, ts)| (*ts, row)).collect();

        let columns = columns
            .into_iter()
            .map(|(label, points)| {
                let mut values = vec![None; index.len()];
                for (ts, value) in points {
                    values[row_of[&ts]] = Some(value);
                }
                RawColumn { label, values }
            })
            .collect();

        Self {
            index: index.into_iter().map(RawTimestamp::from).collect(),
            columns,
        }
    }
}

/// Upstream technology identifier -> display name. Several identifiers may
/// share one display name, their columns are then summed.
#[derive(Debug, Clone, PartialEq)]
pub struct DisplayNames {
    names: HashMap<String, String>,
}

impl DisplayNames {
    pub fn new<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            names: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Keeps every upstream name as is
    #[cfg(test)]
    pub fn identity() -> Self {
        Self {
            names: HashMap::new(),
        }
    }

    pub fn display<'a>(&'a self, technology: &'a str) -> &'a str {
        self.names
            .get(technology)
            .map(String::as_str)
            .unwrap_or(technology)
    }
}

impl Default for DisplayNames {
    fn default() -> Self {
        Self::new([
            ("Biomass", "Біомаса"),
            ("Fossil Brown coal/Lignite", "Буре вугілля"),
            ("Fossil Coal-derived gas", "Вугільний газ"),
            ("Fossil Gas", "Газ"),
            ("Fossil Hard coal", "Вугілля"),
            ("Fossil Oil", "Нафта"),
            ("Fossil Oil shale", "Горючі сланці"),
            ("Fossil Peat", "Торф"),
            ("Geothermal", "Геотермальна"),
            ("Hydro Pumped Storage", "ГАЕС"),
            ("Hydro Run-of-river and poundage", "ГЕС"),
            ("Hydro Water Reservoir", "ГЕС"),
            ("Marine", "Припливна"),
            ("Nuclear", "АЕС"),
            ("Other renewable", "Інші ВДЕ"),
            ("Solar", "Сонце"),
            ("Waste", "Відходи"),
            ("Wind Offshore", "Вітер"),
            ("Wind Onshore", "Вітер"),
            ("Other", "Інше"),
            ("Energy storage", "Накопичувачі"),
        ])
    }
}

/// Display-name -> series, all sharing one time index
#[derive(Debug, Clone, PartialEq)]
pub struct CategorySeries {
    index: Vec<DateTime<Tz>>,
    columns: BTreeMap<String, TimeSeries>,
}

impl CategorySeries {
    pub fn is_empty(&self) -> bool {
        self.index.is_empty() || self.columns.is_empty()
    }

    #[cfg(test)]
    pub fn get(&self, category: &str) -> Option<&TimeSeries> {
        self.columns.get(category)
    }

    /// As-of value of every category at `at`; categories without one are left out
    pub fn snapshot_at(&self, at: DateTime<Tz>) -> BTreeMap<String, f64> {
        self.columns
            .iter()
            .filter_map(|(name, series)| series.asof(at).map(|v| (name.clone(), v)))
            .collect()
    }

    /// Snapshot at the last row of the index
    pub fn latest(&self) -> BTreeMap<String, f64> {
        match self.index.last() {
            Some(last) => self.snapshot_at(*last),
            None => BTreeMap::new(),
        }
    }
}

/// Collapses a raw generation table into display categories.
///
/// Two-level labels lose their sub-attribute, labels are translated through
/// `names`, and columns landing on the same display name are summed per
/// timestamp. A cell stays missing only if every contributor is missing.
pub fn aggregate(raw: &RawTable, tz: Tz, names: &DisplayNames) -> CategorySeries {
    let aligned = align_index(&raw.index, tz);
    let mut merged: BTreeMap<String, Vec<Option<f64>>> = BTreeMap::new();

    for column in &raw.columns {
        let name = names.display(column.label.technology()).to_string();
        let sums = merged
            .entry(name)
            .or_insert_with(|| vec![None; aligned.len()]);

        for (slot, (_, row)) in sums.iter_mut().zip(&aligned) {
            let cell = column
                .values
                .get(*row)
                .copied()
                .flatten()
                .filter(|v| v.is_finite());
            if let Some(value) = cell {
                *slot = Some(slot.unwrap_or(0.0) + value);
            }
        }
    }

    let index: Vec<DateTime<Tz>> = aligned.iter().map(|(ts, _)| *ts).collect();
    let columns = merged
        .into_iter()
        .map(|(name, values)| {
            let points = index.iter().copied().zip(values).collect();
            (name, TimeSeries::from_sorted(tz, points))
        })
        .collect();

    CategorySeries { index, columns }
}
