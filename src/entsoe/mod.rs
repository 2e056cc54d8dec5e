pub(crate) mod areas;
pub(crate) mod psr;
mod source;

#[cfg(test)]
pub(crate) use source::testing;
pub use source::MarketDataSource;

use std::collections::{BTreeMap, HashMap};
use std::io::{Cursor, Read};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde::de::IgnoredAny;
use thiserror::Error;
use tracing::debug;
use zip::ZipArchive;

use crate::entsoe::areas::ZoneDescriptor;
use crate::field::Absence;
use crate::generation::{ColumnLabel, RawTable};
use crate::series::RawSeries;

const BASE_URL: &str = "https://web-api.tp.entsoe.eu/api";
const ZIP_MAGIC: &[u8] = b"PK\x03\x04";

#[derive(Error, Debug)]
pub enum SourceError {
    /// Built through `request_error`, so the message never holds the query URL
    #[error("HTTP request failed: {0}")]
    Request(reqwest::Error),
    #[error("XML parsing failed: {0}")]
    XmlParsing(#[from] quick_xml::DeError),
    #[error("Archive unpacking failed: {0}")]
    Archive(#[from] zip::result::ZipError),
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Invalid resolution format: {0}")]
    InvalidResolution(String),
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),
    #[error("No matching data for the requested period")]
    NoData,
    #[error("Zone not supported: {0}")]
    UnsupportedZone(String),
    #[error("Security token rejected")]
    Unauthorized,
    #[error("Rate limit exceeded")]
    RateLimited,
}

/// The request URL carries the security token
fn request_error(err: reqwest::Error) -> SourceError {
    SourceError::Request(err.without_url())
}

impl SourceError {
    pub fn absence(&self) -> Absence {
        match self {
            SourceError::NoData => Absence::NoData,
            SourceError::Unauthorized | SourceError::UnsupportedZone(_) => {
                Absence::Fatal(self.to_string())
            }
            _ => Absence::Transient(self.to_string()),
        }
    }
}

/// Body shared by GL, Publication and Balancing market documents; only the
/// parts the client reads are mapped.
#[derive(Debug, Default, Deserialize)]
pub struct MarketDocument {
    #[serde(rename = "TimeSeries", default)]
    pub time_series: Vec<TimeSeries>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TimeInterval {
    pub start: String,
    pub end: String,
}

#[derive(Debug, Deserialize)]
pub struct TimeSeries {
    #[serde(rename = "inBiddingZone_Domain.mRID", default)]
    pub in_bidding_zone: Option<IgnoredAny>,
    #[serde(rename = "outBiddingZone_Domain.mRID", default)]
    pub out_bidding_zone: Option<IgnoredAny>,
    #[serde(rename = "MktPSRType", default)]
    pub psr_type: Option<MktPsrType>,
    #[serde(rename = "flowDirection.direction", default)]
    pub flow_direction: Option<String>,
    #[serde(rename = "curveType", default)]
    pub curve_type: Option<String>,
    #[serde(rename = "Period", default)]
    pub periods: Vec<Period>,
}

#[derive(Debug, Deserialize)]
pub struct MktPsrType {
    #[serde(rename = "psrType")]
    pub psr_type: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Period {
    #[serde(rename = "timeInterval")]
    pub time_interval: TimeInterval,
    pub resolution: String,
    #[serde(rename = "Point", default)]
    pub points: Vec<Point>,
}

/// The value element depends on the document type
#[derive(Debug, Deserialize, Clone)]
pub struct Point {
    pub position: u32,
    #[serde(default)]
    pub quantity: Option<f64>,
    #[serde(rename = "price.amount", default)]
    pub price: Option<f64>,
    #[serde(rename = "imbalance_Price.amount", default)]
    pub imbalance_price: Option<f64>,
}

impl Point {
    fn value(&self) -> Option<f64> {
        self.price.or(self.imbalance_price).or(self.quantity)
    }
}

/// Represents a time series point with its actual timestamp
#[derive(Debug, Clone)]
pub struct TimestampedPoint {
    pub timestamp: DateTime<Utc>,
    pub quantity: f64,
}

pub struct EntsoeClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl EntsoeClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: BASE_URL.to_string(),
        }
    }

    #[cfg(test)]
    fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Day-ahead prices (A44)
    pub async fn fetch_day_ahead_prices(
        &self,
        zone: &ZoneDescriptor,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<MarketDocument, SourceError> {
        let params = format!(
            "documentType=A44&in_Domain={eic}&out_Domain={eic}",
            eic = zone.eic
        );
        self.fetch_and_parse(&params, start, end).await
    }

    /// Actual total load (A65, realised)
    pub async fn fetch_actual_load(
        &self,
        zone: &ZoneDescriptor,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<MarketDocument, SourceError> {
        let params = format!(
            "documentType=A65&processType=A16&outBiddingZone_Domain={}",
            zone.eic
        );
        self.fetch_and_parse(&params, start, end).await
    }

    /// Actual generation per production type (A75)
    pub async fn fetch_generation_per_type(
        &self,
        zone: &ZoneDescriptor,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<MarketDocument, SourceError> {
        let params = format!("documentType=A75&processType=A16&in_Domain={}", zone.eic);
        self.fetch_and_parse(&params, start, end).await
    }

    /// Imbalance prices (A85)
    pub async fn fetch_imbalance_prices(
        &self,
        zone: &ZoneDescriptor,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<MarketDocument, SourceError> {
        let params = format!("documentType=A85&controlArea_Domain={}", zone.eic);
        self.fetch_and_parse(&params, start, end).await
    }

    /// Total imbalance volumes (A86)
    pub async fn fetch_imbalance_volumes(
        &self,
        zone: &ZoneDescriptor,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<MarketDocument, SourceError> {
        let params = format!("documentType=A86&controlArea_Domain={}", zone.eic);
        self.fetch_and_parse(&params, start, end).await
    }

    async fn fetch_and_parse(
        &self,
        params: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<MarketDocument, SourceError> {
        let (period_start, period_end) = format_period(start, end);
        let url = format!(
            "{}?securityToken={}&{}&periodStart={}&periodEnd={}",
            self.base_url, self.api_key, params, period_start, period_end
        );
        debug!(%params, %period_start, %period_end, "querying ENTSO-E");

        let response = self.client.get(&url).send().await.map_err(request_error)?;
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(SourceError::Unauthorized);
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(SourceError::RateLimited);
        }

        let body = response.bytes().await.map_err(request_error)?;
        if !status.is_success() && !is_acknowledgement(&String::from_utf8_lossy(&body)) {
            return Err(SourceError::InvalidResponse(format!("HTTP {status}")));
        }
        parse_body(&body)
    }
}

#[async_trait]
impl MarketDataSource for EntsoeClient {
    async fn day_ahead_prices(
        &self,
        zone: &ZoneDescriptor,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<RawSeries, SourceError> {
        let document = self.fetch_day_ahead_prices(zone, start, end).await?;
        Ok(document.points_in_order()?.into_iter().collect())
    }

    async fn load(
        &self,
        zone: &ZoneDescriptor,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<RawSeries, SourceError> {
        let document = self.fetch_actual_load(zone, start, end).await?;
        Ok(document.all_points()?.into_iter().collect())
    }

    async fn imbalance_prices(
        &self,
        zone: &ZoneDescriptor,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<RawSeries, SourceError> {
        let document = self.fetch_imbalance_prices(zone, start, end).await?;
        Ok(document.points_in_order()?.into_iter().collect())
    }

    async fn imbalance_volumes(
        &self,
        zone: &ZoneDescriptor,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<RawSeries, SourceError> {
        let document = self.fetch_imbalance_volumes(zone, start, end).await?;
        Ok(document.all_points()?.into_iter().collect())
    }

    async fn generation(
        &self,
        zone: &ZoneDescriptor,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<RawTable, SourceError> {
        let document = self.fetch_generation_per_type(zone, start, end).await?;
        Ok(RawTable::from_points(document.generation_columns()?))
    }
}

fn is_acknowledgement(xml: &str) -> bool {
    xml.contains("Acknowledgement_MarketDocument")
}

/// Imbalance queries answer with a ZIP archive of documents, everything else
/// with a single XML document.
fn parse_body(body: &[u8]) -> Result<MarketDocument, SourceError> {
    if body.starts_with(ZIP_MAGIC) {
        return parse_archive(body);
    }
    let xml = std::str::from_utf8(body)
        .map_err(|e| SourceError::InvalidResponse(format!("body is not UTF-8: {e}")))?;
    parse_document(xml)
}

/// Merges the time series of every document in the archive. Entries that are
/// "no data" acknowledgements are skipped.
fn parse_archive(body: &[u8]) -> Result<MarketDocument, SourceError> {
    let mut archive = ZipArchive::new(Cursor::new(body))?;
    let mut merged = MarketDocument::default();

    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        let mut xml = String::new();
        entry.read_to_string(&mut xml).map_err(|e| {
            SourceError::InvalidResponse(format!("unreadable archive entry {}: {e}", entry.name()))
        })?;
        match parse_document(&xml) {
            Ok(document) => merged.time_series.extend(document.time_series),
            Err(SourceError::NoData) => continue,
            Err(e) => return Err(e),
        }
    }

    if merged.time_series.is_empty() {
        return Err(SourceError::NoData);
    }
    debug!(
        entries = archive.len(),
        series = merged.time_series.len(),
        "unpacked archive"
    );
    Ok(merged)
}

fn parse_document(xml: &str) -> Result<MarketDocument, SourceError> {
    if is_acknowledgement(xml) {
        if xml.contains("No matching data") {
            return Err(SourceError::NoData);
        }
        let reason = acknowledgement_reason(xml);
        if reason.contains("is not valid") {
            return Err(SourceError::UnsupportedZone(reason));
        }
        return Err(SourceError::InvalidResponse(reason));
    }

    let document: MarketDocument = quick_xml::de::from_str(xml).inspect_err(|e| {
        debug!(error = %e, "failed to parse ENTSO-E document");
    })?;
    Ok(document)
}

fn acknowledgement_reason(xml: &str) -> String {
    xml.split_once("<text>")
        .and_then(|(_, rest)| rest.split_once("</text>"))
        .map(|(text, _)| text.trim().to_string())
        .unwrap_or_else(|| "acknowledgement without reason".to_string())
}

/// Format period times for ENTSO-E API (YYYYMMDDHHmm)
fn format_period(start: DateTime<Utc>, end: DateTime<Utc>) -> (String, String) {
    (
        start.format("%Y%m%d%H%M").to_string(),
        end.format("%Y%m%d%H%M").to_string(),
    )
}

/// Parse ISO 8601 duration format (PT15M, PT30M, PT60M, etc.)
fn parse_resolution(resolution: &str) -> Result<Duration, SourceError> {
    // Format: PT[n]M where n is minutes
    if !resolution.starts_with("PT") || !resolution.ends_with("M") {
        return Err(SourceError::InvalidResolution(resolution.to_string()));
    }

    let minutes_str = &resolution[2..resolution.len() - 1];
    let minutes: i64 = minutes_str
        .parse()
        .map_err(|_| SourceError::InvalidResolution(resolution.to_string()))?;
    if minutes <= 0 {
        return Err(SourceError::InvalidResolution(resolution.to_string()));
    }

    Ok(Duration::minutes(minutes))
}

fn parse_timestamp(timestamp: &str) -> Result<DateTime<Utc>, SourceError> {
    let normalized = if timestamp.len() == 17 && timestamp.ends_with('Z') {
        let mut s = timestamp.to_string();
        s.insert_str(16, ":00"); // add seconds
        s
    } else {
        timestamp.to_string()
    };

    DateTime::parse_from_rfc3339(&normalized)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| SourceError::InvalidTimestamp(timestamp.to_string()))
}

/// Curve type A03 omits a point when its value repeats the previous one; the
/// gaps are filled forward up to the end of the period.
fn expand_compressed(points: &[(u32, f64)], slots: u32) -> Vec<(u32, f64)> {
    let last_position = points.last().map_or(0, |(position, _)| *position);
    let mut expanded = Vec::with_capacity(slots as usize);
    let mut pending = points.iter().peekable();
    let mut current = None;

    for position in 1..=slots.max(last_position) {
        while let Some(&&(next, value)) = pending.peek() {
            if next > position {
                break;
            }
            current = Some(value);
            pending.next();
        }
        if let Some(value) = current {
            expanded.push((position, value));
        }
    }
    expanded
}

impl Period {
    /// Get all points with their actual timestamps based on resolution
    pub fn timestamped_points(
        &self,
        curve_type: Option<&str>,
    ) -> Result<Vec<TimestampedPoint>, SourceError> {
        let start_time = parse_timestamp(&self.time_interval.start)?;
        let resolution_duration = parse_resolution(&self.resolution)?;

        let mut values: Vec<(u32, f64)> = self
            .points
            .iter()
            .filter_map(|point| point.value().map(|v| (point.position, v)))
            .collect();
        values.sort_by_key(|(position, _)| *position);

        if curve_type == Some("A03") {
            let end_time = parse_timestamp(&self.time_interval.end)?;
            let slots = (end_time - start_time).num_minutes() / resolution_duration.num_minutes();
            values = expand_compressed(&values, slots.max(0) as u32);
        }

        let timestamped = values
            .into_iter()
            .map(|(position, quantity)| {
                // Position starts at 1, so subtract 1 to get offset
                let offset = resolution_duration * (position as i32 - 1);
                TimestampedPoint {
                    timestamp: start_time + offset,
                    quantity,
                }
            })
            .collect();

        Ok(timestamped)
    }
}

impl TimeSeries {
    /// Down-regulation volumes count negative
    fn sign(&self) -> f64 {
        match self.flow_direction.as_deref() {
            Some("A02") => -1.0,
            _ => 1.0,
        }
    }

    fn timestamped_points(&self) -> Result<Vec<TimestampedPoint>, SourceError> {
        let mut points = Vec::new();
        for period in &self.periods {
            points.extend(period.timestamped_points(self.curve_type.as_deref())?);
        }
        Ok(points)
    }

    /// Pumping or charging, reported against the out-zone only
    fn is_consumption(&self) -> bool {
        self.out_bidding_zone.is_some() && self.in_bidding_zone.is_none()
    }

    /// Generation series report output, consumption series report pumping/charging.
    /// The attribute level is only carried when the document has both kinds.
    fn generation_label(&self, two_level: bool) -> Option<ColumnLabel> {
        let code = &self.psr_type.as_ref()?.psr_type;
        let technology = psr::technology(code).unwrap_or(code.as_str()).to_string();
        if !two_level {
            return Some(ColumnLabel::Single(technology));
        }
        let attribute = if self.is_consumption() {
            "Actual Consumption"
        } else {
            "Actual Aggregated"
        };
        Some(ColumnLabel::Pair(technology, attribute.to_string()))
    }
}

// Helper functions to work with the data
impl MarketDocument {
    /// All points across all time series in document order, duplicates kept
    pub fn points_in_order(&self) -> Result<Vec<(DateTime<Utc>, f64)>, SourceError> {
        let mut points = Vec::new();
        for series in &self.time_series {
            points.extend(
                series
                    .timestamped_points()?
                    .into_iter()
                    .map(|tp| (tp.timestamp, tp.quantity)),
            );
        }
        Ok(points)
    }

    /// Get all timestamped points across all time series, summed per timestamp
    pub fn all_timestamped_points(&self) -> Result<Vec<TimestampedPoint>, SourceError> {
        let mut timestamp_map: HashMap<DateTime<Utc>, f64> = HashMap::new();

        for series in &self.time_series {
            let sign = series.sign();
            for point in series.timestamped_points()? {
                *timestamp_map.entry(point.timestamp).or_insert(0.0) += sign * point.quantity;
            }
        }

        let mut result: Vec<TimestampedPoint> = timestamp_map
            .into_iter()
            .map(|(timestamp, quantity)| TimestampedPoint {
                timestamp,
                quantity,
            })
            .collect();

        result.sort_by_key(|p| p.timestamp);
        Ok(result)
    }

    /// Get all points flattened (timestamp, quantity)
    pub fn all_points(&self) -> Result<Vec<(DateTime<Utc>, f64)>, SourceError> {
        let timestamped = self.all_timestamped_points()?;

        Ok(timestamped
            .into_iter()
            .map(|tp| (tp.timestamp, tp.quantity))
            .collect())
    }

    /// One column per (technology, output/consumption); repeated series of the
    /// same label are merged, later points replacing earlier ones.
    pub fn generation_columns(
        &self,
    ) -> Result<Vec<(ColumnLabel, Vec<(DateTime<Utc>, f64)>)>, SourceError> {
        let mut columns: Vec<(ColumnLabel, BTreeMap<DateTime<Utc>, f64>)> = Vec::new();
        let two_level = self.time_series.iter().any(TimeSeries::is_consumption);

        for series in &self.time_series {
            let Some(label) = series.generation_label(two_level) else {
                continue;
            };
            let points = series.timestamped_points()?;
            let index = match columns.iter().position(|(existing, _)| *existing == label) {
                Some(index) => index,
                None => {
                    columns.push((label, BTreeMap::new()));
                    columns.len() - 1
                }
            };
            for point in points {
                columns[index].1.insert(point.timestamp, point.quantity);
            }
        }

        Ok(columns
            .into_iter()
            .map(|(label, points)| (label, points.into_iter().collect()))
            .collect())
    }
}
