use axum::{
    Router,
    extract::{Path, State},
    response::Json,
    routing::{get, post},
};
use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use http::{HeaderMap, StatusCode};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

use crate::comparison::ComparisonFetcher;
use crate::config::Config;
use crate::entsoe::areas::{self, ZoneDescriptor};
use crate::entsoe::{EntsoeClient, MarketDataSource, SourceError};
use crate::generation::DisplayNames;
use crate::metrics::RenewableMatchers;
use crate::metrics::snapshot::MetricsView;
use crate::series::normalize;

/// Header carrying the shared access secret
pub const ACCESS_KEY_HEADER: &str = "x-access-key";

#[derive(Clone)]
pub struct AppState {
    source: Arc<dyn MarketDataSource>,
    fetcher: Arc<ComparisonFetcher>,
    matchers: Arc<RenewableMatchers>,
    access_secret: Arc<str>,
    tz: Tz,
}

impl AppState {
    pub fn new(source: Arc<dyn MarketDataSource>, config: &Config) -> Self {
        let names = DisplayNames::default();
        let matchers =
            RenewableMatchers::from_technologies(&config.renewable_technologies, &names);
        let fetcher = ComparisonFetcher::new(source.clone(), config.timezone, names)
            .with_ttls(config.live_ttl, config.comparison_ttl);

        Self {
            source,
            fetcher: Arc::new(fetcher),
            matchers: Arc::new(matchers),
            access_secret: Arc::from(config.access_secret.as_str()),
            tz: config.timezone,
        }
    }
}

#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
        }
    }
}

#[derive(Serialize)]
struct SpotPriceResponse {
    zone: &'static str,
    current_spot_price: f64,
    timestamp: String,
    status: &'static str,
}

/// Byte comparison whose duration does not depend on where the inputs differ
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), StatusCode> {
    let provided = headers
        .get(ACCESS_KEY_HEADER)
        .map(|value| value.as_bytes())
        .unwrap_or_default();

    if constant_time_eq(provided, state.access_secret.as_bytes()) {
        Ok(())
    } else {
        warn!("rejected request with missing or wrong access key");
        Err(StatusCode::UNAUTHORIZED)
    }
}

fn zone_or_bad_request(code: &str) -> Result<&'static ZoneDescriptor, StatusCode> {
    areas::lookup(code).ok_or_else(|| {
        warn!(zone = code, "unknown zone requested");
        StatusCode::BAD_REQUEST
    })
}

/// GET /api/market/:zone
/// Day-ahead price in effect right now
async fn get_spot_price(
    State(state): State<AppState>,
    Path(zone_code): Path<String>,
) -> Result<Json<SpotPriceResponse>, StatusCode> {
    let zone = zone_or_bad_request(&zone_code)?;
    let now = Utc::now().with_timezone(&state.tz);
    spot_price(&state, zone, now).await.map(Json)
}

async fn spot_price(
    state: &AppState,
    zone: &'static ZoneDescriptor,
    now: DateTime<Tz>,
) -> Result<SpotPriceResponse, StatusCode> {
    let start = (now - Duration::hours(24)).with_timezone(&Utc);
    let end = (now + Duration::hours(24)).with_timezone(&Utc);

    let price = match state.source.day_ahead_prices(zone, start, end).await {
        Ok(raw) => normalize(&raw, state.tz).asof(now),
        Err(SourceError::NoData) => None,
        Err(e) => {
            error!(zone = zone.code, error = %e, "spot price fetch failed");
            return Err(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };

    let (current_spot_price, status) = match price {
        Some(price) => ((price * 100.0).round() / 100.0, "success"),
        None => (0.0, "no_data"),
    };

    Ok(SpotPriceResponse {
        zone: zone.code,
        current_spot_price,
        timestamp: now.format("%Y-%m-%d %H:%M:%S").to_string(),
        status,
    })
}

/// GET /api/v1/zones
/// List all supported bidding zones
async fn list_zones() -> Json<ApiResponse<Vec<&'static ZoneDescriptor>>> {
    Json(ApiResponse::success(areas::list_zones()))
}

/// GET /api/v1/dashboard/:zone
/// Live metrics next to yesterday and the same day last year
async fn get_dashboard(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(zone_code): Path<String>,
) -> Result<Json<ApiResponse<MetricsView>>, StatusCode> {
    authorize(&state, &headers)?;
    let zone = zone_or_bad_request(&zone_code)?;

    let windows = state.fetcher.fetch_comparison_windows(zone).await;
    let now = state.fetcher.now();

    match MetricsView::build(zone, &windows, &state.matchers, now) {
        Some(view) => Ok(Json(ApiResponse::success(view))),
        None => Ok(Json(ApiResponse::error(format!(
            "No day-ahead prices available for {}",
            zone
        )))),
    }
}

/// POST /api/v1/cache/invalidate
/// Forces the next dashboard request to refetch every window
async fn invalidate_cache(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse<&'static str>>, StatusCode> {
    authorize(&state, &headers)?;
    state.fetcher.invalidate().await;
    info!("window cache cleared");
    Ok(Json(ApiResponse::success("cache cleared")))
}

/// GET /health
async fn health() -> &'static str {
    "OK"
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/zones", get(list_zones))
        .route("/api/market/{zone}", get(get_spot_price))
        .route("/api/v1/dashboard/{zone}", get(get_dashboard))
        .route("/api/v1/cache/invalidate", post(invalidate_cache))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn start_server(config: Config) -> anyhow::Result<()> {
    let source: Arc<dyn MarketDataSource> =
        Arc::new(EntsoeClient::new(config.api_key.clone()));
    let app = router(AppState::new(source, &config));

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    info!(addr = %config.bind_addr, timezone = %config.timezone, "server listening");

    axum::serve(listener, app).await?;

    Ok(())
}
