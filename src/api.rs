use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use crate::db::{self, StoredPrice};
use crate::markets::{load_markets, nearby};

const MARKET_LIMIT: usize = 100;
const NEARBY_LIMIT: usize = 200;
const DEFAULT_RADIUS_KM: f64 = 50.0;

#[derive(Clone)]
pub struct AppState {
    db_path: Arc<PathBuf>,
    markets_path: Arc<PathBuf>,
}

impl AppState {
    pub fn new(db_path: PathBuf, markets_path: PathBuf) -> Self {
        AppState {
            db_path: Arc::new(db_path),
            markets_path: Arc::new(markets_path),
        }
    }
}

#[derive(Debug)]
enum ApiError {
    BadRequest(&'static str),
    DbMissing,
    Internal(anyhow::Error),
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        ApiError::Internal(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, msg) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.to_string()),
            ApiError::DbMissing => (StatusCode::INTERNAL_SERVER_ERROR, "DB not found".to_string()),
            ApiError::Internal(e) => {
                error!("Request failed: {:#}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
        };
        (status, Json(json!({ "error": msg }))).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/api/markets", get(list_markets))
        .route("/api/market/:market_id/latest", get(market_latest))
        .route("/api/prices", get(prices))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn serve(addr: &str, state: AppState) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("API listening on http://{}", listener.local_addr()?);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

/// Latest rows for each market id, read on a blocking thread.
async fn latest_rows(
    state: &AppState,
    market_ids: Vec<String>,
    limit: usize,
) -> Result<Vec<Vec<StoredPrice>>, ApiError> {
    if !state.db_path.exists() {
        return Err(ApiError::DbMissing);
    }
    let path = Arc::clone(&state.db_path);
    let rows = tokio::task::spawn_blocking(move || -> Result<Vec<Vec<StoredPrice>>> {
        let conn = db::connect(&path)?;
        market_ids
            .iter()
            .map(|id| db::fetch_latest(&conn, id, limit))
            .collect()
    })
    .await
    .map_err(anyhow::Error::from)??;
    Ok(rows)
}

async fn list_markets(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "markets": load_markets(&state.markets_path) }))
}

async fn market_latest(
    State(state): State<AppState>,
    Path(market_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    single_market(&state, market_id).await
}

async fn single_market(state: &AppState, market_id: String) -> Result<Json<Value>, ApiError> {
    let mut rows = latest_rows(state, vec![market_id.clone()], MARKET_LIMIT).await?;
    let data = rows.pop().unwrap_or_default();
    Ok(Json(json!({ "market_id": market_id, "data": data })))
}

#[derive(Debug, Deserialize)]
struct PricesQuery {
    market_id: Option<String>,
    lat: Option<String>,
    lon: Option<String>,
    radius_km: Option<String>,
}

fn parse_coord(value: &str) -> Option<f64> {
    value.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

async fn prices(
    State(state): State<AppState>,
    Query(q): Query<PricesQuery>,
) -> Result<Json<Value>, ApiError> {
    if let Some(market_id) = q.market_id.filter(|m| !m.is_empty()) {
        return single_market(&state, market_id).await;
    }

    let (Some(lat), Some(lon)) = (q.lat.as_deref(), q.lon.as_deref()) else {
        return Err(ApiError::BadRequest("provide market_id or lat & lon"));
    };
    let (Some(lat), Some(lon)) = (parse_coord(lat), parse_coord(lon)) else {
        return Err(ApiError::BadRequest("invalid lat/lon"));
    };
    let radius = match q.radius_km.as_deref() {
        None => DEFAULT_RADIUS_KM,
        Some(r) => parse_coord(r).ok_or(ApiError::BadRequest("invalid radius_km"))?,
    };

    let markets = nearby(&load_markets(&state.markets_path), lat, lon, radius);
    let ids = markets.iter().map(|m| m.id.clone()).collect();
    let rows = latest_rows(&state, ids, NEARBY_LIMIT).await?;

    let nearby: Vec<Value> = markets
        .iter()
        .zip(rows)
        .map(|(market, data)| json!({ "market": market, "data": data }))
        .collect();
    Ok(Json(json!({ "nearby": nearby })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::PriceRecord;

    fn record(market: &str, product: &str) -> PriceRecord {
        PriceRecord {
            market_id: market.into(),
            market_name: market.into(),
            product: product.into(),
            category: "Sebze".into(),
            price_min: Some(10.0),
            price_max: Some(12.0),
            unit: "KG".into(),
            date_scraped: "2024-01-01".into(),
            source_file: "t.csv".into(),
            inserted_at: 0,
        }
    }

    /// Serve the router on an ephemeral port; returns the base URL.
    async fn spawn(state: AppState) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(state)).await.unwrap();
        });
        format!("http://{}", addr)
    }

    async fn seeded() -> (tempfile::TempDir, String) {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("prices.sqlite");
        let conn = db::connect(&db_path).unwrap();
        db::init_schema(&conn).unwrap();
        db::upsert_prices(
            &conn,
            &[record("kumluca_market", "Domates"), record("izmir_market", "Elma")],
        )
        .unwrap();
        let state = AppState::new(db_path, dir.path().join("no_markets.json"));
        let base = spawn(state).await;
        (dir, base)
    }

    async fn get_json(url: &str) -> (u16, Value) {
        let resp = reqwest::get(url).await.unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap())
    }

    #[tokio::test]
    async fn lists_default_markets() {
        let (_dir, base) = seeded().await;
        let (status, body) = get_json(&format!("{}/api/markets", base)).await;
        assert_eq!(status, 200);
        assert_eq!(body["markets"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn latest_for_market() {
        let (_dir, base) = seeded().await;
        let (status, body) = get_json(&format!("{}/api/market/kumluca_market/latest", base)).await;
        assert_eq!(status, 200);
        assert_eq!(body["market_id"], "kumluca_market");
        assert_eq!(body["data"][0]["product"], "Domates");
    }

    #[tokio::test]
    async fn prices_near_point() {
        let (_dir, base) = seeded().await;
        let url = format!("{}/api/prices?lat=36.3&lon=30.4&radius_km=20", base);
        let (status, body) = get_json(&url).await;
        assert_eq!(status, 200);
        let nearby = body["nearby"].as_array().unwrap();
        assert_eq!(nearby.len(), 1);
        assert_eq!(nearby[0]["market"]["id"], "kumluca_market");
        assert_eq!(nearby[0]["data"][0]["product"], "Domates");
    }

    #[tokio::test]
    async fn bad_requests() {
        let (_dir, base) = seeded().await;
        let (status, _) = get_json(&format!("{}/api/prices", base)).await;
        assert_eq!(status, 400);
        let (status, body) = get_json(&format!("{}/api/prices?lat=abc&lon=1", base)).await;
        assert_eq!(status, 400);
        assert_eq!(body["error"], "invalid lat/lon");
    }

    #[tokio::test]
    async fn missing_database_is_server_error() {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::new(dir.path().join("absent.sqlite"), dir.path().join("m.json"));
        let base = spawn(state).await;
        let (status, body) = get_json(&format!("{}/api/market/x/latest", base)).await;
        assert_eq!(status, 500);
        assert_eq!(body["error"], "DB not found");
    }
}
