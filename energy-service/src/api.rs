//! Read-only JSON API over the stored readings.
//!
//! Every `/cities/:city/...` route loads the city's series from SQLite,
//! optionally narrows it to one year, and hands it to the [`CityAnalyzer`].
//! Trained regression models are memoized per (city, year) together with a
//! fingerprint of the readings they were fitted on, so a reload of the store
//! invalidates them on the next request.

use std::{collections::HashMap, net::SocketAddr, sync::Arc};

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use energy_client::{
    analytics::{
        AnalysisError, AnomalyReport, CityAnalyzer, CityReport, Decomposition, KpiSummary, Outcome, RegressionModel,
        RegressionSummary, YearProfile,
    },
    db::{self, CityTotal},
    domain::CitySeries,
};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use time::Date;
use tokio::sync::RwLock;

type ModelKey = (String, Option<i32>);

pub struct AppState {
    pool: SqlitePool,
    analyzer: CityAnalyzer,
    models: RwLock<HashMap<ModelKey, (blake3::Hash, RegressionModel)>>,
}

/// Digest of the values a regression is fitted on.
fn fingerprint(series: &CitySeries) -> blake3::Hash {
    let mut hasher = blake3::Hasher::new();
    for r in series.readings() {
        hasher.update(&r.date.to_julian_day().to_le_bytes());
        hasher.update(&r.consumption_mwh.to_le_bytes());
        hasher.update(&r.temperature_c.to_le_bytes());
    }
    hasher.finalize()
}

impl AppState {
    pub fn new(pool: SqlitePool, analyzer: CityAnalyzer) -> Self {
        Self {
            pool,
            analyzer,
            models: RwLock::new(HashMap::new()),
        }
    }

    /// Loads a city's series, 404-ing with the known cities if it has no rows.
    ///
    /// The name is trimmed and matched case-insensitively, so `berlin` and
    /// ` Berlin ` both resolve to the stored `Berlin`.
    async fn city_series(&self, city: &str, year: Option<i32>) -> Result<CitySeries, ApiError> {
        let wanted = city.trim();
        let mut series = db::load_city(&self.pool, wanted).await?;
        if series.is_empty() {
            let valid_cities = db::list_cities(&self.pool).await?;
            let canonical = valid_cities
                .iter()
                .find(|c| c.to_lowercase() == wanted.to_lowercase());
            match canonical {
                Some(name) => series = db::load_city(&self.pool, name).await?,
                None => {
                    return Err(ApiError::UnknownCity {
                        city: wanted.to_string(),
                        valid_cities,
                    })
                }
            }
        }
        Ok(match year {
            Some(y) => series.for_year(y),
            None => series,
        })
    }

    async fn model(&self, series: &CitySeries, year: Option<i32>) -> (RegressionModel, Option<AnalysisError>) {
        let key = (series.city().to_string(), year);
        let digest = fingerprint(series);
        if let Some((cached_digest, model)) = self.models.read().await.get(&key) {
            if *cached_digest == digest {
                return (*model, None);
            }
        }

        let (model, err) = self.analyzer.model(series);
        // Only successful fits are cached; a failure is recomputed with its reason.
        if model.trained().is_some() {
            self.models.write().await.insert(key, (digest, model));
        } else {
            self.models.write().await.remove(&key);
        }
        (model, err)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("unknown city '{city}'")]
    UnknownCity { city: String, valid_cities: Vec<String> },
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Unprocessable(String),
    #[error("database error: {0}")]
    Database(#[from] anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            ApiError::UnknownCity { valid_cities, .. } => (
                StatusCode::NOT_FOUND,
                serde_json::json!({ "error": self.to_string(), "valid_cities": valid_cities }),
            ),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, serde_json::json!({ "error": self.to_string() })),
            ApiError::Unprocessable(_) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                serde_json::json!({ "error": self.to_string() }),
            ),
            ApiError::Database(e) => {
                tracing::error!(error = %e, "api request failed");
                metrics::counter!("api_errors_total").increment(1);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    serde_json::json!({ "error": "internal error" }),
                )
            }
        };
        (status, Json(body)).into_response()
    }
}

fn record(route: &'static str) {
    metrics::counter!("api_requests_total", "route" => route).increment(1);
}

#[derive(Debug, Default, Deserialize)]
pub struct YearParams {
    pub year: Option<i32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ReadingsParams {
    pub year: Option<i32>,
    pub min_temp: Option<f64>,
    pub max_temp: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AnomalyParams {
    pub year: Option<i32>,
    pub threshold: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct PredictParams {
    pub temperature: f64,
    pub year: Option<i32>,
}

#[derive(Debug, Deserialize)]
pub struct TrendParams {
    pub cities: String,
    pub year: Option<i32>,
}

#[derive(Debug, Serialize)]
pub struct RegressionResponse {
    pub city: String,
    pub year: Option<i32>,
    pub model: RegressionModel,
    pub summary: RegressionSummary,
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PredictionResponse {
    pub city: String,
    pub year: Option<i32>,
    pub temperature_c: f64,
    pub predicted_consumption_mwh: f64,
}

#[derive(Debug, Serialize)]
pub struct TrendPoint {
    pub date: Date,
    pub consumption_mwh: f64,
}

#[derive(Debug, Serialize)]
pub struct CityTrend {
    pub city: String,
    pub points: Vec<TrendPoint>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/cities", get(cities))
        .route("/cities/:city/readings", get(readings))
        .route("/cities/:city/kpis", get(kpis))
        .route("/cities/:city/anomalies", get(anomalies))
        .route("/cities/:city/decomposition", get(decomposition))
        .route("/cities/:city/seasonal-profile", get(seasonal_profile))
        .route("/cities/:city/regression", get(regression))
        .route("/cities/:city/predict", get(predict))
        .route("/cities/:city/report", get(report))
        .route("/trend", get(trend))
        .with_state(state)
}

pub async fn serve(bind_addr: &str, state: Arc<AppState>) -> anyhow::Result<()> {
    let addr: SocketAddr = bind_addr
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid api.bind_addr '{bind_addr}': {e}"))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "api listening");
    axum::serve(listener, router(state).into_make_service()).await?;
    Ok(())
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn cities(State(state): State<Arc<AppState>>) -> Result<Json<Vec<CityTotal>>, ApiError> {
    record("cities");
    Ok(Json(db::annual_totals(&state.pool).await?))
}

async fn readings(
    State(state): State<Arc<AppState>>,
    Path(city): Path<String>,
    Query(params): Query<ReadingsParams>,
) -> Result<Json<CitySeries>, ApiError> {
    record("readings");
    let series = state.city_series(&city, params.year).await?;
    if params.min_temp.is_none() && params.max_temp.is_none() {
        return Ok(Json(series));
    }

    let min = params.min_temp.unwrap_or(f64::NEG_INFINITY);
    let max = params.max_temp.unwrap_or(f64::INFINITY);
    if min.is_nan() || max.is_nan() || min > max {
        return Err(ApiError::BadRequest(format!("invalid temperature range [{min}, {max}]")));
    }
    Ok(Json(series.within_temperature(min, max)))
}

async fn kpis(
    State(state): State<Arc<AppState>>,
    Path(city): Path<String>,
    Query(params): Query<YearParams>,
) -> Result<Json<KpiSummary>, ApiError> {
    record("kpis");
    let series = state.city_series(&city, params.year).await?;
    Ok(Json(state.analyzer.kpis(&series)))
}

async fn anomalies(
    State(state): State<Arc<AppState>>,
    Path(city): Path<String>,
    Query(params): Query<AnomalyParams>,
) -> Result<Json<AnomalyReport>, ApiError> {
    record("anomalies");
    if let Some(t) = params.threshold {
        if !(t.is_finite() && t > 0.0) {
            return Err(ApiError::BadRequest(format!("threshold must be positive, got {t}")));
        }
    }
    let series = state.city_series(&city, params.year).await?;
    Ok(Json(state.analyzer.anomalies(&series, params.threshold)))
}

async fn decomposition(
    State(state): State<Arc<AppState>>,
    Path(city): Path<String>,
    Query(params): Query<YearParams>,
) -> Result<Json<Outcome<Decomposition>>, ApiError> {
    record("decomposition");
    let series = state.city_series(&city, params.year).await?;
    Ok(Json(state.analyzer.decomposition(&series).into()))
}

async fn seasonal_profile(
    State(state): State<Arc<AppState>>,
    Path(city): Path<String>,
) -> Result<Json<Outcome<Vec<YearProfile>>>, ApiError> {
    record("seasonal_profile");
    let series = state.city_series(&city, None).await?;
    Ok(Json(state.analyzer.seasonal_profile(&series).into()))
}

async fn regression(
    State(state): State<Arc<AppState>>,
    Path(city): Path<String>,
    Query(params): Query<YearParams>,
) -> Result<Json<RegressionResponse>, ApiError> {
    record("regression");
    let series = state.city_series(&city, params.year).await?;
    let (model, err) = state.model(&series, params.year).await;
    Ok(Json(RegressionResponse {
        city: series.city().to_string(),
        year: params.year,
        summary: model.summarize(),
        model,
        error: err.map(|e| e.to_string()),
    }))
}

async fn predict(
    State(state): State<Arc<AppState>>,
    Path(city): Path<String>,
    Query(params): Query<PredictParams>,
) -> Result<Json<PredictionResponse>, ApiError> {
    record("predict");
    if !params.temperature.is_finite() {
        return Err(ApiError::BadRequest("temperature must be a finite number".to_string()));
    }
    let series = state.city_series(&city, params.year).await?;
    let (model, err) = state.model(&series, params.year).await;

    match model.predict(params.temperature) {
        Some(predicted) => Ok(Json(PredictionResponse {
            city: series.city().to_string(),
            year: params.year,
            temperature_c: params.temperature,
            predicted_consumption_mwh: predicted,
        })),
        None => Err(ApiError::Unprocessable(
            err.map(|e| e.to_string())
                .unwrap_or_else(|| "model is not trained".to_string()),
        )),
    }
}

async fn report(
    State(state): State<Arc<AppState>>,
    Path(city): Path<String>,
    Query(params): Query<YearParams>,
) -> Result<Json<CityReport>, ApiError> {
    record("report");
    let series = state.city_series(&city, params.year).await?;
    Ok(Json(state.analyzer.analyze(&series)))
}

async fn trend(
    State(state): State<Arc<AppState>>,
    Query(params): Query<TrendParams>,
) -> Result<Json<Vec<CityTrend>>, ApiError> {
    record("trend");
    let names: Vec<&str> = params
        .cities
        .split(',')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .collect();
    if names.is_empty() {
        return Err(ApiError::BadRequest("at least one city is required".to_string()));
    }

    let mut out = Vec::with_capacity(names.len());
    for name in names {
        let series = state.city_series(name, params.year).await?;
        out.push(CityTrend {
            city: series.city().to_string(),
            points: series
                .readings()
                .iter()
                .map(|r| TrendPoint {
                    date: r.date,
                    consumption_mwh: r.consumption_mwh,
                })
                .collect(),
        });
    }
    Ok(Json(out))
}
