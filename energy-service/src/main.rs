use anyhow::{Context, Result};
use energy_client::{analytics::CityAnalyzer, db};
use energy_service::{
    api::{self, AppState},
    config::AppConfig,
    metrics_server,
    observability,
};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let cfg = AppConfig::load()?;

    if let Some(metrics_cfg) = &cfg.metrics {
        metrics_server::init(&metrics_cfg.bind_addr)?;
    }

    let api_cfg = cfg
        .api
        .as_ref()
        .context("the [api] section is required to run the service")?;

    let pool = db::connect(
        &cfg.database.uri,
        cfg.database.max_connections,
        cfg.database.create_if_missing,
    )
    .await
    .with_context(|| format!("failed to open database '{}'", cfg.database.uri))?;
    db::ensure_schema(&pool).await?;

    let cities = db::list_cities(&pool).await?;
    if cities.is_empty() {
        tracing::warn!("no readings stored yet; run load_readings first");
    } else {
        tracing::info!(cities = cities.len(), "readings available");
    }

    let state = Arc::new(AppState::new(pool, CityAnalyzer::new(cfg.analysis)));
    api::serve(&api_cfg.bind_addr, state).await
}
