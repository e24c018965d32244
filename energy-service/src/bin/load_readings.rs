use anyhow::{bail, Result};
use energy_client::{db, domain::Reading};
use energy_service::{
    config::AppConfig,
    metrics_server,
    observability,
    pipeline::{Pipeline, Transform},
    sinks::SqliteReadingsSink,
    sources::ReadingsFileSource,
    transform,
};
use std::{env, path::Path, sync::Arc, time::Duration};

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        bail!("usage: load_readings <file.json|file.csv>");
    }
    let file_path = Path::new(&args[1]);

    // ENERGY_CONFIG may point at a loader-specific file.
    let cfg = AppConfig::load()?;

    if let Some(metrics_cfg) = &cfg.metrics {
        metrics_server::init(&metrics_cfg.bind_addr)?;
    }

    let pool = db::connect(
        &cfg.database.uri,
        cfg.database.max_connections,
        cfg.database.create_if_missing,
    )
    .await?;
    db::ensure_schema(&pool).await?;

    let loader = &cfg.loader;
    let sink = SqliteReadingsSink::new(
        pool,
        loader.batch_size,
        loader.max_retries,
        Duration::from_millis(loader.retry_backoff_ms),
        loader.replace_existing,
    );

    let source = ReadingsFileSource::for_path(file_path)?;

    let validation: Arc<dyn Transform<Reading, Reading> + Send + Sync> = Arc::new(transform::ReadingValidation);
    let dedup: Arc<dyn Transform<Reading, Reading> + Send + Sync> =
        Arc::new(transform::DeduplicateReadings::default());

    let pipeline: Pipeline<_, Reading, _> = Pipeline {
        source,
        transforms: vec![validation, dedup],
        sink,
    };

    let summary = pipeline.run().await?;
    tracing::info!(
        file = %file_path.display(),
        written = summary.written,
        skipped = summary.skipped,
        "load complete"
    );

    Ok(())
}
