use std::time::Duration;

use energy_client::{db, domain::Reading};
use futures::StreamExt;
use sqlx::{SqliteConnection, SqlitePool};

use crate::pipeline::{Envelope, LoadSummary, PipelineError, Sink};

pub struct SqliteReadingsSink {
    pool: SqlitePool,
    batch_size: usize,
    max_retries: u32,
    retry_backoff: Duration,
    replace_existing: bool,
}

impl SqliteReadingsSink {
    pub fn new(
        pool: SqlitePool,
        batch_size: usize,
        max_retries: u32,
        retry_backoff: Duration,
        replace_existing: bool,
    ) -> Self {
        Self {
            pool,
            batch_size: batch_size.max(1),
            max_retries,
            retry_backoff,
            replace_existing,
        }
    }

    async fn flush_batch(&self, conn: &mut SqliteConnection, batch: &[Envelope<Reading>]) -> Result<u64, PipelineError> {
        if batch.is_empty() {
            return Ok(0);
        }

        let readings: Vec<Reading> = batch.iter().map(|e| e.payload.clone()).collect();

        let mut attempt: u32 = 0;
        loop {
            match db::insert_readings(&mut *conn, &readings).await {
                Ok(_) => {
                    metrics::counter!("sqlite_ingested_readings_total").increment(readings.len() as u64);

                    if let Some(min_received) = batch.iter().map(|e| e.received_at).min() {
                        if let Ok(dur) = std::time::SystemTime::now().duration_since(min_received) {
                            metrics::histogram!("load_end_to_end_latency_seconds").record(dur.as_secs_f64());
                        }
                    }

                    return Ok(readings.len() as u64);
                }
                Err(e) if attempt < self.max_retries => {
                    attempt += 1;
                    tracing::warn!(error = %e, attempt, "sqlite sink flush failed, retrying with backoff");
                    tokio::time::sleep(self.retry_backoff * attempt).await;
                }
                Err(e) => {
                    tracing::error!(error = %e, "sqlite sink flush failed, giving up");
                    metrics::counter!("sqlite_sink_errors_total").increment(1);
                    return Err(PipelineError::Sink(e.to_string()));
                }
            }
        }
    }
}

/// The reset and every batch run in one transaction, committed only after
/// the stream ends with at least one reading written (or nothing skipped).
/// Any early return drops the transaction, which rolls it back and leaves
/// the stored readings as they were.
#[async_trait::async_trait]
impl Sink<Reading> for SqliteReadingsSink {
    async fn run<S>(&self, mut input: S) -> Result<LoadSummary, PipelineError>
    where
        S: futures::Stream<Item = Result<Envelope<Reading>, PipelineError>> + Send + Unpin + 'static,
    {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| PipelineError::Sink(format!("failed to start transaction: {e}")))?;

        if self.replace_existing {
            let removed = db::clear_readings(&mut *tx)
                .await
                .map_err(|e| PipelineError::Sink(format!("failed to clear existing readings: {e}")))?;
            tracing::info!(removed, "existing readings staged for replacement");
        }

        let mut summary = LoadSummary::default();
        let mut buffer: Vec<Envelope<Reading>> = Vec::with_capacity(self.batch_size);

        while let Some(item) = input.next().await {
            let env = match item {
                Ok(env) => env,
                Err(PipelineError::Input(msg)) => {
                    tracing::error!(error = %msg, "input unusable, rolling back");
                    return Err(PipelineError::Input(msg));
                }
                Err(e) => {
                    tracing::debug!(error = %e, "upstream record skipped");
                    summary.skipped += 1;
                    continue;
                }
            };

            buffer.push(env);
            if buffer.len() >= self.batch_size {
                summary.written += self.flush_batch(&mut tx, &buffer).await?;
                buffer.clear();
            }
        }

        if !buffer.is_empty() {
            summary.written += self.flush_batch(&mut tx, &buffer).await?;
        }

        if summary.written == 0 && summary.skipped > 0 {
            return Err(PipelineError::Sink(format!(
                "no valid readings ({} records skipped); stored readings left unchanged",
                summary.skipped
            )));
        }

        tx.commit()
            .await
            .map_err(|e| PipelineError::Sink(format!("failed to commit load: {e}")))?;

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use energy_client::domain::{month_start, ConsumptionSource};
    use crate::{pipeline::Pipeline, sources::ReadingsFileSource};
    use futures::stream;
    use sqlx::sqlite::SqlitePoolOptions;
    use std::path::Path;

    async fn memory_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        db::ensure_schema(&pool).await.unwrap();
        pool
    }

    fn env(city: &str, month: u8, consumption_mwh: f64) -> Result<Envelope<Reading>, PipelineError> {
        Ok(Envelope::now(Reading {
            city: city.to_string(),
            date: month_start(2023, month).unwrap(),
            consumption_mwh,
            temperature_c: 10.0,
            population_millions: None,
            source: ConsumptionSource::Simulated,
        }))
    }

    #[tokio::test]
    async fn writes_in_batches_and_counts_skipped_records() {
        let pool = memory_pool().await;
        let sink = SqliteReadingsSink::new(pool.clone(), 2, 0, Duration::from_millis(1), true);

        let items = vec![
            env("Berlin", 1, 1500.0),
            Err(PipelineError::Transform("bad".to_string())),
            env("Berlin", 2, 1450.0),
            env("Berlin", 3, 1300.0),
        ];
        let summary = sink.run(stream::iter(items)).await.unwrap();

        assert_eq!(summary, LoadSummary { written: 3, skipped: 1 });
        let series = db::load_city(&pool, "Berlin").await.unwrap();
        assert_eq!(series.consumption(), vec![1500.0, 1450.0, 1300.0]);
    }

    #[tokio::test]
    async fn replace_existing_wipes_previous_load() {
        let pool = memory_pool().await;
        let first = SqliteReadingsSink::new(pool.clone(), 10, 0, Duration::from_millis(1), true);
        first.run(stream::iter(vec![env("Sao Paulo", 1, 8000.0)])).await.unwrap();

        let second = SqliteReadingsSink::new(pool.clone(), 10, 0, Duration::from_millis(1), true);
        second.run(stream::iter(vec![env("Berlin", 1, 1500.0)])).await.unwrap();
        assert_eq!(db::list_cities(&pool).await.unwrap(), vec!["Berlin"]);

        let append = SqliteReadingsSink::new(pool.clone(), 10, 0, Duration::from_millis(1), false);
        append.run(stream::iter(vec![env("Sao Paulo", 1, 8000.0)])).await.unwrap();
        assert_eq!(db::list_cities(&pool).await.unwrap(), vec!["Berlin", "Sao Paulo"]);
    }

    #[tokio::test]
    async fn unreadable_input_fails_and_keeps_stored_readings() {
        let pool = memory_pool().await;
        db::insert_readings(&pool, &[env("Berlin", 1, 1500.0).unwrap().payload])
            .await
            .unwrap();

        let pipeline: Pipeline<_, Reading, _> = Pipeline {
            source: ReadingsFileSource::for_path(Path::new("/nonexistent/typo.json")).unwrap(),
            transforms: vec![],
            sink: SqliteReadingsSink::new(pool.clone(), 10, 0, Duration::from_millis(1), true),
        };

        let res = pipeline.run().await;
        assert!(matches!(res, Err(PipelineError::Input(_))));
        let series = db::load_city(&pool, "Berlin").await.unwrap();
        assert_eq!(series.consumption(), vec![1500.0]);
    }

    #[tokio::test]
    async fn load_with_only_rejected_records_is_rolled_back() {
        let pool = memory_pool().await;
        db::insert_readings(&pool, &[env("Berlin", 1, 1500.0).unwrap().payload])
            .await
            .unwrap();

        let sink = SqliteReadingsSink::new(pool.clone(), 10, 0, Duration::from_millis(1), true);
        let items = vec![
            Err(PipelineError::Source("missing temp_c".to_string())),
            Err(PipelineError::Transform("negative consumption".to_string())),
        ];
        let res = sink.run(stream::iter(items)).await;

        assert!(matches!(res, Err(PipelineError::Sink(msg)) if msg.contains("2 records skipped")));
        assert_eq!(db::list_cities(&pool).await.unwrap(), vec!["Berlin"]);
    }

    #[tokio::test]
    async fn missing_table_fails_after_retries() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let sink = SqliteReadingsSink::new(pool, 10, 1, Duration::from_millis(1), false);

        let res = sink.run(stream::iter(vec![env("Berlin", 1, 1500.0)])).await;
        assert!(matches!(res, Err(PipelineError::Sink(_))));
    }
}
