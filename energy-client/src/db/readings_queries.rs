use std::str::FromStr;

use anyhow::Result;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Executor, QueryBuilder, Sqlite, SqlitePool,
};

use crate::domain::{format_month_start, parse_month_start, CitySeries, Reading, ReadingParseError};

/// Raw row of the `energy_readings` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ReadingRow {
    pub city: String,
    pub date: String,
    pub consumption_mwh: f64,
    pub temperature_c: f64,
    pub population_millions: Option<f64>,
    pub source: String,
}

impl TryFrom<ReadingRow> for Reading {
    type Error = ReadingParseError;

    fn try_from(row: ReadingRow) -> Result<Self, Self::Error> {
        Ok(Reading {
            date: parse_month_start(&row.date)?,
            source: row.source.parse()?,
            city: row.city,
            consumption_mwh: row.consumption_mwh,
            temperature_c: row.temperature_c,
            population_millions: row.population_millions,
        })
    }
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow, serde::Serialize)]
pub struct CityTotal {
    pub city: String,
    pub total_mwh: f64,
    pub months: i64,
}

/// Open a pool against a `sqlite://` URI.
pub async fn connect(uri: &str, max_connections: u32, create_if_missing: bool) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(uri)?.create_if_missing(create_if_missing);
    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;
    Ok(pool)
}

pub async fn ensure_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS energy_readings (
            city                TEXT NOT NULL,
            date                TEXT NOT NULL,
            consumption_mwh     REAL NOT NULL,
            temperature_c       REAL NOT NULL,
            population_millions REAL,
            source              TEXT NOT NULL,
            PRIMARY KEY (city, date)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Insert or replace a batch of readings in a single statement.
///
/// (city, date) is the primary key, so a reading for an existing month
/// replaces the stored one.
pub async fn insert_readings<'e, E>(executor: E, readings: &[Reading]) -> Result<u64, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    if readings.is_empty() {
        return Ok(0);
    }

    let mut builder = QueryBuilder::<Sqlite>::new(
        "INSERT OR REPLACE INTO energy_readings (city, date, consumption_mwh, temperature_c, population_millions, source) ",
    );
    builder.push_values(readings, |mut b, r| {
        b.push_bind(r.city.clone())
            .push_bind(format_month_start(r.date))
            .push_bind(r.consumption_mwh)
            .push_bind(r.temperature_c)
            .push_bind(r.population_millions)
            .push_bind(r.source.as_str());
    });

    let res = builder.build().execute(executor).await?;
    Ok(res.rows_affected())
}

pub async fn clear_readings<'e, E>(executor: E) -> Result<u64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let res = sqlx::query("DELETE FROM energy_readings").execute(executor).await?;
    Ok(res.rows_affected())
}

fn into_readings(rows: Vec<ReadingRow>) -> Vec<Reading> {
    rows.into_iter()
        .filter_map(|row| {
            let key = (row.city.clone(), row.date.clone());
            match Reading::try_from(row) {
                Ok(r) => Some(r),
                Err(e) => {
                    tracing::warn!(city = %key.0, date = %key.1, error = %e, "skipping malformed stored reading");
                    None
                }
            }
        })
        .collect()
}

/// Every stored reading, ordered by city then month.
pub async fn load_all(pool: &SqlitePool) -> Result<Vec<Reading>> {
    let rows = sqlx::query_as::<_, ReadingRow>(
        r#"
        SELECT city, date, consumption_mwh, temperature_c, population_millions, source
        FROM energy_readings
        ORDER BY city, date
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(into_readings(rows))
}

/// Time-ordered series for a single city. Empty if the city is unknown.
pub async fn load_city(pool: &SqlitePool, city: &str) -> Result<CitySeries> {
    let rows = sqlx::query_as::<_, ReadingRow>(
        r#"
        SELECT city, date, consumption_mwh, temperature_c, population_millions, source
        FROM energy_readings
        WHERE city = ?
        ORDER BY date
        "#,
    )
    .bind(city)
    .fetch_all(pool)
    .await?;

    Ok(CitySeries::new(city, into_readings(rows)))
}

pub async fn list_cities(pool: &SqlitePool) -> Result<Vec<String>> {
    let cities = sqlx::query_scalar::<_, String>("SELECT DISTINCT city FROM energy_readings ORDER BY city")
        .fetch_all(pool)
        .await?;
    Ok(cities)
}

/// Total consumption per city over all stored months, largest first.
pub async fn annual_totals(pool: &SqlitePool) -> Result<Vec<CityTotal>> {
    let rows = sqlx::query_as::<_, CityTotal>(
        r#"
        SELECT city, SUM(consumption_mwh) AS total_mwh, COUNT(*) AS months
        FROM energy_readings
        GROUP BY city
        ORDER BY total_mwh DESC, city
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{month_start, ConsumptionSource};

    async fn memory_pool() -> SqlitePool {
        // A single connection keeps every query on the same in-memory database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        ensure_schema(&pool).await.unwrap();
        pool
    }

    fn reading(city: &str, month: u8, consumption_mwh: f64) -> Reading {
        Reading {
            city: city.to_string(),
            date: month_start(2023, month).unwrap(),
            consumption_mwh,
            temperature_c: 10.0,
            population_millions: Some(3.75),
            source: ConsumptionSource::Simulated,
        }
    }

    #[tokio::test]
    async fn insert_then_load_city_in_date_order() {
        let pool = memory_pool().await;
        insert_readings(
            &pool,
            &[reading("Berlin", 2, 1450.0), reading("Berlin", 1, 1500.0), reading("Sao Paulo", 1, 8000.0)],
        )
        .await
        .unwrap();

        let series = load_city(&pool, "Berlin").await.unwrap();
        assert_eq!(series.consumption(), vec![1500.0, 1450.0]);
        assert_eq!(series.readings()[0].population_millions, Some(3.75));

        let all = load_all(&pool).await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(list_cities(&pool).await.unwrap(), vec!["Berlin", "Sao Paulo"]);
    }

    #[tokio::test]
    async fn insert_replaces_existing_month() {
        let pool = memory_pool().await;
        insert_readings(&pool, &[reading("Berlin", 1, 1500.0)]).await.unwrap();
        insert_readings(&pool, &[reading("Berlin", 1, 1234.0)]).await.unwrap();

        let series = load_city(&pool, "Berlin").await.unwrap();
        assert_eq!(series.consumption(), vec![1234.0]);
    }

    #[tokio::test]
    async fn annual_totals_rank_cities_by_consumption() {
        let pool = memory_pool().await;
        insert_readings(
            &pool,
            &[
                reading("Berlin", 1, 1500.0),
                reading("Berlin", 2, 1450.0),
                reading("New York", 1, 6500.0),
            ],
        )
        .await
        .unwrap();

        let totals = annual_totals(&pool).await.unwrap();
        assert_eq!(totals[0].city, "New York");
        assert_eq!(totals[1].total_mwh, 2950.0);
        assert_eq!(totals[1].months, 2);
    }

    #[tokio::test]
    async fn malformed_rows_are_skipped() {
        let pool = memory_pool().await;
        insert_readings(&pool, &[reading("Berlin", 1, 1500.0)]).await.unwrap();
        sqlx::query(
            "INSERT INTO energy_readings VALUES ('Berlin', '2023-02-15', 1.0, 1.0, NULL, 'Simulated')",
        )
        .execute(&pool)
        .await
        .unwrap();

        assert_eq!(load_city(&pool, "Berlin").await.unwrap().len(), 1);
        assert_eq!(clear_readings(&pool).await.unwrap(), 2);
        assert!(load_all(&pool).await.unwrap().is_empty());
    }
}
