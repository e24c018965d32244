use std::{collections::HashSet, sync::Mutex};

use crate::pipeline::{Envelope, PipelineError, Transform};
use energy_client::domain::Reading;
use time::macros::date;

/// Plausible surface air temperature range, in degrees Celsius.
const MIN_TEMPERATURE_C: f64 = -90.0;
const MAX_TEMPERATURE_C: f64 = 60.0;

/// Pure validation of a `Reading` record.
///
/// Rules:
/// - city must be non-empty.
/// - consumption must be finite and non-negative.
/// - temperature must be finite and within [-90, 60] °C.
/// - date must be a month start within [2000-01-01, 2100-01-01).
pub fn validate_reading(env: Envelope<Reading>) -> Result<Envelope<Reading>, PipelineError> {
    let r = &env.payload;

    if r.city.trim().is_empty() {
        return Err(PipelineError::Transform("city must not be empty".to_string()));
    }

    if !r.consumption_mwh.is_finite() || r.consumption_mwh < 0.0 {
        return Err(PipelineError::Transform(format!(
            "{} {}: consumption must be a non-negative number, got {}",
            r.city, r.date, r.consumption_mwh
        )));
    }

    if !r.temperature_c.is_finite() || !(MIN_TEMPERATURE_C..=MAX_TEMPERATURE_C).contains(&r.temperature_c) {
        return Err(PipelineError::Transform(format!(
            "{} {}: temperature out of range, got {}",
            r.city, r.date, r.temperature_c
        )));
    }

    if r.date.day() != 1 {
        return Err(PipelineError::Transform(format!("{} {}: date is not a month start", r.city, r.date)));
    }

    let min_date = date!(2000 - 01 - 01);
    let max_date = date!(2100 - 01 - 01);

    if r.date < min_date || r.date >= max_date {
        return Err(PipelineError::Transform("date out of allowed range".to_string()));
    }

    Ok(env)
}

#[derive(Clone, Default)]
pub struct ReadingValidation;

#[async_trait::async_trait]
impl Transform<Reading, Reading> for ReadingValidation {
    async fn apply(&self, input: Envelope<Reading>) -> Result<Envelope<Reading>, PipelineError> {
        match validate_reading(input) {
            Ok(env) => Ok(env),
            Err(e) => {
                metrics::counter!("validation_readings_rejected_total").increment(1);
                tracing::warn!(error = %e, "rejecting reading");
                Err(e)
            }
        }
    }
}

/// Drops repeated (city, month) pairs within one run; the first one wins.
#[derive(Default)]
pub struct DeduplicateReadings {
    seen: Mutex<HashSet<(String, time::Date)>>,
}

#[async_trait::async_trait]
impl Transform<Reading, Reading> for DeduplicateReadings {
    async fn apply(&self, input: Envelope<Reading>) -> Result<Envelope<Reading>, PipelineError> {
        let key = (input.payload.city.clone(), input.payload.date);
        let inserted = self
            .seen
            .lock()
            .map_err(|_| PipelineError::Transform("deduplication state poisoned".to_string()))?
            .insert(key);

        if inserted {
            Ok(input)
        } else {
            metrics::counter!("dedup_readings_dropped_total").increment(1);
            Err(PipelineError::Transform(format!(
                "duplicate reading for {} {}",
                input.payload.city, input.payload.date
            )))
        }
    }
}
