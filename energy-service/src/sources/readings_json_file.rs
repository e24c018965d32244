use std::path::PathBuf;

use energy_client::domain::{month_start, Reading};
use futures::Stream;
use serde::Deserialize;

use crate::pipeline::{Envelope, PipelineError, Source};

/// Source for the raw monthly file produced by the data-collection step.
///
/// The file is a JSON array of objects shaped like [`RawMonthlyEntry`].
/// Each entry is decoded independently, so one malformed entry is reported
/// and skipped without affecting the others.
pub struct ReadingsJsonFileSource {
    path: PathBuf,
}

#[derive(Debug, Deserialize)]
pub struct RawMonthlyEntry {
    pub city: String,
    pub year: i32,
    pub month: u8,
    pub consumption_mwh: Option<f64>,
    pub temp_c: Option<f64>,
    pub pop_millions: Option<f64>,
    pub consumption_source: String,
}

impl TryFrom<RawMonthlyEntry> for Reading {
    type Error = PipelineError;

    fn try_from(e: RawMonthlyEntry) -> Result<Self, Self::Error> {
        let date = month_start(e.year, e.month).map_err(|err| PipelineError::Source(err.to_string()))?;
        let consumption_mwh = e
            .consumption_mwh
            .ok_or_else(|| PipelineError::Source(format!("{} {date}: missing consumption_mwh", e.city)))?;
        let temperature_c = e
            .temp_c
            .ok_or_else(|| PipelineError::Source(format!("{} {date}: missing temp_c", e.city)))?;
        let source = e
            .consumption_source
            .parse()
            .map_err(|err: energy_client::domain::ReadingParseError| PipelineError::Source(err.to_string()))?;

        Ok(Reading {
            city: e.city,
            date,
            consumption_mwh,
            temperature_c,
            population_millions: e.pop_millions,
            source,
        })
    }
}

impl ReadingsJsonFileSource {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }
}

fn decode_entry(value: serde_json::Value) -> Result<Reading, PipelineError> {
    let entry: RawMonthlyEntry =
        serde_json::from_value(value).map_err(|e| PipelineError::Source(format!("invalid entry: {e}")))?;
    Reading::try_from(entry)
}

#[async_trait::async_trait]
impl Source<Reading> for ReadingsJsonFileSource {
    async fn stream(
        &self,
    ) -> std::pin::Pin<Box<dyn Stream<Item = Result<Envelope<Reading>, PipelineError>> + Send>> {
        let path = self.path.clone();
        let s = async_stream::stream! {
            let entries: Vec<serde_json::Value> = match std::fs::read_to_string(&path)
                .map_err(|e| format!("failed to read {}: {e}", path.display()))
                .and_then(|text| serde_json::from_str(&text).map_err(|e| format!("failed to decode {}: {e}", path.display())))
            {
                Ok(v) => v,
                Err(msg) => {
                    yield Err(PipelineError::Input(msg));
                    return;
                }
            };

            for (idx, value) in entries.into_iter().enumerate() {
                match decode_entry(value) {
                    Ok(reading) => yield Ok(Envelope::now(reading)),
                    Err(e) => {
                        metrics::counter!("readings_json_parse_errors_total").increment(1);
                        tracing::warn!(entry = idx, error = %e, "skipping JSON entry");
                        yield Err(e);
                    }
                }
            }
        };

        Box::pin(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use energy_client::domain::ConsumptionSource;
    use futures::StreamExt;
    use std::io::Write;
    use time::macros::date;

    #[test]
    fn raw_entry_converts_to_month_start_reading() {
        let entry = RawMonthlyEntry {
            city: "Berlin".to_string(),
            year: 2023,
            month: 3,
            consumption_mwh: Some(1300.0),
            temp_c: Some(6.4),
            pop_millions: Some(3.75),
            consumption_source: "Simulated".to_string(),
        };

        let r = Reading::try_from(entry).unwrap();
        assert_eq!(r.date, date!(2023 - 03 - 01));
        assert_eq!(r.temperature_c, 6.4);
        assert_eq!(r.source, ConsumptionSource::Simulated);
    }

    #[test]
    fn entry_without_consumption_is_rejected() {
        let entry = RawMonthlyEntry {
            city: "Berlin".to_string(),
            year: 2023,
            month: 3,
            consumption_mwh: None,
            temp_c: Some(6.4),
            pop_millions: None,
            consumption_source: "Simulated".to_string(),
        };
        assert!(matches!(Reading::try_from(entry), Err(PipelineError::Source(msg)) if msg.contains("consumption")));
    }

    #[tokio::test]
    async fn file_stream_skips_bad_entries_individually() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[
                {{"city": "New York", "year": 2023, "month": 1, "consumption_mwh": 6500, "temp_c": 1.8, "pop_millions": 8.4, "consumption_source": "Simulated"}},
                {{"city": "New York", "year": 2023, "month": 13, "consumption_mwh": 6200, "temp_c": 2.0, "pop_millions": 8.4, "consumption_source": "Simulated"}},
                {{"city": "New York", "year": "soon"}},
                {{"city": "Sao Paulo", "year": 2023, "month": 1, "consumption_mwh": 8000, "temp_c": 25.9, "pop_millions": 12.33, "consumption_source": "Real (utility feed)"}}
            ]"#
        )
        .unwrap();
        file.flush().unwrap();

        let items: Vec<_> = ReadingsJsonFileSource::new(file.path()).stream().await.collect().await;
        assert_eq!(items.len(), 4);
        assert!(items[0].is_ok());
        assert!(items[1].is_err());
        assert!(items[2].is_err());
        assert_eq!(items[3].as_ref().unwrap().payload.source, ConsumptionSource::Real);
    }

    #[tokio::test]
    async fn undecodable_file_yields_single_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        file.flush().unwrap();

        let items: Vec<_> = ReadingsJsonFileSource::new(file.path()).stream().await.collect().await;
        assert_eq!(items.len(), 1);
        assert!(matches!(&items[0], Err(PipelineError::Input(_))));
    }
}
