use std::{fs::File, path::PathBuf};

use csv::StringRecord;
use energy_client::domain::{parse_month_start, Reading};
use futures::Stream;

use crate::pipeline::{Envelope, PipelineError, Source};

/// CSV file source for `Reading`s.
///
/// Expected header columns (by name):
/// - city
/// - date (`YYYY-MM-01`)
/// - consumption_mwh
/// - temperature_c
/// - population_millions (optional)
/// - source (`Real` / `Simulated`)
///
/// Rows with an empty consumption or temperature are reported as per-record
/// errors and never reach the sink.
pub struct ReadingsCsvFileSource {
    path: PathBuf,
}

impl ReadingsCsvFileSource {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }
}

fn parse_optional_f64(name: &str, s: &str) -> Result<Option<f64>, PipelineError> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    trimmed
        .parse()
        .map(Some)
        .map_err(|e| PipelineError::Source(format!("invalid {name} '{s}': {e}")))
}

fn parse_required_f64(name: &str, s: &str) -> Result<f64, PipelineError> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return Err(PipelineError::Source(format!("missing {name}")));
    }
    trimmed
        .parse()
        .map_err(|e| PipelineError::Source(format!("invalid {name} '{s}': {e}")))
}

fn record_to_reading(record: &StringRecord, headers: &StringRecord) -> Result<Reading, PipelineError> {
    let get = |name: &str| -> Result<&str, PipelineError> {
        headers
            .iter()
            .position(|h| h.trim() == name)
            .and_then(|idx| record.get(idx))
            .ok_or_else(|| PipelineError::Source(format!("missing column '{name}' in CSV record")))
    };

    let city = get("city")?.trim().to_string();

    let date_str = get("date")?;
    let date = parse_month_start(date_str).map_err(|e| PipelineError::Source(e.to_string()))?;

    let consumption_mwh = parse_required_f64("consumption_mwh", get("consumption_mwh")?)?;
    let temperature_c = parse_required_f64("temperature_c", get("temperature_c")?)?;
    // The population column may be left out entirely.
    let population_millions = match get("population_millions") {
        Ok(raw) => parse_optional_f64("population_millions", raw)?,
        Err(_) => None,
    };

    let source = get("source")?
        .parse()
        .map_err(|e: energy_client::domain::ReadingParseError| PipelineError::Source(e.to_string()))?;

    Ok(Reading {
        city,
        date,
        consumption_mwh,
        temperature_c,
        population_millions,
        source,
    })
}

#[async_trait::async_trait]
impl Source<Reading> for ReadingsCsvFileSource {
    async fn stream(
        &self,
    ) -> std::pin::Pin<Box<dyn Stream<Item = Result<Envelope<Reading>, PipelineError>> + Send>> {
        // Blocking CSV reader inside a single task; input files are a few hundred rows.
        let path = self.path.clone();
        let s = async_stream::stream! {
            let file = match File::open(&path) {
                Ok(f) => f,
                Err(e) => {
                    yield Err(PipelineError::Input(format!("failed to open CSV file {}: {e}", path.display())));
                    return;
                }
            };
            let mut rdr = csv::Reader::from_reader(file);
            let headers = match rdr.headers() {
                Ok(h) => h.clone(),
                Err(e) => {
                    yield Err(PipelineError::Input(format!("failed to read CSV headers: {e}")));
                    return;
                }
            };

            for (line, result) in rdr.records().enumerate() {
                let parsed = result
                    .map_err(|e| PipelineError::Source(format!("failed to read CSV record: {e}")))
                    .and_then(|record| record_to_reading(&record, &headers));

                match parsed {
                    Ok(reading) => yield Ok(Envelope::now(reading)),
                    Err(e) => {
                        metrics::counter!("readings_csv_parse_errors_total").increment(1);
                        tracing::warn!(record = line + 1, error = %e, "skipping CSV record");
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
    fn record_with_all_columns_parses() {
        let headers = StringRecord::from(vec![
            "city",
            "date",
            "consumption_mwh",
            "temperature_c",
            "population_millions",
            "source",
        ]);
        let record = StringRecord::from(vec!["Berlin", "2023-01-01", "1500", "1.5", "3.75", "Simulated"]);

        let r = record_to_reading(&record, &headers).unwrap();
        assert_eq!(r.city, "Berlin");
        assert_eq!(r.date, date!(2023 - 01 - 01));
        assert_eq!(r.consumption_mwh, 1500.0);
        assert_eq!(r.population_millions, Some(3.75));
        assert_eq!(r.source, ConsumptionSource::Simulated);
    }

    #[test]
    fn missing_temperature_is_rejected() {
        let headers = StringRecord::from(vec!["city", "date", "consumption_mwh", "temperature_c", "source"]);
        let record = StringRecord::from(vec!["Berlin", "2023-01-01", "1500", "", "Real"]);
        assert!(matches!(record_to_reading(&record, &headers), Err(PipelineError::Source(msg)) if msg.contains("temperature_c")));
    }

    #[test]
    fn malformed_population_is_rejected_not_dropped() {
        let headers = StringRecord::from(vec![
            "city",
            "date",
            "consumption_mwh",
            "temperature_c",
            "population_millions",
            "source",
        ]);
        let record = StringRecord::from(vec!["Berlin", "2023-01-01", "1500", "1.5", "3,75", "Simulated"]);
        assert!(matches!(
            record_to_reading(&record, &headers),
            Err(PipelineError::Source(msg)) if msg.contains("population_millions")
        ));

        let blank = StringRecord::from(vec!["Berlin", "2023-01-01", "1500", "1.5", " ", "Simulated"]);
        assert_eq!(record_to_reading(&blank, &headers).unwrap().population_millions, None);
    }

    #[tokio::test]
    async fn file_stream_yields_readings_and_per_row_errors() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "city,date,consumption_mwh,temperature_c,population_millions,source").unwrap();
        writeln!(file, "Berlin,2023-01-01,1500,1.2,3.75,Simulated").unwrap();
        writeln!(file, "Berlin,2023-02-15,1450,2.0,3.75,Simulated").unwrap();
        writeln!(file, "Sao Paulo,2023-01-01,8000,26.1,,Real (utility feed)").unwrap();
        file.flush().unwrap();

        let source = ReadingsCsvFileSource::new(file.path());
        let items: Vec<_> = source.stream().await.collect().await;

        assert_eq!(items.len(), 3);
        assert!(items[0].is_ok());
        assert!(items[1].is_err());
        let sp = items[2].as_ref().unwrap();
        assert_eq!(sp.payload.population_millions, None);
        assert_eq!(sp.payload.source, ConsumptionSource::Real);
    }

    #[tokio::test]
    async fn missing_file_yields_single_error() {
        let source = ReadingsCsvFileSource::new("/definitely/not/here.csv");
        let items: Vec<_> = source.stream().await.collect().await;
        assert_eq!(items.len(), 1);
        assert!(matches!(&items[0], Err(PipelineError::Input(_))));
    }
}
