use std::{path::Path, pin::Pin};

use energy_client::domain::Reading;
use futures::Stream;

use crate::pipeline::{Envelope, PipelineError, Source};

pub mod readings_csv_file;
pub mod readings_json_file;

pub use readings_csv_file::ReadingsCsvFileSource;
pub use readings_json_file::{RawMonthlyEntry, ReadingsJsonFileSource};

/// File source picked from the input's extension.
pub enum ReadingsFileSource {
    Json(ReadingsJsonFileSource),
    Csv(ReadingsCsvFileSource),
}

impl ReadingsFileSource {
    /// `.json` and `.csv` (case-insensitive) are recognised.
    pub fn for_path(path: &Path) -> Result<Self, PipelineError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match ext.as_deref() {
            Some("json") => Ok(Self::Json(ReadingsJsonFileSource::new(path))),
            Some("csv") => Ok(Self::Csv(ReadingsCsvFileSource::new(path))),
            _ => Err(PipelineError::Source(format!(
                "unsupported input file {}: expected .json or .csv",
                path.display()
            ))),
        }
    }
}

#[async_trait::async_trait]
impl Source<Reading> for ReadingsFileSource {
    async fn stream(&self) -> Pin<Box<dyn Stream<Item = Result<Envelope<Reading>, PipelineError>> + Send>> {
        match self {
            Self::Json(s) => s.stream().await,
            Self::Csv(s) => s.stream().await,
        }
    }
}
