//! Per-city statistical summaries over an in-memory series.
//!
//! Everything here is synchronous and side-effect free apart from
//! tracing: the same series always produces the same result.

pub mod analyzer;
pub mod anomaly;
pub mod decomposition;
pub mod error;
pub mod kpi;
pub mod profile;
pub mod regression;
pub mod stats;

pub use analyzer::{AnalysisConfig, CityAnalyzer, CityReport, Outcome};
pub use anomaly::{detect_anomalies, Anomaly, AnomalyDetector, AnomalyKind, AnomalyReport, AnnotatedReading};
pub use decomposition::{decompose, ClassicalAdditive, Components, Decomposition, SeasonalBackend, SeasonalDecomposer};
pub use error::AnalysisError;
pub use kpi::{compute_kpis, month_label, KpiSummary};
pub use profile::{yearly_profiles, MonthPoint, YearProfile};
pub use regression::{train, FitQuality, RegressionModel, RegressionSummary, TrainedModel};
