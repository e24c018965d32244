//! Runs every analysis for one city and keeps each failure local.

use serde::{Deserialize, Serialize};

use crate::{
    analytics::{
        anomaly::{AnomalyDetector, AnomalyReport, DEFAULT_THRESHOLD},
        decomposition::{Decomposition, SeasonalDecomposer, DEFAULT_MIN_POINTS, DEFAULT_PERIOD},
        error::AnalysisError,
        kpi::{compute_kpis, KpiSummary},
        profile::{yearly_profiles, YearProfile},
        regression::{RegressionModel, RegressionSummary},
    },
    domain::CitySeries,
};

/// Tunables for the analyses, normally read from the `[analysis]` config table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Z-score multiplier above which a month is anomalous.
    pub anomaly_threshold: f64,
    pub decomposition_min_months: usize,
    pub seasonal_period: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            anomaly_threshold: DEFAULT_THRESHOLD,
            decomposition_min_months: DEFAULT_MIN_POINTS,
            seasonal_period: DEFAULT_PERIOD,
        }
    }
}

impl AnalysisConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !(self.anomaly_threshold.is_finite() && self.anomaly_threshold > 0.0) {
            return Err(format!("anomaly_threshold must be positive, got {}", self.anomaly_threshold));
        }
        if self.seasonal_period < 2 {
            return Err(format!("seasonal_period must be at least 2, got {}", self.seasonal_period));
        }
        if self.decomposition_min_months < 2 * self.seasonal_period {
            return Err(format!(
                "decomposition_min_months must cover two seasonal periods ({}), got {}",
                2 * self.seasonal_period,
                self.decomposition_min_months
            ));
        }
        Ok(())
    }
}

/// Result of an optional analysis: either the value or why it is missing.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "result", rename_all = "snake_case")]
pub enum Outcome<T> {
    Ready(T),
    Unavailable { reason: String },
}

impl<T> Outcome<T> {
    pub fn ready(&self) -> Option<&T> {
        match self {
            Self::Ready(v) => Some(v),
            Self::Unavailable { .. } => None,
        }
    }
}

impl<T> From<Result<T, AnalysisError>> for Outcome<T> {
    fn from(res: Result<T, AnalysisError>) -> Self {
        match res {
            Ok(v) => Self::Ready(v),
            Err(e) => Self::Unavailable { reason: e.to_string() },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CityReport {
    pub city: String,
    pub readings: usize,
    pub kpis: KpiSummary,
    pub anomalies: AnomalyReport,
    pub decomposition: Outcome<Decomposition>,
    pub seasonal_profile: Outcome<Vec<YearProfile>>,
    pub model: RegressionModel,
    pub regression: RegressionSummary,
    /// Why the regression could not be trained, if it could not.
    pub regression_error: Option<String>,
}

pub struct CityAnalyzer {
    config: AnalysisConfig,
    detector: AnomalyDetector,
    decomposer: SeasonalDecomposer,
}

impl Default for CityAnalyzer {
    fn default() -> Self {
        Self::new(AnalysisConfig::default())
    }
}

impl CityAnalyzer {
    pub fn new(config: AnalysisConfig) -> Self {
        Self {
            config,
            detector: AnomalyDetector::new(config.anomaly_threshold),
            decomposer: SeasonalDecomposer::new(config.seasonal_period, config.decomposition_min_months),
        }
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    pub fn kpis(&self, series: &CitySeries) -> KpiSummary {
        compute_kpis(series)
    }

    pub fn anomalies(&self, series: &CitySeries, threshold: Option<f64>) -> AnomalyReport {
        match threshold {
            Some(t) => AnomalyDetector::new(t).detect(series),
            None => self.detector.detect(series),
        }
    }

    pub fn decomposition(&self, series: &CitySeries) -> Result<Decomposition, AnalysisError> {
        self.decomposer.decompose(series)
    }

    pub fn seasonal_profile(&self, series: &CitySeries) -> Result<Vec<YearProfile>, AnalysisError> {
        yearly_profiles(series)
    }

    pub fn model(&self, series: &CitySeries) -> (RegressionModel, Option<AnalysisError>) {
        let mut model = RegressionModel::Untrained;
        let err = model.train(series).err();
        (model, err)
    }

    pub fn analyze(&self, series: &CitySeries) -> CityReport {
        let (model, regression_err) = self.model(series);
        if let Some(e) = &regression_err {
            tracing::info!(city = series.city(), reason = %e, "regression unavailable");
        }

        let decomposition: Outcome<Decomposition> = self.decomposition(series).into();
        if let Outcome::Unavailable { reason } = &decomposition {
            tracing::info!(city = series.city(), %reason, "seasonal decomposition unavailable");
        }

        CityReport {
            city: series.city().to_string(),
            readings: series.len(),
            kpis: self.kpis(series),
            anomalies: self.anomalies(series, None),
            decomposition,
            seasonal_profile: self.seasonal_profile(series).into(),
            regression: model.summarize(),
            model,
            regression_error: regression_err.map(|e| e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::test_support::monthly;

    #[test]
    fn one_year_city_gets_partial_report_without_failing() {
        let mut values = vec![100.0; 12];
        values[0] = 400.0;
        let series = CitySeries::new("Berlin", monthly("Berlin", 2023, &values));
        let report = CityAnalyzer::default().analyze(&series);

        assert_eq!(report.readings, 12);
        assert_eq!(report.kpis.total_consumption_mwh, 1500.0);
        assert_eq!(report.anomalies.anomalies.len(), 1);
        assert!(matches!(report.decomposition, Outcome::Unavailable { ref reason } if reason.contains("24")));
        assert!(report.seasonal_profile.ready().is_none());
        assert!(report.model.trained().is_some());
        assert!(report.regression_error.is_none());
    }

    #[test]
    fn empty_city_reports_neutral_values_and_reasons() {
        let report = CityAnalyzer::default().analyze(&CitySeries::empty("Nowhere"));
        assert_eq!(report.kpis, KpiSummary::empty());
        assert!(report.anomalies.anomalies.is_empty());
        assert_eq!(report.model, RegressionModel::Untrained);
        assert_eq!(report.regression, RegressionSummary::not_trained());
        assert!(report.regression_error.unwrap().contains("regression"));
    }

    #[test]
    fn multi_year_city_gets_full_report() {
        let values: Vec<f64> = (0..36).map(|i| 1000.0 + (i % 12) as f64 * 10.0).collect();
        let series = CitySeries::new("Berlin", monthly("Berlin", 2021, &values));
        let report = CityAnalyzer::default().analyze(&series);

        assert_eq!(report.decomposition.ready().map(|d| d.dates.len()), Some(36));
        assert_eq!(report.seasonal_profile.ready().map(Vec::len), Some(3));
    }

    #[test]
    fn config_validation_rejects_inconsistent_values() {
        assert!(AnalysisConfig::default().validate().is_ok());
        let bad_threshold = AnalysisConfig {
            anomaly_threshold: 0.0,
            ..AnalysisConfig::default()
        };
        assert!(bad_threshold.validate().is_err());
        let short_window = AnalysisConfig {
            decomposition_min_months: 12,
            ..AnalysisConfig::default()
        };
        assert!(short_window.validate().is_err());
    }

    #[test]
    fn explicit_threshold_overrides_configured_one() {
        let values = [100.0, 100.0, 100.0, 130.0];
        let series = CitySeries::new("Berlin", monthly("Berlin", 2023, &values));
        let analyzer = CityAnalyzer::new(AnalysisConfig {
            anomaly_threshold: 3.0,
            ..AnalysisConfig::default()
        });
        assert!(analyzer.anomalies(&series, None).anomalies.is_empty());
        assert_eq!(analyzer.anomalies(&series, Some(1.0)).anomalies.len(), 1);
    }
}
