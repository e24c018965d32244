//! Z-score anomaly flagging over a whole city series.

use serde::Serialize;
use time::Date;

use crate::{
    analytics::stats::{mean, sample_std_dev},
    domain::{CitySeries, Reading},
};

pub const DEFAULT_THRESHOLD: f64 = 1.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AnomalyKind {
    High,
    Low,
}

/// A reading with its standardized score.
///
/// `z_score` is `None` when no score could be computed (fewer than two
/// readings, or zero variance).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnnotatedReading {
    #[serde(flatten)]
    pub reading: Reading,
    pub z_score: Option<f64>,
    pub is_anomaly: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Anomaly {
    pub date: Date,
    pub consumption_mwh: f64,
    pub temperature_c: f64,
    pub kind: AnomalyKind,
    pub z_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnomalyReport {
    pub threshold: f64,
    pub mean_mwh: Option<f64>,
    pub std_dev_mwh: Option<f64>,
    /// Every input reading, in input order.
    pub annotated: Vec<AnnotatedReading>,
    /// Anomalous readings only, in input order.
    pub anomalies: Vec<Anomaly>,
}

impl AnomalyReport {
    fn unscored(series: &CitySeries, threshold: f64, mean_mwh: Option<f64>, std_dev_mwh: Option<f64>) -> Self {
        Self {
            threshold,
            mean_mwh,
            std_dev_mwh,
            annotated: series
                .readings()
                .iter()
                .map(|r| AnnotatedReading {
                    reading: r.clone(),
                    z_score: None,
                    is_anomaly: false,
                })
                .collect(),
            anomalies: Vec::new(),
        }
    }
}

/// Flags readings whose consumption lies more than `threshold` sample
/// standard deviations from the series mean.
pub fn detect_anomalies(series: &CitySeries, threshold: f64) -> AnomalyReport {
    let values = series.consumption();

    let (Some(mu), Some(sd)) = (mean(&values), sample_std_dev(&values)) else {
        return AnomalyReport::unscored(series, threshold, mean(&values), None);
    };

    if sd == 0.0 {
        return AnomalyReport::unscored(series, threshold, Some(mu), Some(sd));
    }

    let mut annotated = Vec::with_capacity(series.len());
    let mut anomalies = Vec::new();

    for r in series.readings() {
        let z = (r.consumption_mwh - mu) / sd;
        let is_anomaly = z.abs() > threshold;

        if is_anomaly {
            anomalies.push(Anomaly {
                date: r.date,
                consumption_mwh: r.consumption_mwh,
                temperature_c: r.temperature_c,
                kind: if z > threshold { AnomalyKind::High } else { AnomalyKind::Low },
                z_score: z,
            });
        }

        annotated.push(AnnotatedReading {
            reading: r.clone(),
            z_score: Some(z),
            is_anomaly,
        });
    }

    tracing::debug!(
        city = series.city(),
        flagged = anomalies.len(),
        threshold,
        "anomaly detection complete"
    );

    AnomalyReport {
        threshold,
        mean_mwh: Some(mu),
        std_dev_mwh: Some(sd),
        annotated,
        anomalies,
    }
}

/// Anomaly detection bound to a configured threshold.
#[derive(Debug, Clone, Copy)]
pub struct AnomalyDetector {
    threshold: f64,
}

impl Default for AnomalyDetector {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD)
    }
}

impl AnomalyDetector {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn detect(&self, series: &CitySeries) -> AnomalyReport {
        detect_anomalies(series, self.threshold)
    }
}
