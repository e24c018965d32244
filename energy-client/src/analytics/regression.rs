//! Single-predictor OLS of monthly consumption on mean temperature.
//!
//! Fit quality (R², MAE, RMSE) is measured on the training rows themselves:
//! it describes how well temperature explains the observed months, not how
//! well the line generalizes.

use serde::Serialize;

use crate::{
    analytics::{error::AnalysisError, stats::fit_line},
    domain::CitySeries,
};

pub const MIN_TRAINING_POINTS: usize = 2;

/// Parameters and training-set fit of `consumption_mwh = slope * temperature_c + intercept`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TrainedModel {
    pub slope: f64,
    pub intercept: f64,
    pub r2: f64,
    pub mae: f64,
    pub rmse: f64,
    pub observations: usize,
}

impl TrainedModel {
    pub fn predict(&self, temperature_c: f64) -> f64 {
        self.slope * temperature_c + self.intercept
    }
}

/// Fits the model. Needs at least two readings.
///
/// When every temperature is identical the line is flat (slope 0) at the
/// mean consumption.
pub fn train(series: &CitySeries) -> Result<TrainedModel, AnalysisError> {
    if series.len() < MIN_TRAINING_POINTS {
        return Err(AnalysisError::insufficient("regression", MIN_TRAINING_POINTS, series.len()));
    }

    let x = series.temperatures();
    let y = series.consumption();

    let (slope, intercept) = fit_line(&x, &y)
        .ok_or_else(|| AnalysisError::ComputationFailure("least-squares fit failed".to_string()))?;

    let n = y.len() as f64;
    let mean_y = y.iter().sum::<f64>() / n;

    let mut ss_res = 0.0;
    let mut ss_tot = 0.0;
    let mut abs_err = 0.0;
    for (xi, yi) in x.iter().zip(&y) {
        let resid = yi - (slope * xi + intercept);
        ss_res += resid * resid;
        abs_err += resid.abs();
        ss_tot += (yi - mean_y).powi(2);
    }

    let r2 = if ss_tot > 0.0 {
        1.0 - ss_res / ss_tot
    } else if ss_res == 0.0 {
        1.0
    } else {
        0.0
    };

    Ok(TrainedModel {
        slope,
        intercept,
        r2,
        mae: abs_err / n,
        rmse: (ss_res / n).sqrt(),
        observations: y.len(),
    })
}

/// A regression model that is either not yet trained or carries its fit.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
#[serde(tag = "state", content = "model")]
pub enum RegressionModel {
    #[default]
    Untrained,
    Trained(TrainedModel),
}

impl RegressionModel {
    /// Trains in place. A failed training leaves the model untrained.
    pub fn train(&mut self, series: &CitySeries) -> Result<TrainedModel, AnalysisError> {
        let result = train(series);
        *self = match &result {
            Ok(model) => Self::Trained(*model),
            Err(_) => Self::Untrained,
        };
        result
    }

    pub fn trained(&self) -> Option<&TrainedModel> {
        match self {
            Self::Trained(m) => Some(m),
            Self::Untrained => None,
        }
    }

    pub fn predict(&self, temperature_c: f64) -> Option<f64> {
        self.trained().map(|m| m.predict(temperature_c))
    }

    pub fn summarize(&self) -> RegressionSummary {
        match self {
            Self::Trained(m) => RegressionSummary::from_model(m),
            Self::Untrained => RegressionSummary::not_trained(),
        }
    }
}

impl From<TrainedModel> for RegressionModel {
    fn from(m: TrainedModel) -> Self {
        Self::Trained(m)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FitQuality {
    High,
    Reasonable,
    Low,
}

impl FitQuality {
    pub fn from_r2(r2: f64) -> Self {
        if r2 > 0.7 {
            Self::High
        } else if r2 > 0.4 {
            Self::Reasonable
        } else {
            Self::Low
        }
    }

    fn sentence(&self) -> &'static str {
        match self {
            Self::High => "The model explains a high proportion of the variation in energy consumption.",
            Self::Reasonable => "The model explains a reasonable proportion of the variation in energy consumption.",
            Self::Low => {
                "The model explains a low proportion of the variation in energy consumption; \
                 other factors not included in the model likely dominate."
            }
        }
    }
}

fn temperature_effect(slope: f64) -> String {
    let lead = "Temperature impact: for each 1°C increase in temperature, energy consumption tends to";
    if slope > 0.0 {
        format!(
            "{lead} increase by {:.2} MWh. This points to cooling load in warm months, \
             or milder winter months lowering heating demand.",
            slope.abs()
        )
    } else if slope < 0.0 {
        format!(
            "{lead} decrease by {:.2} MWh. Colder months raise heating demand and warmer months reduce it.",
            slope.abs()
        )
    } else {
        "Temperature impact: temperature shows no significant linear impact on energy consumption.".to_string()
    }
}

/// Rendering-ready description of a regression model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegressionSummary {
    pub status: &'static str,
    pub slope: Option<f64>,
    pub intercept: Option<f64>,
    pub r2: Option<f64>,
    pub mae: Option<f64>,
    pub rmse: Option<f64>,
    pub fit_quality: Option<FitQuality>,
    pub interpretation: String,
}

impl RegressionSummary {
    pub fn not_trained() -> Self {
        Self {
            status: "Model not trained.",
            slope: None,
            intercept: None,
            r2: None,
            mae: None,
            rmse: None,
            fit_quality: None,
            interpretation: "Train the model first to see results.".to_string(),
        }
    }

    pub fn from_model(m: &TrainedModel) -> Self {
        let quality = FitQuality::from_r2(m.r2);
        let interpretation = format!(
            "{}\n\n{}\n\nBaseline consumption (intercept): at 0°C the estimated baseline consumption is {:.2} MWh.",
            quality.sentence(),
            temperature_effect(m.slope),
            m.intercept
        );

        Self {
            status: "Model trained successfully.",
            slope: Some(m.slope),
            intercept: Some(m.intercept),
            r2: Some(m.r2),
            mae: Some(m.mae),
            rmse: Some(m.rmse),
            fit_quality: Some(quality),
            interpretation,
        }
    }
}
