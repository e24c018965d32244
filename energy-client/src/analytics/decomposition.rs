//! Additive seasonal decomposition of a city's monthly consumption.
//!
//! The decomposer owns the contract (monthly reindexing, gap filling,
//! minimum length, error conversion) and hands the numeric work to a
//! [`SeasonalBackend`]. [`ClassicalAdditive`] is the default backend:
//! centred moving-average trend, linear trend extrapolation from the
//! `period - 2` nearest trend points at each edge, per-phase seasonal means
//! normalized to zero.

use serde::Serialize;
use time::{Date, Month};

use crate::{
    analytics::{error::AnalysisError, stats::{fit_line, mean}},
    domain::CitySeries,
};

pub const DEFAULT_PERIOD: usize = 12;
pub const DEFAULT_MIN_POINTS: usize = 24;

const ANALYSIS: &str = "seasonal decomposition";

/// Trend, seasonal and residual components aligned with the input values.
#[derive(Debug, Clone, PartialEq)]
pub struct Components {
    pub trend: Vec<f64>,
    pub seasonal: Vec<f64>,
    pub residual: Vec<f64>,
}

pub trait SeasonalBackend: Send + Sync {
    fn decompose(&self, values: &[f64], period: usize) -> Result<Components, AnalysisError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ClassicalAdditive;

impl SeasonalBackend for ClassicalAdditive {
    fn decompose(&self, values: &[f64], period: usize) -> Result<Components, AnalysisError> {
        if period < 2 {
            return Err(AnalysisError::ComputationFailure(format!(
                "seasonal period must be at least 2, got {period}"
            )));
        }
        if values.len() < 2 * period {
            return Err(AnalysisError::insufficient(ANALYSIS, 2 * period, values.len()));
        }
        if let Some(idx) = values.iter().position(|v| !v.is_finite()) {
            return Err(AnalysisError::ComputationFailure(format!(
                "non-finite value at position {idx}"
            )));
        }

        let trend = centred_trend(values, period)?;

        let detrended: Vec<f64> = values.iter().zip(&trend).map(|(v, t)| v - t).collect();

        let mut phase_means: Vec<f64> = (0..period)
            .map(|phase| {
                let phase_values: Vec<f64> = detrended.iter().skip(phase).step_by(period).copied().collect();
                mean(&phase_values).unwrap_or(0.0)
            })
            .collect();
        let offset = mean(&phase_means).unwrap_or(0.0);
        for m in &mut phase_means {
            *m -= offset;
        }

        let seasonal: Vec<f64> = (0..values.len()).map(|i| phase_means[i % period]).collect();
        let residual: Vec<f64> = detrended.iter().zip(&seasonal).map(|(d, s)| d - s).collect();

        Ok(Components {
            trend,
            seasonal,
            residual,
        })
    }
}

/// Two-sided moving average (2 x period for even periods), with both edges
/// filled by a least-squares line through the nearest `period - 2` trend
/// points (never fewer than two).
fn centred_trend(values: &[f64], period: usize) -> Result<Vec<f64>, AnalysisError> {
    let n = values.len();
    let weights: Vec<f64> = if period % 2 == 0 {
        let mut w = vec![1.0 / period as f64; period + 1];
        w[0] = 0.5 / period as f64;
        w[period] = 0.5 / period as f64;
        w
    } else {
        vec![1.0 / period as f64; period]
    };
    let half = period / 2;

    let mut trend = vec![0.0; n];
    for i in half..n - half {
        trend[i] = weights
            .iter()
            .enumerate()
            .map(|(k, w)| w * values[i + k - half])
            .sum();
    }

    let front = half;
    let back = n - 1 - half;
    let edge_points = period.saturating_sub(2).max(2);

    let front_last = (front + edge_points).min(back);
    let (slope, intercept) = line_through(&trend, front, front_last)?;
    for (i, t) in trend.iter_mut().enumerate().take(front) {
        *t = slope * i as f64 + intercept;
    }

    let back_first = back.saturating_sub(edge_points).max(front);
    let (slope, intercept) = line_through(&trend, back_first, back)?;
    for (i, t) in trend.iter_mut().enumerate().skip(back + 1) {
        *t = slope * i as f64 + intercept;
    }

    Ok(trend)
}

fn line_through(trend: &[f64], start: usize, end: usize) -> Result<(f64, f64), AnalysisError> {
    let xs: Vec<f64> = (start..end).map(|i| i as f64).collect();
    fit_line(&xs, &trend[start..end]).ok_or_else(|| {
        AnalysisError::ComputationFailure(format!("cannot extrapolate trend from points {start}..{end}"))
    })
}

/// Decomposition of one city's monthly consumption on a regular monthly index.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Decomposition {
    pub city: String,
    pub period: usize,
    pub dates: Vec<Date>,
    pub original: Vec<f64>,
    pub trend: Vec<f64>,
    pub seasonal: Vec<f64>,
    pub residual: Vec<f64>,
    /// Months absent from the input, filled with the series mean.
    pub filled_months: usize,
}

pub struct SeasonalDecomposer<B = ClassicalAdditive> {
    backend: B,
    period: usize,
    min_points: usize,
}

impl Default for SeasonalDecomposer<ClassicalAdditive> {
    fn default() -> Self {
        Self::new(DEFAULT_PERIOD, DEFAULT_MIN_POINTS)
    }
}

impl SeasonalDecomposer<ClassicalAdditive> {
    pub fn new(period: usize, min_points: usize) -> Self {
        Self::with_backend(ClassicalAdditive, period, min_points)
    }
}

impl<B: SeasonalBackend> SeasonalDecomposer<B> {
    pub fn with_backend(backend: B, period: usize, min_points: usize) -> Self {
        Self {
            backend,
            period,
            min_points,
        }
    }

    pub fn decompose(&self, series: &CitySeries) -> Result<Decomposition, AnalysisError> {
        let (dates, observed) = reindex_monthly(series);

        if dates.len() < self.min_points {
            return Err(AnalysisError::insufficient(ANALYSIS, self.min_points, dates.len()));
        }

        let present: Vec<f64> = observed.iter().flatten().copied().collect();
        let fill = mean(&present).unwrap_or(0.0);
        let filled_months = observed.len() - present.len();
        let original: Vec<f64> = observed.iter().map(|v| v.unwrap_or(fill)).collect();

        let components = self.backend.decompose(&original, self.period).map_err(|e| {
            tracing::warn!(city = series.city(), error = %e, "seasonal decomposition failed");
            match e {
                failure @ AnalysisError::ComputationFailure(_) => failure,
                other => AnalysisError::ComputationFailure(other.to_string()),
            }
        })?;

        let n = original.len();
        if components.trend.len() != n || components.seasonal.len() != n || components.residual.len() != n {
            return Err(AnalysisError::ComputationFailure(
                "backend returned components of mismatched length".to_string(),
            ));
        }

        Ok(Decomposition {
            city: series.city().to_string(),
            period: self.period,
            dates,
            original,
            trend: components.trend,
            seasonal: components.seasonal,
            residual: components.residual,
            filled_months,
        })
    }
}

/// Decomposes with a 12-month period and the 24-month minimum.
pub fn decompose(series: &CitySeries) -> Result<Decomposition, AnalysisError> {
    SeasonalDecomposer::<ClassicalAdditive>::default().decompose(series)
}

/// Every month from the first to the last reading, with `None` for gaps.
fn reindex_monthly(series: &CitySeries) -> (Vec<Date>, Vec<Option<f64>>) {
    let readings = series.readings();
    let (Some(first), Some(last)) = (readings.first(), readings.last()) else {
        return (Vec::new(), Vec::new());
    };

    let mut dates = Vec::new();
    let mut values = Vec::new();
    let mut cursor = Some(first.date);
    let mut rows = readings.iter().peekable();

    while let Some(month) = cursor.filter(|d| *d <= last.date) {
        let mut value = None;
        while let Some(r) = rows.next_if(|r| r.date <= month) {
            if r.date == month {
                value = Some(r.consumption_mwh);
            }
        }
        dates.push(month);
        values.push(value);
        cursor = next_month(month);
    }

    (dates, values)
}

fn next_month(date: Date) -> Option<Date> {
    match date.month() {
        Month::December => Date::from_calendar_date(date.year() + 1, Month::January, 1).ok(),
        m => Date::from_calendar_date(date.year(), m.next(), 1).ok(),
    }
}
