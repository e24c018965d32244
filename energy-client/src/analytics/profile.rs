//! Month-of-year consumption profiles, one per calendar year.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::{
    analytics::{error::AnalysisError, kpi::month_label},
    domain::CitySeries,
};

pub const MIN_YEARS: usize = 2;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthPoint {
    pub month: u8,
    pub label: &'static str,
    pub consumption_mwh: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct YearProfile {
    pub year: i32,
    /// Months present in that year, in calendar order.
    pub months: Vec<MonthPoint>,
}

/// Groups a series into per-year month profiles so seasons can be compared
/// across years. Needs readings from at least two distinct years.
pub fn yearly_profiles(series: &CitySeries) -> Result<Vec<YearProfile>, AnalysisError> {
    let years = series.years().len();
    if years < MIN_YEARS {
        return Err(AnalysisError::insufficient("year-over-year seasonal profile (years)", MIN_YEARS, years));
    }

    let mut by_year: BTreeMap<i32, Vec<MonthPoint>> = BTreeMap::new();
    for r in series.readings() {
        by_year.entry(r.year()).or_default().push(MonthPoint {
            month: r.month_number(),
            label: month_label(r.month_number()),
            consumption_mwh: r.consumption_mwh,
        });
    }

    Ok(by_year
        .into_iter()
        .map(|(year, mut months)| {
            months.sort_by_key(|m| m.month);
            YearProfile { year, months }
        })
        .collect())
}
