//! Per-city key performance indicators.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::{analytics::stats::mean, domain::CitySeries};

const MONTH_LABELS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

/// Label used when no month applies.
pub const NO_MONTH: &str = "N/A";

/// Three-letter label for a month number; `"N/A"` outside 1..=12.
pub fn month_label(month: u8) -> &'static str {
    match month {
        1..=12 => MONTH_LABELS[usize::from(month) - 1],
        _ => NO_MONTH,
    }
}

/// Summary scalars of one city series. Recomputed on every request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KpiSummary {
    pub total_consumption_mwh: f64,
    /// kWh per person over the covered period.
    pub per_capita_kwh: f64,
    pub peak_month: &'static str,
    pub peak_consumption_mwh: f64,
    pub trough_month: &'static str,
    pub trough_consumption_mwh: f64,
    pub mean_temperature_c: f64,
}

impl KpiSummary {
    pub fn empty() -> Self {
        Self {
            total_consumption_mwh: 0.0,
            per_capita_kwh: 0.0,
            peak_month: NO_MONTH,
            peak_consumption_mwh: 0.0,
            trough_month: NO_MONTH,
            trough_consumption_mwh: 0.0,
            mean_temperature_c: 0.0,
        }
    }
}

pub fn compute_kpis(series: &CitySeries) -> KpiSummary {
    if series.is_empty() {
        return KpiSummary::empty();
    }

    let readings = series.readings();
    let total: f64 = readings.iter().map(|r| r.consumption_mwh).sum();

    let populations: Vec<f64> = readings.iter().filter_map(|r| r.population_millions).collect();
    let per_capita_kwh = match mean(&populations) {
        Some(pop) if pop > 0.0 => (total / (pop * 1_000_000.0)) * 1000.0,
        _ => 0.0,
    };

    // Month-of-year buckets summed across all years, iterated in month order.
    let mut by_month: BTreeMap<u8, f64> = BTreeMap::new();
    for r in readings {
        *by_month.entry(r.month_number()).or_insert(0.0) += r.consumption_mwh;
    }

    let mut peak: Option<(u8, f64)> = None;
    let mut trough: Option<(u8, f64)> = None;
    for (&month, &value) in &by_month {
        if peak.map_or(true, |(_, best)| value > best) {
            peak = Some((month, value));
        }
        if trough.map_or(true, |(_, best)| value < best) {
            trough = Some((month, value));
        }
    }

    let (peak_month, peak_value) = peak.unwrap_or((0, 0.0));
    let (trough_month, trough_value) = trough.unwrap_or((0, 0.0));

    KpiSummary {
        total_consumption_mwh: total,
        per_capita_kwh,
        peak_month: month_label(peak_month),
        peak_consumption_mwh: peak_value,
        trough_month: month_label(trough_month),
        trough_consumption_mwh: trough_value,
        mean_temperature_c: mean(&series.temperatures()).unwrap_or(0.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::test_support::{monthly, reading};
    use time::macros::date;

    #[test]
    fn empty_series_yields_zero_kpis_and_na_months() {
        let kpis = compute_kpis(&CitySeries::empty("Berlin"));
        assert_eq!(kpis, KpiSummary::empty());
        assert_eq!(kpis.peak_month, "N/A");
        assert_eq!(kpis.trough_month, "N/A");
    }

    #[test]
    fn totals_per_capita_and_mean_temperature() {
        let mut rows = vec![
            reading("Berlin", date!(2023 - 01 - 01), 100.0, 5.0),
            reading("Berlin", date!(2023 - 02 - 01), 100.0, 5.0),
            reading("Berlin", date!(2023 - 03 - 01), 100.0, 5.0),
        ];
        for r in &mut rows {
            r.population_millions = Some(2.0);
        }
        let kpis = compute_kpis(&CitySeries::new("Berlin", rows));

        assert_eq!(kpis.total_consumption_mwh, 300.0);
        // 300 MWh over 2 million people = 0.15 kWh per person
        assert!((kpis.per_capita_kwh - 0.15).abs() < 1e-12);
        assert_eq!(kpis.mean_temperature_c, 5.0);
    }

    #[test]
    fn per_capita_is_zero_without_population() {
        let mut rows = monthly("Berlin", 2023, &[10.0, 20.0]);
        rows[0].population_millions = Some(0.0);
        rows[1].population_millions = Some(0.0);
        assert_eq!(compute_kpis(&CitySeries::new("Berlin", rows.clone())).per_capita_kwh, 0.0);

        for r in &mut rows {
            r.population_millions = None;
        }
        assert_eq!(compute_kpis(&CitySeries::new("Berlin", rows)).per_capita_kwh, 0.0);
    }

    #[test]
    fn peak_and_trough_sum_month_buckets_across_years() {
        let mut values = vec![100.0; 24];
        values[6] = 50.0; // Jul 2023
        values[18] = 500.0; // Jul 2024 -> Jul bucket 550
        values[1] = 90.0; // Feb 2023 -> Feb bucket 190
        let kpis = compute_kpis(&CitySeries::new("Berlin", monthly("Berlin", 2023, &values)));

        assert_eq!(kpis.peak_month, "Jul");
        assert_eq!(kpis.peak_consumption_mwh, 550.0);
        assert_eq!(kpis.trough_month, "Feb");
        assert_eq!(kpis.trough_consumption_mwh, 190.0);
    }

    #[test]
    fn ties_resolve_to_lower_month_number() {
        let values = [10.0, 30.0, 30.0, 10.0];
        let kpis = compute_kpis(&CitySeries::new("Berlin", monthly("Berlin", 2023, &values)));
        assert_eq!(kpis.peak_month, "Feb");
        assert_eq!(kpis.trough_month, "Jan");
    }

    #[test]
    fn month_labels_cover_calendar_and_reject_out_of_range() {
        assert_eq!(month_label(1), "Jan");
        assert_eq!(month_label(12), "Dec");
        assert_eq!(month_label(0), "N/A");
        assert_eq!(month_label(13), "N/A");
    }
}
