use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::domain::Reading;

/// All readings for one city, ordered by date ascending.
///
/// Months need not be contiguous; analyses that need a regular monthly
/// index (seasonal decomposition) reindex on their own.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CitySeries {
    city: String,
    readings: Vec<Reading>,
}

impl CitySeries {
    /// Builds a series from readings belonging to `city`, sorting them by date.
    ///
    /// Readings for other cities are ignored.
    pub fn new(city: impl Into<String>, readings: impl IntoIterator<Item = Reading>) -> Self {
        let city = city.into();
        let mut readings: Vec<Reading> = readings.into_iter().filter(|r| r.city == city).collect();
        readings.sort_by_key(|r| r.date);
        Self { city, readings }
    }

    pub fn empty(city: impl Into<String>) -> Self {
        Self {
            city: city.into(),
            readings: Vec::new(),
        }
    }

    pub fn city(&self) -> &str {
        &self.city
    }

    pub fn readings(&self) -> &[Reading] {
        &self.readings
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    pub fn consumption(&self) -> Vec<f64> {
        self.readings.iter().map(|r| r.consumption_mwh).collect()
    }

    pub fn temperatures(&self) -> Vec<f64> {
        self.readings.iter().map(|r| r.temperature_c).collect()
    }

    /// Distinct calendar years present, ascending.
    pub fn years(&self) -> BTreeSet<i32> {
        self.readings.iter().map(Reading::year).collect()
    }

    /// Readings of a single calendar year.
    pub fn for_year(&self, year: i32) -> Self {
        self.filtered(|r| r.year() == year)
    }

    /// Readings whose temperature lies in `[min_c, max_c]`.
    pub fn within_temperature(&self, min_c: f64, max_c: f64) -> Self {
        self.filtered(|r| r.temperature_c >= min_c && r.temperature_c <= max_c)
    }

    fn filtered(&self, keep: impl Fn(&Reading) -> bool) -> Self {
        Self {
            city: self.city.clone(),
            readings: self.readings.iter().filter(|r| keep(r)).cloned().collect(),
        }
    }
}

/// Splits a flat table into per-city series keyed by city name.
pub fn group_by_city(readings: impl IntoIterator<Item = Reading>) -> BTreeMap<String, CitySeries> {
    let mut buckets: BTreeMap<String, Vec<Reading>> = BTreeMap::new();
    for r in readings {
        buckets.entry(r.city.clone()).or_default().push(r);
    }

    buckets
        .into_iter()
        .map(|(city, rows)| {
            let series = CitySeries::new(city.clone(), rows);
            (city, series)
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod test_support {
    use time::Date;

    use crate::domain::{ConsumptionSource, Reading};

    pub fn reading(city: &str, date: Date, consumption_mwh: f64, temperature_c: f64) -> Reading {
        Reading {
            city: city.to_string(),
            date,
            consumption_mwh,
            temperature_c,
            population_millions: Some(1.0),
            source: ConsumptionSource::Simulated,
        }
    }

    /// Consecutive months starting at `start_year`-01 with the given consumption values.
    pub fn monthly(city: &str, start_year: i32, consumption: &[f64]) -> Vec<Reading> {
        consumption
            .iter()
            .enumerate()
            .map(|(i, &c)| {
                let year = start_year + (i / 12) as i32;
                let month = (i % 12) as u8 + 1;
                let date = crate::domain::month_start(year, month).unwrap();
                reading(city, date, c, 10.0 + month as f64)
            })
            .collect()
    }
}
