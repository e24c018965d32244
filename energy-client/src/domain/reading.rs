use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use time::{Date, Month};

/// Where a city's consumption figures come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConsumptionSource {
    /// Published utility figures.
    Real,
    /// Synthetic monthly profile.
    Simulated,
}

impl ConsumptionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Real => "Real",
            Self::Simulated => "Simulated",
        }
    }
}

impl fmt::Display for ConsumptionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ReadingParseError {
    #[error("unknown consumption source '{0}'")]
    UnknownSource(String),
    #[error("invalid reading date '{0}': expected YYYY-MM-01")]
    InvalidDate(String),
    #[error("reading date {0} is not the first day of a month")]
    NotMonthStart(Date),
}

impl FromStr for ConsumptionSource {
    type Err = ReadingParseError;

    /// Accepts the canonical labels plus qualified variants such as
    /// `"Real (utility feed)"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let label = s.trim().to_ascii_lowercase();
        if label.starts_with("real") {
            Ok(Self::Real)
        } else if label.starts_with("simulated") {
            Ok(Self::Simulated)
        } else {
            Err(ReadingParseError::UnknownSource(s.to_string()))
        }
    }
}

/// One (city, month) record of consumption, temperature and population.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub city: String,
    /// Always the first day of a month.
    pub date: Date,
    pub consumption_mwh: f64,
    pub temperature_c: f64,
    pub population_millions: Option<f64>,
    pub source: ConsumptionSource,
}

impl Reading {
    pub fn year(&self) -> i32 {
        self.date.year()
    }

    pub fn month(&self) -> Month {
        self.date.month()
    }

    /// Calendar month number, 1 to 12.
    pub fn month_number(&self) -> u8 {
        u8::from(self.date.month())
    }
}

/// Parses a `YYYY-MM-01` storage date.
pub fn parse_month_start(s: &str) -> Result<Date, ReadingParseError> {
    let format = time::macros::format_description!("[year]-[month]-[day]");
    let date = Date::parse(s.trim(), &format).map_err(|_| ReadingParseError::InvalidDate(s.to_string()))?;
    if date.day() != 1 {
        return Err(ReadingParseError::NotMonthStart(date));
    }
    Ok(date)
}

/// First-of-month date for a year and a month number.
pub fn month_start(year: i32, month: u8) -> Result<Date, ReadingParseError> {
    Month::try_from(month)
        .ok()
        .and_then(|m| Date::from_calendar_date(year, m, 1).ok())
        .ok_or_else(|| ReadingParseError::InvalidDate(format!("{year}-{month:02}-01")))
}

/// Formats a month-start date the way it is stored (`YYYY-MM-01`).
pub fn format_month_start(date: Date) -> String {
    format!("{:04}-{:02}-{:02}", date.year(), u8::from(date.month()), date.day())
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    #[test]
    fn source_parses_canonical_and_qualified_labels() {
        assert_eq!("Real".parse::<ConsumptionSource>(), Ok(ConsumptionSource::Real));
        assert_eq!("Real (utility feed)".parse::<ConsumptionSource>(), Ok(ConsumptionSource::Real));
        assert_eq!(" simulated ".parse::<ConsumptionSource>(), Ok(ConsumptionSource::Simulated));
        assert!(matches!(
            "guess".parse::<ConsumptionSource>(),
            Err(ReadingParseError::UnknownSource(_))
        ));
    }

    #[test]
    fn month_start_dates_round_trip_through_storage_format() {
        let d = parse_month_start("2023-07-01").unwrap();
        assert_eq!(d, date!(2023 - 07 - 01));
        assert_eq!(format_month_start(d), "2023-07-01");
    }

    #[test]
    fn parse_month_start_rejects_mid_month_and_garbage() {
        assert_eq!(
            parse_month_start("2023-07-15"),
            Err(ReadingParseError::NotMonthStart(date!(2023 - 07 - 15)))
        );
        assert!(matches!(parse_month_start("July 2023"), Err(ReadingParseError::InvalidDate(_))));
    }

    #[test]
    fn month_start_rejects_out_of_range_month() {
        assert_eq!(month_start(2023, 12).unwrap(), date!(2023 - 12 - 01));
        assert!(month_start(2023, 13).is_err());
        assert!(month_start(2023, 0).is_err());
    }
}
