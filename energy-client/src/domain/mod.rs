mod reading;
mod series;

pub use reading::{
    format_month_start, month_start, parse_month_start, ConsumptionSource, Reading, ReadingParseError,
};
pub use series::{group_by_city, CitySeries};

#[cfg(test)]
pub(crate) use series::test_support;
