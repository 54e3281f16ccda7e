use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::incidents::IncidentRecord;

pub const PROPERTY_CRIME_CATEGORIES: [&str; 9] = [
    "BURGLARY",
    "LARCENY",
    "LARCENY FROM AUTO",
    "AUTO THEFT",
    "ARSON",
    "ROBBERY - STREET",
    "ROBBERY - CARJACKING",
    "ROBBERY - COMMERCIAL",
    "ROBBERY - RESIDENCE",
];

#[derive(Debug, Error)]
#[error("date range start {start} is after end {end}")]
pub struct DateRangeError {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// Inclusive on both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, DateRangeError> {
        if start > end {
            return Err(DateRangeError { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

impl Default for DateRange {
    fn default() -> Self {
        Self {
            start: NaiveDate::from_ymd_opt(2014, 1, 1).unwrap_or(NaiveDate::MIN),
            end: NaiveDate::from_ymd_opt(2018, 12, 31).unwrap_or(NaiveDate::MAX),
        }
    }
}

pub fn filter_by_date(records: &[IncidentRecord], range: &DateRange) -> Vec<IncidentRecord> {
    records
        .iter()
        .filter(|r| range.contains(r.crime_date))
        .cloned()
        .collect()
}

pub fn filter_by_category<S: AsRef<str>>(
    records: &[IncidentRecord],
    allowed: &[S],
) -> Vec<IncidentRecord> {
    records
        .iter()
        .filter(|r| allowed.iter().any(|c| c.as_ref() == r.description))
        .cloned()
        .collect()
}

pub fn default_categories() -> Vec<String> {
    PROPERTY_CRIME_CATEGORIES
        .iter()
        .map(|c| c.to_string())
        .collect()
}
