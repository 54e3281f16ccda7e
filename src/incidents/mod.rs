pub mod dedup;
pub mod filters;
pub mod ingest;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub use dedup::{find_duplicates, DuplicateGroup, DuplicateReport};
pub use filters::{filter_by_category, filter_by_date, DateRange, PROPERTY_CRIME_CATEGORIES};
pub use ingest::{load_incidents, read_incidents, IngestReport, RejectedRow};

pub const CRIME_DATE_FORMAT: &str = "%m/%d/%Y";

/// One row of the incident file. `id` is the zero-based data row position in
/// the source file, so rejected rows leave gaps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentRecord {
    pub id: usize,
    pub crime_date: NaiveDate,
    pub crime_time: String,
    pub description: String,
    pub district: String,
    pub latitude: Option<String>,
    pub longitude: Option<String>,
    #[serde(default)]
    pub fields: Vec<String>,
}
