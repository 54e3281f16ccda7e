pub mod rates;
pub mod spatial;

use serde::{Deserialize, Serialize};

pub use rates::{compute_rates, proportion_moe, RateOptions, RateRecord, RATE_SCALE};
pub use spatial::{aggregate_by_tract_year, spatial_join, JoinedIncident, SpatialError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TractYearAggregate {
    pub geoid: String,
    pub year: i32,
    pub population: f64,
    pub population_moe: f64,
    pub incident_count: u64,
}
