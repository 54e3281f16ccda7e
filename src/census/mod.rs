pub mod acs;
pub mod fixture;
pub mod http;

use anyhow::Result;
use async_trait::async_trait;
use geo::MultiPolygon;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::geometry::projection::{reproject, Crs};

pub use acs::AcsProvider;
pub use fixture::{GeoJsonFileProvider, StaticPopulationProvider};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CensusQuery {
    pub state: String,
    pub county: String,
    pub variable: String,
    pub survey: String,
    pub vintage: u16,
}

impl CensusQuery {
    pub fn estimate_field(&self) -> String {
        format!("{}E", self.variable)
    }

    pub fn moe_field(&self) -> String {
        format!("{}M", self.variable)
    }
}

impl Default for CensusQuery {
    fn default() -> Self {
        // Baltimore City, total population, ACS 5-year 2018
        Self {
            state: "24".to_string(),
            county: "510".to_string(),
            variable: "B01003_001".to_string(),
            survey: "acs5".to_string(),
            vintage: 2018,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TractPopulation {
    pub geoid: String,
    pub name: String,
    pub population: f64,
    pub population_moe: f64,
    pub geometry: MultiPolygon<f64>,
    pub crs: Crs,
}

#[derive(Debug, Error)]
pub enum CensusError {
    #[error("census API key is not configured (set census.api_key or CENSUS_API_KEY)")]
    MissingApiKey,
    #[error("malformed {what}: {message}")]
    Malformed { what: &'static str, message: String },
    #[error("census query returned no tracts for state {state} county {county}")]
    NoTracts { state: String, county: String },
}

/// Given geography parameters, returns tract polygons with population
/// estimates. Implementations may hit the network or read fixtures.
#[async_trait]
pub trait PopulationProvider: Send + Sync {
    fn name(&self) -> &str;
    async fn fetch_tracts(&self, query: &CensusQuery) -> Result<Vec<TractPopulation>>;
}

/// Fetches tracts and reprojects them into `target`. Provider failures and
/// empty results are fatal.
pub async fn load_population(
    provider: &dyn PopulationProvider,
    query: &CensusQuery,
    target: Crs,
) -> Result<Vec<TractPopulation>> {
    let tracts = provider.fetch_tracts(query).await?;
    if tracts.is_empty() {
        return Err(CensusError::NoTracts {
            state: query.state.clone(),
            county: query.county.clone(),
        }
        .into());
    }

    let mut out = Vec::with_capacity(tracts.len());
    for tract in tracts {
        let geometry = reproject(&tract.geometry, tract.crs, target)?;
        out.push(TractPopulation {
            geometry,
            crs: target,
            ..tract
        });
    }
    info!(
        tracts = out.len(),
        provider = provider.name(),
        "loaded tract populations in {target}"
    );
    Ok(out)
}

/// Census publishes negative sentinels (e.g. -666666666) for unavailable values.
pub fn sanitize_census_value(value: f64) -> f64 {
    if value.is_finite() && value >= 0.0 {
        value
    } else {
        0.0
    }
}
