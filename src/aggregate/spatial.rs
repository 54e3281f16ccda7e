use std::collections::BTreeMap;

use chrono::Datelike;
use geo::{BoundingRect, Intersects, Rect};
use thiserror::Error;
use tracing::{debug, info};

use crate::aggregate::TractYearAggregate;
use crate::census::TractPopulation;
use crate::geometry::projection::Crs;
use crate::geometry::LocatedIncident;

#[derive(Debug, Error, PartialEq)]
pub enum SpatialError {
    #[error("tract {geoid} is in {tract_crs} but incidents are in {incident_crs}")]
    CrsMismatch {
        geoid: String,
        tract_crs: Crs,
        incident_crs: Crs,
    },
}

/// One (incident, tract) match. An incident on a shared boundary matches every
/// tract it touches.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinedIncident {
    pub incident_id: usize,
    pub year: i32,
    pub geoid: String,
    pub population: f64,
    pub population_moe: f64,
}

struct IndexedTract<'a> {
    tract: &'a TractPopulation,
    bounds: Option<Rect<f64>>,
}

pub fn spatial_join(
    tracts: &[TractPopulation],
    incidents: &[LocatedIncident],
) -> Result<Vec<JoinedIncident>, SpatialError> {
    let incident_crs = incidents.first().map(|i| i.crs);
    if let Some(incident_crs) = incident_crs {
        if let Some(bad) = tracts.iter().find(|t| t.crs != incident_crs) {
            return Err(SpatialError::CrsMismatch {
                geoid: bad.geoid.clone(),
                tract_crs: bad.crs,
                incident_crs,
            });
        }
    }

    let indexed = tracts
        .iter()
        .map(|tract| IndexedTract {
            tract,
            bounds: tract.geometry.bounding_rect(),
        })
        .collect::<Vec<_>>();

    let mut joined = Vec::new();
    let mut unmatched = 0usize;
    for incident in incidents {
        let before = joined.len();
        for candidate in &indexed {
            let Some(bounds) = candidate.bounds else {
                continue;
            };
            if !bounds.intersects(&incident.point.0) {
                continue;
            }
            if candidate.tract.geometry.intersects(&incident.point.0) {
                joined.push(JoinedIncident {
                    incident_id: incident.record.id,
                    year: incident.record.crime_date.year(),
                    geoid: candidate.tract.geoid.clone(),
                    population: candidate.tract.population,
                    population_moe: candidate.tract.population_moe,
                });
            }
        }
        match joined.len() - before {
            0 => unmatched += 1,
            1 => {}
            n => debug!(
                incident = incident.record.id,
                "incident matched {n} tracts on a shared boundary"
            ),
        }
    }

    info!(
        matches = joined.len(),
        unmatched, "joined incidents to {} tracts", tracts.len()
    );
    Ok(joined)
}

/// Groups by (tract, year). Population and its margin of error are constant
/// within a tract, so `max` collapses the per-incident copies. Tracts without
/// incidents in a year produce no row.
pub fn aggregate_by_tract_year(joined: &[JoinedIncident]) -> Vec<TractYearAggregate> {
    let mut groups: BTreeMap<(&str, i32), TractYearAggregate> = BTreeMap::new();
    for row in joined {
        let entry = groups
            .entry((row.geoid.as_str(), row.year))
            .or_insert_with(|| TractYearAggregate {
                geoid: row.geoid.clone(),
                year: row.year,
                population: row.population,
                population_moe: row.population_moe,
                incident_count: 0,
            });
        entry.population = entry.population.max(row.population);
        entry.population_moe = entry.population_moe.max(row.population_moe);
        entry.incident_count += 1;
    }
    groups.into_values().collect()
}
