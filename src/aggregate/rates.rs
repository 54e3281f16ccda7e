use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::aggregate::TractYearAggregate;
use crate::census::TractPopulation;

/// Rates are reported per 1,000 residents.
pub const RATE_SCALE: f64 = 1_000.0;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateOptions {
    /// Emit a zero-count record for tracts with no incidents in the target year.
    pub zero_fill: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateRecord {
    pub geoid: String,
    pub year: i32,
    pub incident_count: u64,
    pub population: f64,
    pub population_moe: f64,
    pub crime_rate: Option<f64>,
    pub crime_rate_moe: Option<f64>,
}

/// ACS margin of error for a proportion `numerator / denominator`.
///
/// Uses `sqrt(moe_num^2 - p^2 * moe_den^2) / den`; when the radicand is
/// negative the ratio form `sqrt(moe_num^2 + p^2 * moe_den^2) / den` applies.
/// Returns `None` for a non-positive denominator.
pub fn proportion_moe(numerator: f64, denominator: f64, moe_num: f64, moe_den: f64) -> Option<f64> {
    if denominator <= 0.0 || !denominator.is_finite() {
        return None;
    }
    let p = numerator / denominator;
    let radicand = moe_num.powi(2) - p.powi(2) * moe_den.powi(2);
    let radicand = if radicand < 0.0 {
        moe_num.powi(2) + p.powi(2) * moe_den.powi(2)
    } else {
        radicand
    };
    Some(radicand.sqrt() / denominator)
}

pub fn rate_for(aggregate: &TractYearAggregate) -> RateRecord {
    let count = aggregate.incident_count as f64;
    let (crime_rate, crime_rate_moe) = if aggregate.population > 0.0 {
        // the incident count is a full enumeration, so its own MOE is zero
        let moe = proportion_moe(count, aggregate.population, 0.0, aggregate.population_moe)
            .map(|m| m * RATE_SCALE);
        (Some(count / aggregate.population * RATE_SCALE), moe)
    } else {
        (None, None)
    };
    RateRecord {
        geoid: aggregate.geoid.clone(),
        year: aggregate.year,
        incident_count: aggregate.incident_count,
        population: aggregate.population,
        population_moe: aggregate.population_moe,
        crime_rate,
        crime_rate_moe,
    }
}

pub fn compute_rates(
    aggregates: &[TractYearAggregate],
    tracts: &[TractPopulation],
    target_year: i32,
    options: RateOptions,
) -> Vec<RateRecord> {
    let mut year_rows = aggregates
        .iter()
        .filter(|a| a.year == target_year)
        .cloned()
        .collect::<Vec<_>>();

    if options.zero_fill {
        let present = year_rows
            .iter()
            .map(|a| a.geoid.clone())
            .collect::<BTreeSet<_>>();
        for tract in tracts {
            if present.contains(&tract.geoid) {
                continue;
            }
            year_rows.push(TractYearAggregate {
                geoid: tract.geoid.clone(),
                year: target_year,
                population: tract.population,
                population_moe: tract.population_moe,
                incident_count: 0,
            });
        }
        year_rows.sort_by(|a, b| a.geoid.cmp(&b.geoid));
        year_rows.dedup_by(|a, b| a.geoid == b.geoid);
    }

    let rates = year_rows.iter().map(rate_for).collect::<Vec<_>>();
    let missing = rates.iter().filter(|r| r.crime_rate.is_none()).count();
    info!(
        tracts = rates.len(),
        missing_rate = missing,
        "computed {target_year} crime rates per {RATE_SCALE} residents"
    );
    rates
}
