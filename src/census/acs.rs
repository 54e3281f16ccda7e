use std::collections::BTreeMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Url;
use serde_json::Value;
use tracing::{info, warn};

use crate::census::fixture::tracts_from_features;
use crate::census::http::{fetch_json, fetch_text};
use crate::census::{
    sanitize_census_value, CensusError, CensusQuery, PopulationProvider, TractPopulation,
};
use crate::geometry::projection::Crs;

pub const DEFAULT_API_BASE: &str = "https://api.census.gov/data";
pub const DEFAULT_BOUNDARIES_URL: &str =
    "https://tigerweb.geo.census.gov/arcgis/rest/services/TIGERweb/tigerWMS_ACS{vintage}/MapServer/8/query";

#[derive(Debug, Clone, PartialEq)]
pub struct TractEstimate {
    pub geoid: String,
    pub name: String,
    pub estimate: f64,
    pub moe: f64,
}

/// American Community Survey estimates from the Census Data API joined with
/// TIGERweb tract boundaries.
#[derive(Debug, Clone)]
pub struct AcsProvider {
    api_base: String,
    boundaries_url: String,
    api_key: String,
}

impl AcsProvider {
    pub fn new(
        api_base: impl Into<String>,
        boundaries_url: impl Into<String>,
        api_key: Option<String>,
    ) -> Result<Self> {
        let api_key = api_key
            .filter(|k| !k.trim().is_empty())
            .ok_or(CensusError::MissingApiKey)?;
        Ok(Self {
            api_base: api_base.into(),
            boundaries_url: boundaries_url.into(),
            api_key,
        })
    }

    pub fn estimates_url(&self, query: &CensusQuery) -> Result<Url> {
        let base = format!(
            "{}/{}/acs/{}",
            self.api_base.trim_end_matches('/'),
            query.vintage,
            query.survey
        );
        let get = format!("NAME,{},{}", query.estimate_field(), query.moe_field());
        let within = format!("state:{} county:{}", query.state, query.county);
        Url::parse_with_params(
            &base,
            &[
                ("get", get.as_str()),
                ("for", "tract:*"),
                ("in", within.as_str()),
                ("key", self.api_key.as_str()),
            ],
        )
        .with_context(|| format!("invalid census API base url: {base}"))
    }

    pub fn boundaries_url(&self, query: &CensusQuery) -> Result<Url> {
        let base = self
            .boundaries_url
            .replace("{vintage}", &query.vintage.to_string());
        let filter = format!("STATE='{}' AND COUNTY='{}'", query.state, query.county);
        Url::parse_with_params(
            &base,
            &[
                ("where", filter.as_str()),
                ("outFields", "GEOID,NAME"),
                ("returnGeometry", "true"),
                ("outSR", "4326"),
                ("f", "geojson"),
            ],
        )
        .with_context(|| format!("invalid tract boundary url: {base}"))
    }
}

#[async_trait]
impl PopulationProvider for AcsProvider {
    fn name(&self) -> &str {
        "census-acs"
    }

    async fn fetch_tracts(&self, query: &CensusQuery) -> Result<Vec<TractPopulation>> {
        let estimates_payload = fetch_json(&self.estimates_url(query)?).await?;
        let estimates = parse_estimates(&estimates_payload, query)?;
        info!(
            rows = estimates.len(),
            "fetched {} {} estimates for {}",
            query.survey,
            query.vintage,
            query.estimate_field()
        );

        let boundaries_text = fetch_text(&self.boundaries_url(query)?).await?;
        let collection: geojson::FeatureCollection =
            boundaries_text
                .parse()
                .map_err(|err: geojson::Error| CensusError::Malformed {
                    what: "tract boundary GeoJSON",
                    message: err.to_string(),
                })?;
        let boundaries = tracts_from_features(&collection.features, Crs::Wgs84, false)?
            .into_iter()
            .map(|t| (t.geoid.clone(), t))
            .collect::<BTreeMap<_, _>>();

        Ok(join_estimates(estimates, boundaries))
    }
}

/// The Census Data API answers with a header row followed by value rows.
pub fn parse_estimates(payload: &Value, query: &CensusQuery) -> Result<Vec<TractEstimate>> {
    let malformed = |message: String| CensusError::Malformed {
        what: "census estimate table",
        message,
    };
    let rows = payload
        .as_array()
        .ok_or_else(|| malformed("expected a JSON array of rows".to_string()))?;
    let Some((header, body)) = rows.split_first() else {
        return Ok(Vec::new());
    };
    let header = header
        .as_array()
        .ok_or_else(|| malformed("header row is not an array".to_string()))?
        .iter()
        .map(|v| v.as_str().unwrap_or_default().to_string())
        .collect::<Vec<_>>();
    let column = |name: &str| {
        header
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| malformed(format!("missing column {name}")))
    };
    let name_idx = column("NAME")?;
    let estimate_idx = column(query.estimate_field().as_str())?;
    let moe_idx = column(query.moe_field().as_str())?;
    let state_idx = column("state")?;
    let county_idx = column("county")?;
    let tract_idx = column("tract")?;

    let mut out = Vec::with_capacity(body.len());
    for (row_idx, row) in body.iter().enumerate() {
        let Some(cells) = row.as_array() else {
            return Err(malformed("value row is not an array".to_string()).into());
        };
        let text = |idx: usize, context: &str| -> std::result::Result<String, CensusError> {
            match cells.get(idx) {
                Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.trim().to_string()),
                Some(Value::Number(n)) => Ok(n.to_string()),
                other => Err(malformed(format!(
                    "{context}: column {} has no value (got {})",
                    header[idx],
                    other.unwrap_or(&Value::Null)
                ))),
            }
        };
        let row_label = format!("row {}", row_idx + 1);
        let geoid = format!(
            "{}{}{}",
            text(state_idx, &row_label)?,
            text(county_idx, &row_label)?,
            text(tract_idx, &row_label)?
        );
        // negative sentinels map to zero; unparseable cells are fatal
        let number = |idx: usize| -> std::result::Result<f64, CensusError> {
            cells
                .get(idx)
                .and_then(crate::census::http::to_f64)
                .map(sanitize_census_value)
                .ok_or_else(|| {
                    malformed(format!(
                        "tract {geoid}: column {} is not numeric (got {})",
                        header[idx],
                        cells.get(idx).unwrap_or(&Value::Null)
                    ))
                })
        };
        out.push(TractEstimate {
            name: text(name_idx, &format!("tract {geoid}"))?,
            estimate: number(estimate_idx)?,
            moe: number(moe_idx)?,
            geoid,
        });
    }
    Ok(out)
}

pub fn join_estimates(
    estimates: Vec<TractEstimate>,
    mut boundaries: BTreeMap<String, TractPopulation>,
) -> Vec<TractPopulation> {
    let mut out = Vec::with_capacity(estimates.len());
    for estimate in estimates {
        let Some(boundary) = boundaries.remove(&estimate.geoid) else {
            warn!("no boundary for tract {}; skipping", estimate.geoid);
            continue;
        };
        out.push(TractPopulation {
            geoid: estimate.geoid,
            name: estimate.name,
            population: estimate.estimate,
            population_moe: estimate.moe,
            ..boundary
        });
    }
    if !boundaries.is_empty() {
        warn!("{} tract boundaries had no estimate", boundaries.len());
    }
    out
}
