use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use geo::{Geometry, MultiPolygon};
use geojson::Feature;

use crate::census::http::{number_property, string_property};
use crate::census::{
    sanitize_census_value, CensusError, CensusQuery, PopulationProvider, TractPopulation,
};
use crate::geometry::projection::Crs;

const GEOID_KEYS: [&str; 2] = ["GEOID", "geoid"];
const NAME_KEYS: [&str; 2] = ["NAME", "name"];
const POPULATION_KEYS: [&str; 2] = ["population", "estimate"];
const POPULATION_MOE_KEYS: [&str; 2] = ["population_moe", "moe"];

/// Reads GeoJSON features into tracts. With `require_population`, every feature
/// must carry `population` and `population_moe` properties; otherwise they
/// default to zero and are expected to be joined in later.
pub fn tracts_from_features(
    features: &[Feature],
    crs: Crs,
    require_population: bool,
) -> Result<Vec<TractPopulation>> {
    let malformed = |message: String| CensusError::Malformed {
        what: "tract feature",
        message,
    };
    let mut out = Vec::with_capacity(features.len());
    for (idx, feature) in features.iter().enumerate() {
        let empty = serde_json::Map::new();
        let props = feature.properties.as_ref().unwrap_or(&empty);
        let geoid = string_property(props, &GEOID_KEYS)
            .ok_or_else(|| malformed(format!("feature {idx} has no GEOID")))?;
        let geometry = feature
            .geometry
            .as_ref()
            .ok_or_else(|| malformed(format!("tract {geoid} has no geometry")))?;
        let geometry = to_multi_polygon(&geometry.value)
            .map_err(|message| malformed(format!("tract {geoid}: {message}")))?;

        let population = number_property(props, &POPULATION_KEYS);
        let population_moe = number_property(props, &POPULATION_MOE_KEYS);
        if require_population && (population.is_none() || population_moe.is_none()) {
            return Err(malformed(format!("tract {geoid} lacks population or population_moe")).into());
        }

        out.push(TractPopulation {
            name: string_property(props, &NAME_KEYS).unwrap_or_else(|| geoid.clone()),
            geoid,
            population: population.map(sanitize_census_value).unwrap_or(0.0),
            population_moe: population_moe.map(sanitize_census_value).unwrap_or(0.0),
            geometry,
            crs,
        });
    }
    Ok(out)
}

fn to_multi_polygon(value: &geojson::Value) -> std::result::Result<MultiPolygon<f64>, String> {
    let geometry = Geometry::<f64>::try_from(value.clone()).map_err(|e| e.to_string())?;
    match geometry {
        Geometry::Polygon(polygon) => Ok(MultiPolygon(vec![polygon])),
        Geometry::MultiPolygon(multi) => Ok(multi),
        other => Err(format!("expected polygon geometry, got {other:?}")
            .chars()
            .take(120)
            .collect()),
    }
}

/// Local GeoJSON FeatureCollection with `GEOID`, `NAME`, `population` and
/// `population_moe` properties, in EPSG:4326.
#[derive(Debug, Clone)]
pub struct GeoJsonFileProvider {
    path: PathBuf,
}

impl GeoJsonFileProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl PopulationProvider for GeoJsonFileProvider {
    fn name(&self) -> &str {
        "geojson-file"
    }

    async fn fetch_tracts(&self, _query: &CensusQuery) -> Result<Vec<TractPopulation>> {
        let text = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("failed reading tract file: {}", self.path.display()))?;
        let collection: geojson::FeatureCollection = text
            .parse()
            .with_context(|| format!("invalid GeoJSON in {}", self.path.display()))?;
        tracts_from_features(&collection.features, Crs::Wgs84, true)
    }
}

#[derive(Debug, Clone, Default)]
pub struct StaticPopulationProvider {
    tracts: Vec<TractPopulation>,
}

impl StaticPopulationProvider {
    pub fn new(tracts: Vec<TractPopulation>) -> Self {
        Self { tracts }
    }
}

#[async_trait]
impl PopulationProvider for StaticPopulationProvider {
    fn name(&self) -> &str {
        "static"
    }

    async fn fetch_tracts(&self, _query: &CensusQuery) -> Result<Vec<TractPopulation>> {
        Ok(self.tracts.clone())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use crate::census::fixture::{tracts_from_features, GeoJsonFileProvider};
    use crate::census::{CensusQuery, PopulationProvider};
    use crate::geometry::projection::Crs;

    const TRACTS: &str = r#"{
        "type": "FeatureCollection",
        "features": [
            {
                "type": "Feature",
                "properties": { "GEOID": "24510010100", "NAME": "Tract 101", "population": 2000, "population_moe": 50 },
                "geometry": { "type": "Polygon", "coordinates": [[[-76.62, 39.29], [-76.60, 39.29], [-76.60, 39.31], [-76.62, 39.31], [-76.62, 39.29]]] }
            },
            {
                "type": "Feature",
                "properties": { "GEOID": 24510020100, "population": "0", "population_moe": "12" },
                "geometry": { "type": "MultiPolygon", "coordinates": [[[[-76.60, 39.29], [-76.58, 39.29], [-76.58, 39.31], [-76.60, 39.29]]]] }
            }
        ]
    }"#;

    #[test]
    fn reads_polygon_and_multipolygon_features() {
        let collection: geojson::FeatureCollection = TRACTS.parse().unwrap();
        let tracts = tracts_from_features(&collection.features, Crs::Wgs84, true).unwrap();
        assert_eq!(tracts.len(), 2);
        assert_eq!(tracts[0].geoid, "24510010100");
        assert_eq!(tracts[0].population, 2000.0);
        assert_eq!(tracts[1].geoid, "24510020100");
        assert_eq!(tracts[1].name, "24510020100");
        assert_eq!(tracts[1].population, 0.0);
        assert_eq!(tracts[1].population_moe, 12.0);
    }

    #[test]
    fn point_geometry_is_rejected() {
        let text = r#"{"type":"FeatureCollection","features":[{"type":"Feature","properties":{"GEOID":"1","population":1,"population_moe":1},"geometry":{"type":"Point","coordinates":[-76.6,39.3]}}]}"#;
        let collection: geojson::FeatureCollection = text.parse().unwrap();
        let err = tracts_from_features(&collection.features, Crs::Wgs84, true).unwrap_err();
        assert!(err.to_string().contains("expected polygon"));
    }

    #[test]
    fn missing_population_is_rejected_when_required() {
        let text = r#"{"type":"FeatureCollection","features":[{"type":"Feature","properties":{"GEOID":"1"},"geometry":{"type":"Polygon","coordinates":[[[0,0],[1,0],[1,1],[0,0]]]}}]}"#;
        let collection: geojson::FeatureCollection = text.parse().unwrap();
        assert!(tracts_from_features(&collection.features, Crs::Wgs84, true).is_err());
        let relaxed = tracts_from_features(&collection.features, Crs::Wgs84, false).unwrap();
        assert_eq!(relaxed[0].population, 0.0);
    }

    #[test]
    fn file_provider_reads_fixture() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(TRACTS.as_bytes()).unwrap();
        let provider = GeoJsonFileProvider::new(file.path());
        let tracts = tokio_test::block_on(provider.fetch_tracts(&CensusQuery::default())).unwrap();
        assert_eq!(tracts.len(), 2);
        assert_eq!(provider.name(), "geojson-file");
    }
}
