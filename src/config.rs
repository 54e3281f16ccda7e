use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::aggregate::RateOptions;
use crate::census::acs::{DEFAULT_API_BASE, DEFAULT_BOUNDARIES_URL};
use crate::census::CensusQuery;
use crate::geometry::Crs;
use crate::incidents::filters::{default_categories, DateRange};
use crate::output::map::MapOptions;
use crate::output::scatter::ScatterOptions;
use crate::pipeline::{ArtifactPaths, PipelineParams};
use crate::unemployment::UnemploymentColumns;

pub const API_KEY_ENV: &str = "CENSUS_API_KEY";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub input: InputConfig,
    #[serde(default)]
    pub census: CensusConfig,
    #[serde(default)]
    pub filters: FiltersConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub map: MapConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputConfig {
    #[serde(default = "default_incidents_path")]
    pub incidents_path: String,
    #[serde(default)]
    pub unemployment_path: String,
    #[serde(default = "default_geoid_column")]
    pub unemployment_geoid_column: String,
    #[serde(default = "default_rate_column")]
    pub unemployment_rate_column: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CensusConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_boundaries_url")]
    pub boundaries_url: String,
    /// Local GeoJSON with population properties; skips the network when set.
    #[serde(default)]
    pub boundaries_path: String,
    #[serde(default = "default_state")]
    pub state: String,
    #[serde(default = "default_county")]
    pub county: String,
    #[serde(default = "default_variable")]
    pub variable: String,
    #[serde(default = "default_survey")]
    pub survey: String,
    #[serde(default = "default_vintage")]
    pub vintage: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FiltersConfig {
    #[serde(default = "default_start_date")]
    pub start_date: NaiveDate,
    #[serde(default = "default_end_date")]
    pub end_date: NaiveDate,
    #[serde(default = "default_categories")]
    pub categories: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    #[serde(default = "default_target_year")]
    pub target_year: i32,
    #[serde(default)]
    pub zero_fill_tracts: bool,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapConfig {
    #[serde(default = "default_bins")]
    pub bins: usize,
    #[serde(default = "default_fill_opacity")]
    pub fill_opacity: f64,
    #[serde(default = "default_line_color")]
    pub line_color: String,
    #[serde(default = "default_line_weight")]
    pub line_weight: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_output_dir")]
    pub dir: String,
}

#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub incidents_path: Option<String>,
    pub unemployment_path: Option<String>,
    pub target_year: Option<i32>,
    pub output_dir: Option<String>,
}

impl Config {
    pub fn default_path() -> PathBuf {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        home.join(".config/crime-atlas/config.toml")
    }

    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path
            .map(|p| p.to_path_buf())
            .unwrap_or_else(Self::default_path);
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = fs::read_to_string(&path)
            .with_context(|| format!("failed reading config: {}", path.display()))?;
        let parsed: Self = toml::from_str(&data)
            .with_context(|| format!("failed parsing TOML config: {}", path.display()))?;
        Ok(parsed)
    }

    pub fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(path) = overrides.incidents_path {
            self.input.incidents_path = path;
        }
        if let Some(path) = overrides.unemployment_path {
            self.input.unemployment_path = path;
        }
        if let Some(year) = overrides.target_year {
            self.analysis.target_year = year;
        }
        if let Some(dir) = overrides.output_dir {
            self.output.dir = dir;
        }
    }

    pub fn write_template(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed creating config directory: {}", parent.display())
            })?;
        }
        fs::write(path, Self::default_template())
            .with_context(|| format!("failed writing config template: {}", path.display()))
    }

    /// Config value first, then the environment.
    pub fn api_key(&self) -> Option<String> {
        let configured = self.census.api_key.trim();
        if !configured.is_empty() {
            return Some(configured.to_string());
        }
        env::var(API_KEY_ENV)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    pub fn resolved_incidents_path(&self) -> PathBuf {
        expand_tilde(&self.input.incidents_path)
    }

    pub fn resolved_unemployment_path(&self) -> Option<PathBuf> {
        let path = self.input.unemployment_path.trim();
        (!path.is_empty()).then(|| expand_tilde(path))
    }

    pub fn resolved_boundaries_path(&self) -> Option<PathBuf> {
        let path = self.census.boundaries_path.trim();
        (!path.is_empty()).then(|| expand_tilde(path))
    }

    pub fn artifact_paths(&self) -> ArtifactPaths {
        ArtifactPaths::in_dir(&expand_tilde(&self.output.dir))
    }

    pub fn date_range(&self) -> Result<DateRange> {
        Ok(DateRange::new(self.filters.start_date, self.filters.end_date)?)
    }

    pub fn census_query(&self) -> CensusQuery {
        CensusQuery {
            state: self.census.state.clone(),
            county: self.census.county.clone(),
            variable: self.census.variable.clone(),
            survey: self.census.survey.clone(),
            vintage: self.census.vintage,
        }
    }

    pub fn unemployment_columns(&self) -> UnemploymentColumns {
        UnemploymentColumns {
            geoid: self.input.unemployment_geoid_column.clone(),
            rate: self.input.unemployment_rate_column.clone(),
        }
    }

    pub fn map_options(&self) -> MapOptions {
        MapOptions {
            bins: self.map.bins,
            fill_opacity: self.map.fill_opacity,
            line_color: self.map.line_color.clone(),
            line_weight: self.map.line_weight,
            year: self.analysis.target_year,
            ..MapOptions::default()
        }
    }

    pub fn scatter_options(&self) -> ScatterOptions {
        ScatterOptions {
            confidence: self.analysis.confidence,
            ..ScatterOptions::default()
        }
    }

    pub fn pipeline_params(&self) -> Result<PipelineParams> {
        Ok(PipelineParams {
            incidents_path: self.resolved_incidents_path(),
            date_range: self.date_range()?,
            categories: self.filters.categories.clone(),
            query: self.census_query(),
            target_year: self.analysis.target_year,
            rate_options: RateOptions {
                zero_fill: self.analysis.zero_fill_tracts,
            },
            working_crs: Crs::MarylandStatePlane,
        })
    }

    pub fn default_template() -> String {
        let template = r#"[input]
incidents_path = "BPD_Part_1_Victim_Based_Crime_Data.csv"
unemployment_path = ""
unemployment_geoid_column = "GEOID"
unemployment_rate_column = "unemployment_rate"

[census]
# falls back to the CENSUS_API_KEY environment variable
api_key = ""
api_base = "https://api.census.gov/data"
boundaries_url = "https://tigerweb.geo.census.gov/arcgis/rest/services/TIGERweb/tigerWMS_ACS{vintage}/MapServer/8/query"
boundaries_path = ""
state = "24"
county = "510"
variable = "B01003_001"
survey = "acs5"
vintage = 2018

[filters]
start_date = "2014-01-01"
end_date = "2018-12-31"
categories = [
  "BURGLARY",
  "LARCENY",
  "LARCENY FROM AUTO",
  "AUTO THEFT",
  "ARSON",
  "ROBBERY - STREET",
  "ROBBERY - CARJACKING",
  "ROBBERY - COMMERCIAL",
  "ROBBERY - RESIDENCE",
]

[analysis]
target_year = 2018
zero_fill_tracts = false
confidence = 0.95

[map]
bins = 4
fill_opacity = 0.7
line_color = "white"
line_weight = 0.5

[output]
dir = "./crime-atlas-output"
"#;
        template.to_string()
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            incidents_path: default_incidents_path(),
            unemployment_path: String::new(),
            unemployment_geoid_column: default_geoid_column(),
            unemployment_rate_column: default_rate_column(),
        }
    }
}

impl Default for CensusConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_base: default_api_base(),
            boundaries_url: default_boundaries_url(),
            boundaries_path: String::new(),
            state: default_state(),
            county: default_county(),
            variable: default_variable(),
            survey: default_survey(),
            vintage: default_vintage(),
        }
    }
}

impl Default for FiltersConfig {
    fn default() -> Self {
        Self {
            start_date: default_start_date(),
            end_date: default_end_date(),
            categories: default_categories(),
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            target_year: default_target_year(),
            zero_fill_tracts: false,
            confidence: default_confidence(),
        }
    }
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            bins: default_bins(),
            fill_opacity: default_fill_opacity(),
            line_color: default_line_color(),
            line_weight: default_line_weight(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
        }
    }
}

fn default_incidents_path() -> String {
    "BPD_Part_1_Victim_Based_Crime_Data.csv".to_string()
}

fn default_geoid_column() -> String {
    UnemploymentColumns::default().geoid
}

fn default_rate_column() -> String {
    UnemploymentColumns::default().rate
}

fn default_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}

fn default_boundaries_url() -> String {
    DEFAULT_BOUNDARIES_URL.to_string()
}

fn default_state() -> String {
    CensusQuery::default().state
}

fn default_county() -> String {
    CensusQuery::default().county
}

fn default_variable() -> String {
    CensusQuery::default().variable
}

fn default_survey() -> String {
    CensusQuery::default().survey
}

fn default_vintage() -> u16 {
    CensusQuery::default().vintage
}

fn default_start_date() -> NaiveDate {
    DateRange::default().start
}

fn default_end_date() -> NaiveDate {
    DateRange::default().end
}

fn default_target_year() -> i32 {
    2018
}

fn default_confidence() -> f64 {
    0.95
}

fn default_bins() -> usize {
    4
}

fn default_fill_opacity() -> f64 {
    0.7
}

fn default_line_color() -> String {
    "white".to_string()
}

fn default_line_weight() -> f64 {
    0.5
}

fn default_output_dir() -> String {
    "./crime-atlas-output".to_string()
}
