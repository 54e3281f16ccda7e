use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::info;

use crate::aggregate::{
    aggregate_by_tract_year, compute_rates, spatial_join, RateOptions, RateRecord,
    TractYearAggregate,
};
use crate::analysis::CorrelationResult;
use crate::census::{load_population, CensusQuery, PopulationProvider, TractPopulation};
use crate::geometry::{locate_incidents, Crs};
use crate::incidents::dedup::{find_duplicates, DuplicateReport};
use crate::incidents::filters::{filter_by_category, filter_by_date, DateRange};
use crate::incidents::ingest::{load_incidents, IngestReport};
use crate::output::map::{render_choropleth, write_artifact, MapOptions};
use crate::output::scatter::{render_scatter_svg, ScatterOptions};
use crate::output::{json::render_json, rates_to_csv};

/// Everything a run depends on. Nothing is read from ambient state.
#[derive(Debug, Clone)]
pub struct PipelineParams {
    pub incidents_path: PathBuf,
    pub date_range: DateRange,
    pub categories: Vec<String>,
    pub query: CensusQuery,
    pub target_year: i32,
    pub rate_options: RateOptions,
    pub working_crs: Crs,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageCounts {
    pub rows_read: usize,
    pub rows_rejected: usize,
    pub in_date_range: usize,
    pub duplicate_groups: usize,
    pub duplicate_rows: usize,
    pub property_crimes: usize,
    pub located: usize,
    pub missing_coordinates: usize,
    pub invalid_coordinates: usize,
    pub tracts: usize,
    pub joined: usize,
    pub tract_years: usize,
    pub rates: usize,
}

#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub ingest: IngestReport,
    pub duplicates: DuplicateReport,
    pub tracts: Vec<TractPopulation>,
    pub aggregates: Vec<TractYearAggregate>,
    pub rates: Vec<RateRecord>,
    pub counts: StageCounts,
    pub incidents_sha256: String,
    pub provider: String,
}

pub async fn run_pipeline(
    params: &PipelineParams,
    provider: &dyn PopulationProvider,
) -> Result<PipelineOutput> {
    let incidents_sha256 = sha256_file(&params.incidents_path)?;
    let ingest = load_incidents(&params.incidents_path)?;

    let in_range = filter_by_date(&ingest.records, &params.date_range);
    let duplicates = find_duplicates(&in_range);
    let property = filter_by_category(&in_range, &params.categories);
    let located = locate_incidents(&property, params.working_crs)?;

    let tracts = load_population(provider, &params.query, params.working_crs).await?;
    let joined = spatial_join(&tracts, &located.located)?;
    let aggregates = aggregate_by_tract_year(&joined);
    let rates = compute_rates(
        &aggregates,
        &tracts,
        params.target_year,
        params.rate_options,
    );

    let counts = StageCounts {
        rows_read: ingest.total_rows(),
        rows_rejected: ingest.rejected.len(),
        in_date_range: in_range.len(),
        duplicate_groups: duplicates.groups.len(),
        duplicate_rows: duplicates.redundant_rows(),
        property_crimes: property.len(),
        located: located.located.len(),
        missing_coordinates: located.dropped.missing,
        invalid_coordinates: located.dropped.invalid,
        tracts: tracts.len(),
        joined: joined.len(),
        tract_years: aggregates.len(),
        rates: rates.len(),
    };
    info!(
        rows = counts.rows_read,
        property = counts.property_crimes,
        located = counts.located,
        joined = counts.joined,
        rates = counts.rates,
        "pipeline complete"
    );

    Ok(PipelineOutput {
        ingest,
        duplicates,
        tracts,
        aggregates,
        rates,
        counts,
        incidents_sha256,
        provider: provider.name().to_string(),
    })
}

pub fn sha256_file(path: &Path) -> Result<String> {
    let file = File::open(path)
        .with_context(|| format!("failed opening {} for hashing", path.display()))?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let read = reader
            .read(&mut buf)
            .with_context(|| format!("failed reading {}", path.display()))?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationSummary {
    pub n: usize,
    pub r: f64,
    pub p_value: f64,
    pub slope: f64,
    pub intercept: f64,
}

impl From<&CorrelationResult> for CorrelationSummary {
    fn from(result: &CorrelationResult) -> Self {
        Self {
            n: result.n,
            r: result.r,
            p_value: result.p_value,
            slope: result.slope,
            intercept: result.intercept,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub generated_at: DateTime<Utc>,
    pub incidents_path: String,
    pub incidents_sha256: String,
    pub provider: String,
    pub target_year: i32,
    pub date_range: DateRange,
    pub counts: StageCounts,
    pub correlation: Option<CorrelationSummary>,
    pub artifacts: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub map: PathBuf,
    pub scatter: PathBuf,
    pub rates: PathBuf,
    pub summary: PathBuf,
}

impl ArtifactPaths {
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            map: dir.join("crime_rate_map.html"),
            scatter: dir.join("unemployment_scatter.svg"),
            rates: dir.join("rates.csv"),
            summary: dir.join("summary.json"),
        }
    }
}

/// Writes the map, rates table, optional scatter plot and the run summary.
pub fn write_artifacts(
    params: &PipelineParams,
    output: &PipelineOutput,
    correlation: Option<&CorrelationResult>,
    paths: &ArtifactPaths,
    map_options: &MapOptions,
    scatter_options: &ScatterOptions,
) -> Result<RunSummary> {
    let mut artifacts = Vec::new();

    let html = render_choropleth(&output.tracts, &output.rates, map_options)?;
    write_artifact(&paths.map, &html)?;
    artifacts.push(paths.map.display().to_string());

    write_artifact(&paths.rates, &rates_to_csv(&output.rates)?)?;
    artifacts.push(paths.rates.display().to_string());

    if let Some(result) = correlation {
        let svg = render_scatter_svg(result, scatter_options)?;
        write_artifact(&paths.scatter, &svg)?;
        artifacts.push(paths.scatter.display().to_string());
    }

    artifacts.push(paths.summary.display().to_string());
    let summary = RunSummary {
        generated_at: Utc::now(),
        incidents_path: params.incidents_path.display().to_string(),
        incidents_sha256: output.incidents_sha256.clone(),
        provider: output.provider.clone(),
        target_year: params.target_year,
        date_range: params.date_range,
        counts: output.counts.clone(),
        correlation: correlation.map(CorrelationSummary::from),
        artifacts,
    };
    write_artifact(&paths.summary, &render_json(&summary)?)?;
    info!(
        artifacts = summary.artifacts.len(),
        "wrote outputs to {}",
        paths.summary.parent().unwrap_or(Path::new(".")).display()
    );
    Ok(summary)
}
