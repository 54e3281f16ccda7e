use std::fs::File;
use std::io::Read;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnemploymentRecord {
    pub geoid: String,
    pub unemployment_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnemploymentColumns {
    pub geoid: String,
    pub rate: String,
}

impl Default for UnemploymentColumns {
    fn default() -> Self {
        Self {
            geoid: "GEOID".to_string(),
            rate: "unemployment_rate".to_string(),
        }
    }
}

pub fn load_unemployment(path: &Path, columns: &UnemploymentColumns) -> Result<Vec<UnemploymentRecord>> {
    let file = File::open(path)
        .with_context(|| format!("failed opening unemployment table: {}", path.display()))?;
    let records = read_unemployment(file, columns)
        .with_context(|| format!("failed reading unemployment table: {}", path.display()))?;
    info!(
        tracts = records.len(),
        "loaded unemployment rates from {}",
        path.display()
    );
    Ok(records)
}

/// Rows with a blank or non-numeric rate are skipped.
pub fn read_unemployment<R: Read>(
    reader: R,
    columns: &UnemploymentColumns,
) -> Result<Vec<UnemploymentRecord>> {
    let mut csv_reader = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
    let headers = csv_reader.headers()?.clone();
    let find = |name: &str| {
        headers
            .iter()
            .position(|h| h.trim() == name)
            .ok_or_else(|| anyhow!("unemployment table is missing column {name}"))
    };
    let geoid_idx = find(columns.geoid.as_str())?;
    let rate_idx = find(columns.rate.as_str())?;

    let mut out = Vec::new();
    let mut skipped = 0usize;
    for row in csv_reader.records() {
        let row = row?;
        let geoid = row.get(geoid_idx).unwrap_or("").trim();
        let rate = row
            .get(rate_idx)
            .map(|v| v.trim().trim_end_matches('%'))
            .and_then(|v| v.parse::<f64>().ok())
            .filter(|v| v.is_finite());
        match (geoid.is_empty(), rate) {
            (false, Some(unemployment_rate)) => out.push(UnemploymentRecord {
                geoid: geoid.to_string(),
                unemployment_rate,
            }),
            _ => skipped += 1,
        }
    }
    if skipped > 0 {
        warn!("skipped {skipped} unemployment rows without a tract id or numeric rate");
    }
    Ok(out)
}
