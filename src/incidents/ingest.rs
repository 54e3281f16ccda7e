use std::fs::File;
use std::io::Read;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use csv::StringRecord;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::incidents::{IncidentRecord, CRIME_DATE_FORMAT};

pub const COL_CRIME_DATE: &str = "CrimeDate";
pub const COL_CRIME_TIME: &str = "CrimeTime";
pub const COL_DESCRIPTION: &str = "Description";
pub const COL_DISTRICT: &str = "District";
pub const COL_LATITUDE: &str = "Latitude";
pub const COL_LONGITUDE: &str = "Longitude";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectedRow {
    pub line: u64,
    pub value: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestReport {
    pub headers: Vec<String>,
    pub records: Vec<IncidentRecord>,
    pub rejected: Vec<RejectedRow>,
}

impl IngestReport {
    pub fn total_rows(&self) -> usize {
        self.records.len() + self.rejected.len()
    }
}

#[derive(Debug, Clone, Copy)]
struct ColumnIndex {
    crime_date: usize,
    crime_time: usize,
    description: usize,
    district: usize,
    latitude: usize,
    longitude: usize,
}

impl ColumnIndex {
    fn resolve(headers: &StringRecord) -> Result<Self> {
        let find = |name: &str| -> Result<usize> {
            headers
                .iter()
                .position(|h| h.trim() == name)
                .ok_or_else(|| anyhow!("incident file is missing required column {name}"))
        };
        Ok(Self {
            crime_date: find(COL_CRIME_DATE)?,
            crime_time: find(COL_CRIME_TIME)?,
            description: find(COL_DESCRIPTION)?,
            district: find(COL_DISTRICT)?,
            latitude: find(COL_LATITUDE)?,
            longitude: find(COL_LONGITUDE)?,
        })
    }
}

pub fn load_incidents(path: &Path) -> Result<IngestReport> {
    let file = File::open(path)
        .with_context(|| format!("failed opening incident file: {}", path.display()))?;
    let report = read_incidents(file)
        .with_context(|| format!("failed reading incident file: {}", path.display()))?;
    info!(
        accepted = report.records.len(),
        rejected = report.rejected.len(),
        "loaded incidents from {}",
        path.display()
    );
    Ok(report)
}

/// Malformed dates reject the offending row only; the load continues.
pub fn read_incidents<R: Read>(reader: R) -> Result<IngestReport> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(reader);
    let headers = csv_reader.headers()?.clone();
    let columns = ColumnIndex::resolve(&headers)?;

    let mut records = Vec::new();
    let mut rejected = Vec::new();
    for (row_idx, row) in csv_reader.records().enumerate() {
        // header is line 1
        let fallback_line = row_idx as u64 + 2;
        let row = match row {
            Ok(row) => row,
            Err(err) => {
                rejected.push(RejectedRow {
                    line: err
                        .position()
                        .map(|p| p.line())
                        .unwrap_or(fallback_line),
                    value: String::new(),
                    reason: err.to_string(),
                });
                continue;
            }
        };
        let line = row.position().map(|p| p.line()).unwrap_or(fallback_line);
        let field = |idx: usize| row.get(idx).unwrap_or("").to_string();

        let raw_date = field(columns.crime_date);
        let crime_date = match NaiveDate::parse_from_str(raw_date.trim(), CRIME_DATE_FORMAT) {
            Ok(date) => date,
            Err(err) => {
                rejected.push(RejectedRow {
                    line,
                    value: raw_date,
                    reason: format!("{COL_CRIME_DATE} does not match {CRIME_DATE_FORMAT}: {err}"),
                });
                continue;
            }
        };

        records.push(IncidentRecord {
            id: row_idx,
            crime_date,
            crime_time: field(columns.crime_time),
            description: field(columns.description),
            district: field(columns.district),
            latitude: optional_text(row.get(columns.latitude)),
            longitude: optional_text(row.get(columns.longitude)),
            fields: row.iter().map(str::to_string).collect(),
        });
    }

    if !rejected.is_empty() {
        warn!(
            "rejected {} incident rows with malformed {COL_CRIME_DATE}",
            rejected.len()
        );
    }

    Ok(IngestReport {
        headers: headers.iter().map(|h| h.trim().to_string()).collect(),
        records,
        rejected,
    })
}

fn optional_text(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use crate::incidents::ingest::read_incidents;

    const HEADER: &str = "CrimeDate,CrimeTime,CrimeCode,Description,District,Longitude,Latitude\n";

    #[test]
    fn parses_dates_and_keeps_row_order() {
        let data = format!(
            "{HEADER}06/01/2018,12:00:00,5A,BURGLARY,NORTHERN,-76.62,39.30\n\
             01/15/2014,08:30:00,6D,LARCENY FROM AUTO,SOUTHERN,NA,NA\n"
        );
        let report = read_incidents(data.as_bytes()).expect("ingest failed");
        assert_eq!(report.records.len(), 2);
        assert!(report.rejected.is_empty());
        let first = &report.records[0];
        assert_eq!(first.id, 0);
        assert_eq!(first.crime_date, NaiveDate::from_ymd_opt(2018, 6, 1).unwrap());
        assert_eq!(first.description, "BURGLARY");
        assert_eq!(first.longitude.as_deref(), Some("-76.62"));
        assert_eq!(first.fields.len(), 7);
        assert_eq!(report.records[1].id, 1);
        assert_eq!(report.records[1].latitude.as_deref(), Some("NA"));
    }

    #[test]
    fn rejects_malformed_date_rows_without_failing_load() {
        let data = format!(
            "{HEADER}2018-06-01,12:00:00,5A,BURGLARY,NORTHERN,-76.62,39.30\n\
             13/45/2018,12:00:00,5A,BURGLARY,NORTHERN,-76.62,39.30\n\
             07/01/2018,12:00:00,5A,BURGLARY,NORTHERN,-76.62,39.30\n"
        );
        let report = read_incidents(data.as_bytes()).expect("ingest failed");
        assert_eq!(report.records.len(), 1);
        assert_eq!(report.rejected.len(), 2);
        assert_eq!(report.rejected[0].line, 2);
        assert_eq!(report.rejected[0].value, "2018-06-01");
        assert_eq!(report.total_rows(), 3);
        // ids follow source row positions, not accepted-row positions
        assert_eq!(report.records[0].id, 2);
    }

    #[test]
    fn ids_skip_rejected_rows() {
        let data = format!(
            "{HEADER}06/01/2018,12:00:00,5A,BURGLARY,NORTHERN,-76.62,39.30\n\
             not-a-date,12:00:00,5A,BURGLARY,NORTHERN,-76.62,39.30\n\
             06/03/2018,12:00:00,6D,LARCENY,SOUTHERN,-76.61,39.29\n"
        );
        let report = read_incidents(data.as_bytes()).expect("ingest failed");
        let ids = report.records.iter().map(|r| r.id).collect::<Vec<_>>();
        assert_eq!(ids, vec![0, 2]);
        assert_eq!(report.rejected[0].line, 3);
    }

    #[test]
    fn missing_required_column_is_fatal() {
        let data = "CrimeDate,Description\n06/01/2018,BURGLARY\n";
        let err = read_incidents(data.as_bytes()).expect_err("expected missing column");
        assert!(err.to_string().contains("CrimeTime"));
    }

    #[test]
    fn empty_coordinates_read_as_none() {
        let data = format!("{HEADER}06/01/2018,12:00:00,5A,ARSON,EASTERN,,\n");
        let report = read_incidents(data.as_bytes()).expect("ingest failed");
        assert!(report.records[0].latitude.is_none());
        assert!(report.records[0].longitude.is_none());
    }
}
