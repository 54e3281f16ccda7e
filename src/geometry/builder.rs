use anyhow::Result;
use geo::Point;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::geometry::projection::{transform_coord, Crs};
use crate::incidents::IncidentRecord;

#[derive(Debug, Clone, PartialEq)]
pub struct LocatedIncident {
    pub record: IncidentRecord,
    pub point: Point<f64>,
    pub crs: Crs,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DroppedCoordinates {
    pub missing: usize,
    pub invalid: usize,
}

impl DroppedCoordinates {
    pub fn total(&self) -> usize {
        self.missing + self.invalid
    }
}

#[derive(Debug, Clone)]
pub struct LocateReport {
    pub located: Vec<LocatedIncident>,
    pub dropped: DroppedCoordinates,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum CoordinateIssue {
    Missing,
    Invalid,
}

/// `None` for empty, `NA`, non-numeric or non-finite text.
pub fn parse_coordinate(raw: Option<&str>) -> Option<f64> {
    classify(raw).ok()
}

fn classify(raw: Option<&str>) -> Result<f64, CoordinateIssue> {
    let Some(text) = raw.map(str::trim).filter(|t| !t.is_empty()) else {
        return Err(CoordinateIssue::Missing);
    };
    if text.eq_ignore_ascii_case("na") || text.eq_ignore_ascii_case("nan") {
        return Err(CoordinateIssue::Missing);
    }
    match text.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(CoordinateIssue::Invalid),
    }
}

/// Builds EPSG:4326 points from the raw longitude/latitude text and reprojects
/// them into `target`. Rows without usable coordinates are dropped.
pub fn locate_incidents(records: &[IncidentRecord], target: Crs) -> Result<LocateReport> {
    let mut located = Vec::with_capacity(records.len());
    let mut dropped = DroppedCoordinates::default();

    for record in records {
        let lon = classify(record.longitude.as_deref());
        let lat = classify(record.latitude.as_deref());
        let (lon, lat) = match (lon, lat) {
            (Ok(lon), Ok(lat)) => (lon, lat),
            (Err(CoordinateIssue::Missing), _) | (_, Err(CoordinateIssue::Missing)) => {
                dropped.missing += 1;
                continue;
            }
            _ => {
                dropped.invalid += 1;
                continue;
            }
        };
        if !(-180.0..=180.0).contains(&lon) || lat <= -90.0 || lat >= 90.0 {
            dropped.invalid += 1;
            continue;
        }

        let geographic = Point::new(lon, lat);
        let projected = match transform_coord(Crs::Wgs84, target, geographic.0) {
            Ok(projected) => projected,
            Err(err) => {
                debug!(id = record.id, "dropping incident: {err}");
                dropped.invalid += 1;
                continue;
            }
        };
        located.push(LocatedIncident {
            record: record.clone(),
            point: Point::from(projected),
            crs: target,
        });
    }

    info!(
        located = located.len(),
        missing = dropped.missing,
        invalid = dropped.invalid,
        "built incident geometries in {target}"
    );
    Ok(LocateReport { located, dropped })
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use crate::geometry::builder::{locate_incidents, parse_coordinate};
    use crate::geometry::projection::Crs;
    use crate::incidents::IncidentRecord;

    fn record(id: usize, lon: Option<&str>, lat: Option<&str>) -> IncidentRecord {
        IncidentRecord {
            id,
            crime_date: NaiveDate::from_ymd_opt(2018, 6, 1).unwrap(),
            crime_time: "12:00:00".to_string(),
            description: "BURGLARY".to_string(),
            district: "NORTHERN".to_string(),
            latitude: lat.map(str::to_string),
            longitude: lon.map(str::to_string),
            fields: Vec::new(),
        }
    }

    #[test]
    fn drops_missing_and_invalid_coordinates() {
        let records = vec![
            record(0, Some("-76.61"), Some("39.29")),
            record(1, Some("NA"), Some("39.29")),
            record(2, Some("-76.61"), Some("NA")),
            record(3, None, None),
            record(4, Some("abc"), Some("39.29")),
            record(5, Some("-76.60"), Some("139.29")),
            record(6, Some(" -76.59 "), Some("39.31")),
        ];
        let report = locate_incidents(&records, Crs::MarylandStatePlane).unwrap();
        let ids = report
            .located
            .iter()
            .map(|l| l.record.id)
            .collect::<Vec<_>>();
        assert_eq!(ids, vec![0, 6]);
        assert_eq!(report.dropped.missing, 3);
        assert_eq!(report.dropped.invalid, 2);
        assert_eq!(report.dropped.total() + report.located.len(), records.len());
    }

    #[test]
    fn projected_points_differ_from_raw_degrees() {
        let records = vec![record(0, Some("-76.61"), Some("39.29"))];
        let report = locate_incidents(&records, Crs::MarylandStatePlane).unwrap();
        let located = &report.located[0];
        assert_eq!(located.crs, Crs::MarylandStatePlane);
        assert!(located.point.x().is_finite() && located.point.y().is_finite());
        assert!((located.point.x() - -76.61).abs() > 1.0);
        assert!((located.point.y() - 39.29).abs() > 1.0);
    }

    #[test]
    fn parses_coordinate_text() {
        assert_eq!(parse_coordinate(Some("39.5")), Some(39.5));
        assert_eq!(parse_coordinate(Some("NA")), None);
        assert_eq!(parse_coordinate(Some("")), None);
        assert_eq!(parse_coordinate(Some("inf")), None);
        assert_eq!(parse_coordinate(None), None);
    }

    #[test]
    fn polar_latitudes_drop_only_their_row() {
        let records = vec![
            record(0, Some("-76.61"), Some("39.29")),
            record(1, Some("-76.61"), Some("-90")),
            record(2, Some("-76.61"), Some("90")),
        ];
        let report = locate_incidents(&records, Crs::MarylandStatePlane).unwrap();
        assert_eq!(report.located.len(), 1);
        assert_eq!(report.located[0].record.id, 0);
        assert_eq!(report.dropped.invalid, 2);
    }
}
